use chrono::{DateTime, Datelike, Utc};
use tracing::debug;
use world_magnetic_model::{
    time::Date, uom::si::angle::degree, uom::si::f32::*, uom::si::length::meter,
    GeomagneticField,
};

/// Magnetic declination (variance) at a location, degrees, positive east.
/// Used to convert magnetic headings to true. Returns None where the model
/// is undefined (very close to the poles) or the date falls outside the
/// model's validity window.
pub fn declination(latitude: f64, longitude: f64, altitude_m: f64, now_ms: u64) -> Option<f64> {
    let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(now_ms as i64)?;
    let date = Date::from_ordinal_date(timestamp.year(), timestamp.ordinal() as u16)
        .or_else(|_| Date::from_ordinal_date(2025, 1))
        .ok()?;

    let field = GeomagneticField::new(
        Length::new::<meter>(altitude_m as f32),
        Angle::new::<degree>(latitude as f32),
        Angle::new::<degree>(longitude as f32),
        date,
    )
    .map_err(|e| {
        debug!("geomagnetic field at {latitude:.1},{longitude:.1}: {e:?}");
        e
    })
    .ok()?;

    Some(field.declination().get::<degree>() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-01-01 in unix milliseconds
    const T0: u64 = 1_735_689_600_000;

    #[test]
    fn test_known_declinations() {
        // San Francisco leans east, New York leans west
        let sf = declination(37.77, -122.42, 0.0, T0).unwrap();
        assert!(sf > 10.0 && sf < 16.0, "SF: {sf}");

        let nyc = declination(40.71, -74.01, 0.0, T0).unwrap();
        assert!(nyc < -10.0 && nyc > -15.0, "NYC: {nyc}");

        // London is close to zero
        let london = declination(51.51, -0.13, 0.0, T0).unwrap();
        assert!(london.abs() < 5.0, "London: {london}");
    }
}
