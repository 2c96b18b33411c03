use crate::decode::{getbit, getbits};
use serde::Serialize;

/**
 * ## Meteorological Routine Air Report (BDS 4,4)
 *
 * Wind, static air temperature, static pressure, turbulence and humidity,
 * each behind its own status bit. Rarely configured; the scoring is strict
 * about every field landing in its physical range.
 */
#[derive(Debug, PartialEq, Serialize, Copy, Clone)]
#[serde(rename = "44")]
pub struct MeteoRoutineReport {
    /// FOM/source of the measurement (0..=6 plausible)
    pub source: u8,
    /// Wind speed in knots and direction in degrees true
    pub wind: Option<(u16, f32)>,
    /// Static air temperature, °C (always present, 0.25° steps)
    pub temperature: f32,
    /// Average static pressure, hPa
    pub static_pressure: Option<u16>,
    /// Turbulence level 0..=3
    pub turbulence: Option<u8>,
    /// Relative humidity, percent
    pub humidity: Option<f32>,
}

pub fn score(mb: &[u8; 7]) -> i32 {
    let source = getbits(mb, 1, 4);

    let wind_valid = getbit(mb, 5) != 0;
    let wind_speed_raw = getbits(mb, 6, 14);
    let wind_direction_raw = getbits(mb, 15, 23);

    let temperature_sign = getbit(mb, 24);
    let temperature_raw = getbits(mb, 25, 34);

    let pressure_valid = getbit(mb, 35) != 0;
    let pressure_raw = getbits(mb, 36, 46);

    let turbulence_valid = getbit(mb, 47) != 0;
    let turbulence_raw = getbits(mb, 48, 49);

    let humidity_valid = getbit(mb, 50) != 0;
    let humidity_raw = getbits(mb, 51, 56);

    let mut score = 0;

    if source <= 6 {
        score += 4;
    } else {
        return 0;
    }

    if wind_valid {
        if wind_speed_raw <= 511 {
            score += 9;
        } else {
            return 0;
        }
        let wind_direction = wind_direction_raw as f32 * 360.0 / 512.0;
        if (0.0..=360.0).contains(&wind_direction) {
            score += 9;
        } else {
            return 0;
        }
    } else if wind_speed_raw == 0 && wind_direction_raw == 0 {
        score += 2;
    }

    let temperature = if temperature_sign != 0 {
        (temperature_raw as f32 - 1024.0) * 0.25
    } else {
        temperature_raw as f32 * 0.25
    };
    if (-128.0..=128.0).contains(&temperature) {
        score += 10;
    } else {
        return 0;
    }

    if pressure_valid {
        if pressure_raw <= 2048 {
            score += 11;
        } else {
            return 0;
        }
    } else if pressure_raw == 0 {
        score += 1;
    }

    if turbulence_valid {
        if turbulence_raw <= 3 {
            score += 2;
        } else {
            return 0;
        }
    } else if turbulence_raw == 0 {
        score += 1;
    }

    if humidity_valid {
        let humidity = humidity_raw as f32 * 100.0 / 64.0;
        if (0.0..=100.0).contains(&humidity) {
            score += 6;
        } else {
            return 0;
        }
    } else if humidity_raw == 0 {
        score += 1;
    }

    score
}

pub fn decode(mb: &[u8; 7]) -> MeteoRoutineReport {
    let wind_valid = getbit(mb, 5) != 0;
    let temperature_sign = getbit(mb, 24);
    let temperature_raw = getbits(mb, 25, 34);
    let pressure_valid = getbit(mb, 35) != 0;
    let turbulence_valid = getbit(mb, 47) != 0;
    let humidity_valid = getbit(mb, 50) != 0;

    let temperature = if temperature_sign != 0 {
        (temperature_raw as f32 - 1024.0) * 0.25
    } else {
        temperature_raw as f32 * 0.25
    };

    MeteoRoutineReport {
        source: getbits(mb, 1, 4) as u8,
        wind: wind_valid.then(|| {
            (
                getbits(mb, 6, 14) as u16,
                getbits(mb, 15, 23) as f32 * 360.0 / 512.0,
            )
        }),
        temperature,
        static_pressure: pressure_valid.then(|| getbits(mb, 36, 46) as u16),
        turbulence: turbulence_valid.then(|| getbits(mb, 48, 49) as u8),
        humidity: humidity_valid.then(|| getbits(mb, 51, 56) as f32 * 100.0 / 64.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // source 1, wind 22 kt from 270°, SAT -38.75°C
    fn sample() -> [u8; 7] {
        let mut mb = [0u8; 7];
        mb[0] = 0b00011000; // source 0001, wind_valid, speed bits 6-8
        mb[1] = 0b01011011; // speed 22 = 000010110, direction bits 15-16
        mb[2] = 0b00000001; // direction 384 = 110000000, temperature sign
        mb[3] = 0b11011001; // temperature raw 869 = 1101100101
        mb[4] = 0b01000000;
        mb
    }

    #[test]
    fn test_score_and_decode() {
        let mb = sample();
        assert!(score(&mb) > 0);
        let met = decode(&mb);
        assert_eq!(met.source, 1);
        let (speed, direction) = met.wind.unwrap();
        assert_eq!(speed, 22);
        assert!((direction - 270.0).abs() < 0.01);
        assert!((met.temperature + 38.75).abs() < 0.01);
        assert_eq!(met.static_pressure, None);
        assert_eq!(met.humidity, None);
    }

    #[test]
    fn test_in_range_pressure_accepted() {
        let mut mb = sample();
        // pressure_valid (bit 35) + raw 1013 = 01111110101 in bits 36-46
        mb[4] = 0b01101111;
        mb[5] = 0b11010100;
        assert!(score(&mb) > 0);
        let met = decode(&mb);
        assert_eq!(met.static_pressure, Some(1013));
    }

    #[test]
    fn test_implausible_temperature_rejected() {
        let mut mb = sample();
        // sign cleared, raw 1000 -> +250°C
        mb[2] = 0b00000000;
        mb[3] = 0b11111010;
        mb[4] = 0b00000000;
        assert_eq!(score(&mb), 0);
    }
}
