use crate::decode::cpr::CPRFormat;
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * ## Surface Position (BDS 0,6)
 *
 * Ground traffic replaces the altitude field with movement (ground speed)
 * and ground track.
 *
 * | TC  | MOV | S   | TRK | T   | F   | LAT-CPR | LON-CPR |
 * | --- | --- | --- | --- | --- | --- | ------- | ------- |
 * | 5   | 7   | 1   | 7   | 1   | 1   | 17      | 17      |
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Copy, Clone)]
pub struct SurfacePosition {
    /// The typecode (between 5 and 8)
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    /// Ground speed in knots decoded from the 7-bit movement field,
    /// None when not available or reserved
    #[deku(reader = "read_movement(deku::reader)")]
    pub groundspeed: Option<f64>,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub track_status: bool,

    /// Ground track, clockwise from true north, LSB 360/128 degrees;
    /// None when the status bit is unset
    #[deku(
        bits = "7",
        map = "|value: u8| -> Result<_, DekuError> {
            if *track_status {
                Ok(Some(value as f64 * 360. / 128.))
            } else {
                Ok(None)
            }
        }"
    )]
    pub track: Option<f64>,

    /// UTC synchronization bit
    #[deku(bits = "1")]
    #[serde(skip)]
    pub t: bool,

    /// Odd or even CPR frame
    pub parity: CPRFormat,

    #[deku(bits = "17", endian = "big")]
    pub lat_cpr: u32,

    #[deku(bits = "17", endian = "big")]
    pub lon_cpr: u32,
}

/// Decode ground speed from the non-linear 7-bit movement encoding: low
/// speeds carry finer quantization than the taxi/takeoff range.
fn read_movement<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
    reader: &mut Reader<R>,
) -> Result<Option<f64>, DekuError> {
    let mov = u8::from_reader_with_ctx(
        reader,
        (deku::ctx::Endian::Big, deku::ctx::BitSize(7)),
    )?;
    let value = match mov {
        0 => None,                                       // no information
        1 => Some(0.),                                   // stopped
        2..=8 => Some(0.125 + (mov - 2) as f64 * 0.125), // [0.125, 1) kt
        9..=12 => Some(1. + (mov - 9) as f64 * 0.25),    // [1, 2) kt
        13..=38 => Some(2. + (mov - 13) as f64 * 0.5),   // [2, 15) kt
        39..=93 => Some(15. + (mov - 39) as f64 * 1.),   // [15, 70) kt
        94..=108 => Some(70. + (mov - 94) as f64 * 2.),  // [70, 100) kt
        109..=123 => Some(100. + (mov - 109) as f64 * 5.), // [100, 175) kt
        124 => Some(175.),
        _ => None, // reserved
    };
    Ok(value)
}

impl fmt::Display for SurfacePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Surface position (BDS 0,6)")?;
        let groundspeed = self
            .groundspeed
            .map_or_else(|| "None".to_string(), |gs| format!("{gs} kts"));
        let track = self
            .track
            .map_or_else(|| "None".to_string(), |track| format!("{track}°"));
        writeln!(f, "  Groundspeed:   {groundspeed}")?;
        writeln!(f, "  Track angle:   {track}")?;
        writeln!(f, "  CPR parity:    {}", self.parity)?;
        writeln!(f, "  CPR latitude:  ({})", self.lat_cpr)?;
        writeln!(f, "  CPR longitude: ({})", self.lon_cpr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::adsb::ME;
    use crate::decode::{Message, DF};
    use hexlit::hex;

    #[test]
    fn test_surface_position() {
        let bytes = hex!("8c4841753a9a153237aef0f275be");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS06(pos) = adsb.message else {
            unreachable!()
        };
        assert_eq!(pos.track, Some(92.8125));
        assert_eq!(pos.groundspeed, Some(17.));
        assert_eq!(pos.parity, CPRFormat::Odd);
        assert_eq!(pos.lat_cpr, 39195);
        assert_eq!(pos.lon_cpr, 110320);
    }

    #[test]
    fn test_movement_stopped() {
        let bytes = hex!("903a33ff40100858d34ff3cce976");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterTisB { cf, .. } = msg.df else {
            unreachable!()
        };
        let ME::BDS06(pos) = cf.me else { unreachable!() };
        assert_eq!(pos.groundspeed, Some(0.0));
        // track status bit unset
        assert_eq!(pos.track, None);
    }

    #[test]
    fn test_movement_15_70kt_range() {
        // movement code 39, the lower bound of the 1 kt band
        let bytes = hex!("8c3461cf3a7f3059c94e5bf4e169");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS06(pos) = adsb.message else {
            unreachable!()
        };
        assert_eq!(pos.groundspeed, Some(15.0));
    }
}
