use crate::decode::cpr::CPRFormat;
use crate::decode::{decode_id13, gray2alt};
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * ## Airborne Position (BDS 0,5)
 *
 * with barometric altitude (TC=9..=18) or geometric height (TC=20..=22)
 *
 * | TC | SS | SAF/NICb | ALT | T | F | LAT-CPR | LON-CPR |
 * | -- | -- | -------- | --- | - | - | ------- | ------- |
 * | 5  | 2  |    1     | 12  | 1 | 1 |   17    |   17    |
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AirbornePosition {
    /// The typecode (between 9 and 18, or between 20 and 22)
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    /// Surveillance status: permanent/temporary alert and SPI
    #[serde(skip)]
    pub ss: SurveillanceStatus,

    /// Single Antenna Flag in ADS-B v0/v1, NIC supplement B in v2
    #[deku(bits = "1")]
    #[serde(rename = "NICb")]
    pub nic_b: u8,

    /// Altitude in feet (barometric for TC<19, geometric height above
    /// the WGS84 ellipsoid for TC 20-22), None if unavailable
    #[deku(reader = "read_ac12(deku::reader)")]
    #[serde(rename = "altitude")]
    pub alt: Option<u16>,

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

impl AirbornePosition {
    /// Geometric height rather than barometric altitude
    pub fn gnss_height(&self) -> bool {
        self.tc >= 20
    }

    /// Navigation Uncertainty Category (position), directly from the
    /// typecode, meaningful for ADS-B v0 transmitters
    pub fn nuc_p(&self) -> u8 {
        match self.tc {
            n if n < 19 => 18 - n,
            20 | 21 => 29 - self.tc,
            _ => 0,
        }
    }
}

/// Decode the altitude field encoded on 12 bits (Q bit at position 8)
fn read_ac12<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
    reader: &mut Reader<R>,
) -> Result<Option<u16>, DekuError> {
    let num = u16::from_reader_with_ctx(
        reader,
        (deku::ctx::Endian::Big, deku::ctx::BitSize(12)),
    )?;

    let q = num & 0x10;

    if q > 0 {
        let n = ((num & 0x0fe0) >> 1) | (num & 0x000f);
        let n = n * 25;
        if n > 1000 {
            Ok(Some(n - 1000))
        } else {
            Ok(None)
        }
    } else {
        let mut n = ((num & 0x0fc0) << 1) | (num & 0x003f);
        n = decode_id13(n);
        match gray2alt(n) {
            Ok(n) if n >= 0 => Ok(u16::try_from(n * 100).ok()),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "2")]
#[serde(rename_all = "snake_case")]
pub enum SurveillanceStatus {
    NoCondition = 0,
    PermanentAlert = 1,
    TemporaryAlert = 2,
    SpiCondition = 3,
}

impl fmt::Display for AirbornePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Airborne position (BDS 0,5)")?;
        let altitude = self
            .alt
            .map_or_else(|| "None".to_string(), |alt| format!("{alt} ft"));
        let source = if self.gnss_height() { "GNSS" } else { "barometric" };
        writeln!(f, "  Altitude:      {altitude} {source}")?;
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
    fn test_airborne_position() {
        let bytes = hex!("8D40058B58C901375147EFD09357");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS05(pos) = adsb.message else {
            unreachable!()
        };
        assert_eq!(pos.tc, 11);
        assert_eq!(pos.parity, CPRFormat::Even);
        assert_eq!(pos.alt, Some(39000));
        assert_eq!(pos.lat_cpr, 39848);
        assert_eq!(pos.nuc_p(), 7);
        assert!(!pos.gnss_height());
    }
}
