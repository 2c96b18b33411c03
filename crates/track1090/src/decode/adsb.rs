use super::bds::{bds05, bds06, bds08, bds09, bds61, bds62, bds65};
use super::{Capability, ICAO};
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * An ADS-B frame is 112 bits long and consists of five main parts:
 *
 * +----------+----------+-------------+------------------------+-----------+
 * |  DF (5)  |  CA (3)  |  ICAO (24)  |         ME (56)        |  PI (24)  |
 * +----------+----------+-------------+------------------------+-----------+
 */
#[derive(Debug, PartialEq, DekuRead, Clone, Serialize)]
pub struct ADSB {
    /// Transponder capability
    #[serde(skip)]
    pub capability: Capability,

    /// ICAO aircraft address
    pub icao24: ICAO,

    /// The 56-bit ME field, dispatched on the typecode
    #[serde(flatten)]
    pub message: ME,

    /// Parity/interrogator ID
    #[serde(skip)]
    pub parity: ICAO,
}

impl fmt::Display for ADSB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " DF17. Extended Squitter")?;
        writeln!(f, "  Address:       {}", &self.icao24)?;
        writeln!(f, "  Air/Ground:    {}", &self.capability)?;
        write!(f, "{}", &self.message)
    }
}

/*
 * |  `ME`               |  Extended squitter content          |
 * | ------------------- | ----------------------------------- |
 * | 0                   | No position information             |
 * | 1..=4               | Aircraft identification             |
 * | 5..=8               | Surface position                    |
 * | 9..=18              | Airborne position (barometric alt)  |
 * | 19                  | Airborne velocity                   |
 * | 20..=22             | Airborne position (GNSS height)     |
 * | 28                  | Aircraft status                     |
 * | 29                  | Target state and status             |
 * | 31                  | Operational status                  |
 */
// nb: variants matched through `id_pat` re-read the five typecode bits
// themselves (the raw [u8; 7] payloads and the tc fields of the position
// and identification payloads); variants with a plain `id` start after them.
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(id_type = "u8", bits = "5")]
#[serde(tag = "BDS")]
pub enum ME {
    #[deku(id_pat = "0")]
    #[serde(skip)]
    NoPosition([u8; 7]),

    #[deku(id_pat = "1..=4")]
    #[serde(rename = "0,8")]
    BDS08(bds08::AircraftIdentification),

    #[deku(id_pat = "5..=8")]
    #[serde(rename = "0,6")]
    BDS06(bds06::SurfacePosition),

    #[deku(id_pat = "9..=18 | 20..=22")]
    #[serde(rename = "0,5")]
    BDS05(bds05::AirbornePosition),

    #[deku(id = "19")]
    #[serde(rename = "0,9")]
    BDS09(bds09::AirborneVelocity),

    #[deku(id_pat = "23")]
    #[serde(skip)]
    Reserved0([u8; 7]),

    #[deku(id_pat = "24")]
    #[serde(skip)]
    SurfaceSystemStatus([u8; 7]),

    #[deku(id_pat = "25..=27")]
    #[serde(skip)]
    Reserved1([u8; 7]),

    #[deku(id = "28")]
    #[serde(rename = "6,1")]
    BDS61(bds61::AircraftStatus),

    #[deku(id = "29")]
    #[serde(rename = "6,2")]
    BDS62(bds62::TargetStateAndStatus),

    #[deku(id_pat = "30")]
    #[serde(skip)]
    AircraftOperationalCoordination([u8; 7]),

    #[deku(id = "31")]
    #[serde(rename = "6,5")]
    BDS65(bds65::OperationStatus),
}

impl ME {
    /// The format type code carried in the first five bits of the ME field.
    pub fn typecode(&self) -> u8 {
        match self {
            ME::NoPosition(raw)
            | ME::Reserved0(raw)
            | ME::SurfaceSystemStatus(raw)
            | ME::Reserved1(raw)
            | ME::AircraftOperationalCoordination(raw) => raw[0] >> 3,
            ME::BDS05(p) => p.tc,
            ME::BDS06(p) => p.tc,
            ME::BDS08(p) => p.tc,
            ME::BDS09(_) => 19,
            ME::BDS61(_) => 28,
            ME::BDS62(_) => 29,
            ME::BDS65(_) => 31,
        }
    }
}

impl fmt::Display for ME {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ME::NoPosition(_)
            | ME::Reserved0(_)
            | ME::Reserved1(_)
            | ME::SurfaceSystemStatus(_)
            | ME::AircraftOperationalCoordination(_) => Ok(()),
            ME::BDS05(me) => write!(f, "{me}"),
            ME::BDS06(me) => write!(f, "{me}"),
            ME::BDS08(me) => write!(f, "{me}"),
            ME::BDS09(me) => write!(f, "{me}"),
            ME::BDS61(me) => write!(f, "{me}"),
            ME::BDS62(me) => write!(f, "{me}"),
            ME::BDS65(me) => write!(f, "{me}"),
        }
    }
}
