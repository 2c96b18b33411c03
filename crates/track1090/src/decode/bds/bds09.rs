use deku::prelude::*;
use serde::ser::SerializeStruct;
use serde::Serialize;
use std::fmt;

/**
 * ## Airborne Velocity (BDS 0,9)
 *
 * Transmitted with Type Code 19. Subtypes 1 and 2 report ground speed,
 * subtypes 3 and 4 report true or indicated airspeed with a magnetic
 * heading (airspeed is only broadcast when the position cannot be derived
 * from GNSS). Even subtypes are the supersonic variants with a 4 kt
 * resolution instead of 1 kt.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
pub struct AirborneVelocity {
    #[deku(bits = "3")]
    #[serde(skip)]
    pub subtype: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub intent_change: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub ifr_capability: bool,

    /// Navigation Accuracy Category, velocity (NUCr in ADS-B version 0)
    #[deku(bits = "3")]
    #[serde(rename = "NACv")]
    pub nac_v: u8,

    /// Ground speed or airspeed depending on the subtype
    #[deku(ctx = "*subtype")]
    #[serde(flatten)]
    pub velocity: AirborneVelocitySubType,

    /// The source for the vertical rate measurement
    pub vrate_src: VerticalRateSource,

    #[serde(skip)]
    pub vrate_sign: Sign,

    /// Vertical rate in ft/min, None if unavailable
    #[deku(
        endian = "big",
        bits = "9",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) }
            else {
                Ok(Some(vrate_sign.value() * (v as i16 - 1) * 64))
            }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate: Option<i16>,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved: u8,

    #[serde(skip)]
    pub gnss_sign: Sign,

    /// Signed difference between the GNSS height and the barometric
    /// altitude, in feet
    #[deku(reader = "read_geo_minus_baro(deku::reader, *gnss_sign)")]
    pub geo_minus_baro: Option<i16>,
}

fn read_geo_minus_baro<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
    reader: &mut Reader<R>,
    gnss_sign: Sign,
) -> Result<Option<i16>, DekuError> {
    let value = u8::from_reader_with_ctx(
        reader,
        (deku::ctx::Endian::Big, deku::ctx::BitSize(7)),
    )?;
    let value = if value > 1 {
        Some(gnss_sign.value() * 25 * (value as i16 - 1))
    } else {
        None
    };
    Ok(value)
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(ctx = "subtype: u8", id = "subtype")]
#[serde(untagged)]
pub enum AirborneVelocitySubType {
    #[deku(id = "0")]
    Reserved0(#[deku(bits = "22")] u32),

    #[deku(id_pat = "1..=2")]
    GroundSpeed(#[deku(ctx = "subtype")] GroundSpeedDecoding),

    #[deku(id_pat = "3..=4")]
    Airspeed(#[deku(ctx = "subtype")] AirspeedDecoding),

    #[deku(id_pat = "5..=7")]
    Reserved1(#[deku(bits = "22")] u32),
}

#[derive(Debug, PartialEq, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "1")]
pub enum Sign {
    Positive = 0,
    Negative = 1,
}

impl Sign {
    #[must_use]
    pub fn value(&self) -> i16 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }
}

/// East-west and north-south velocity components combined into a ground
/// speed and a true track. Supersonic subtype 2 quadruples the resolution.
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(ctx = "subtype: u8")]
pub struct GroundSpeedDecoding {
    #[serde(skip)]
    pub ew_sign: Sign,
    #[deku(
        endian = "big",
        bits = "10",
        map = "|val: u16| -> Result<_, DekuError> {
            let scale = if subtype == 2 { 4 } else { 1 };
            Ok(f64::from((val as i16 - 1) * ew_sign.value() * scale))
        }"
    )]
    #[serde(skip)]
    pub ew_vel: f64,
    #[serde(skip)]
    pub ns_sign: Sign,
    #[deku(
        endian = "big",
        bits = "10",
        map = "|val: u16| -> Result<_, DekuError> {
            let scale = if subtype == 2 { 4 } else { 1 };
            Ok(f64::from((val as i16 - 1) * ns_sign.value() * scale))
        }"
    )]
    #[serde(skip)]
    pub ns_vel: f64,

    #[deku(skip, default = "libm::hypot(f64::abs(*ew_vel), f64::abs(*ns_vel))")]
    pub groundspeed: f64,

    #[deku(
        skip,
        default = "
        let h = libm::atan2(*ew_vel, *ns_vel) *
            (360.0 / (2.0 * std::f64::consts::PI));
        if h < 0.0 { h + 360. } else { h }
        "
    )]
    pub track: f64,
}

#[derive(Debug, PartialEq, DekuRead, Clone)]
#[deku(ctx = "subtype: u8")]
pub struct AirspeedDecoding {
    #[deku(bits = "1")]
    pub status_heading: bool,

    /// Magnetic heading, LSB 360/1024 degrees
    #[deku(
        endian = "big",
        bits = "10",
        map = "|val: u16| -> Result<_, DekuError> {
            Ok(if *status_heading { Some(val as f64 * 360. / 1024.) } else { None })
        }"
    )]
    pub heading: Option<f64>,

    pub airspeed_type: AirspeedType,

    #[deku(
        endian = "big",
        bits = "10",
        map = "|value: u16| -> Result<_, DekuError> {
            if value == 0 { return Ok(None) }
            let scale = if subtype == 4 { 4 } else { 1 };
            Ok(Some((value - 1) * scale))
        }"
    )]
    pub airspeed: Option<u16>,
}

impl Serialize for AirspeedDecoding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        let mut state = serializer.serialize_struct("Message", 2)?;
        if let Some(heading) = &self.heading {
            state.serialize_field("heading", heading)?;
        }
        if let Some(airspeed) = &self.airspeed {
            match &self.airspeed_type {
                AirspeedType::IAS => state.serialize_field("IAS", &airspeed)?,
                AirspeedType::TAS => state.serialize_field("TAS", &airspeed)?,
            }
        }
        state.end()
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "1")]
pub enum AirspeedType {
    IAS = 0,
    TAS = 1,
}

#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "1")]
#[serde(rename_all = "snake_case")]
pub enum VerticalRateSource {
    GnssAltitude = 0,
    BarometricAltitude = 1,
}

impl fmt::Display for AirborneVelocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Airborne velocity (BDS 0,9)")?;
        match &self.velocity {
            AirborneVelocitySubType::GroundSpeed(gs) => {
                writeln!(f, "  Groundspeed:   {:.1} kt", gs.groundspeed)?;
                writeln!(f, "  Track:         {:.1}°", gs.track)?;
            }
            AirborneVelocitySubType::Airspeed(air) => {
                if let Some(airspeed) = air.airspeed {
                    writeln!(f, "  Airspeed:      {airspeed} kt {:?}", air.airspeed_type)?;
                }
                if let Some(heading) = air.heading {
                    writeln!(f, "  Heading:       {heading:.1}°")?;
                }
            }
            _ => {}
        }
        if let Some(rate) = self.vertical_rate {
            writeln!(f, "  Vertical rate: {rate} ft/min")?;
        }
        Ok(())
    }
}
