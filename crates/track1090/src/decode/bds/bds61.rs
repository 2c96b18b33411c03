use crate::decode::IdentityCode;
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * ## Aircraft Status (BDS 6,1 / TYPE=28)
 *
 * Emergency/priority status with the current Mode A code.
 *
 * | TYPE | SUBTYPE | EMERGENCY | SQUAWK | RESERVED |
 * |------|---------|-----------|--------|----------|
 * | 5    | 3       | 3         | 13     | 32       |
 *
 * Subtype 2 carries an ACAS RA broadcast instead; its payload reuses the
 * same bits, so the emergency and squawk fields are only meaningful for
 * subtype 1.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AircraftStatus {
    pub subtype: AircraftStatusType,

    /// Emergency state, meaningful for subtype 1
    pub emergency_state: EmergencyState,

    /// Mode A code (squawk), meaningful for subtype 1
    pub squawk: IdentityCode,

    #[deku(bits = "32")]
    #[serde(skip)]
    pub reserved: u32,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum AircraftStatusType {
    #[deku(id = "0")]
    NoInformation,

    #[deku(id = "1")]
    #[serde(rename = "emergency_priority")]
    EmergencyPriorityStatus,

    /// ACAS RA broadcast, takes priority over subtype 1
    #[deku(id = "2")]
    #[serde(rename = "acas_ra")]
    AcasRaBroadcast,

    #[deku(id_pat = "_")]
    Reserved,
}

/// 3-bit emergency status (subtype 1)
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone, Default)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum EmergencyState {
    #[default]
    None = 0,
    /// Mode A code 7700
    General = 1,
    Medical = 2,
    MinimumFuel = 3,
    /// Mode A code 7600
    NoCommunication = 4,
    /// Mode A code 7500
    UnlawfulInterference = 5,
    DownedAircraft = 6,
    Reserved = 7,
}

impl fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "no emergency",
            Self::General => "general emergency (7700)",
            Self::Medical => "lifeguard/medical emergency",
            Self::MinimumFuel => "minimum fuel",
            Self::NoCommunication => "no communication (7600)",
            Self::UnlawfulInterference => "unlawful interference (7500)",
            Self::DownedAircraft => "downed aircraft",
            Self::Reserved => "reserved",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for AircraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Aircraft status (BDS 6,1)")?;
        writeln!(f, "  Squawk:        {}", &self.squawk)?;
        writeln!(f, "  Emergency:     {}", &self.emergency_state)?;
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
    fn test_aircraft_status() {
        let bytes = hex!("8DA2C1B6E112B600000000760759");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS61(status) = adsb.message else {
            unreachable!()
        };
        assert_eq!(status.subtype, AircraftStatusType::EmergencyPriorityStatus);
        assert_eq!(status.emergency_state, EmergencyState::None);
        assert_eq!(status.squawk.0, 0x1300);
    }
}
