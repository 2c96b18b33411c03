use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * ## Aircraft Operational Status (BDS 6,5 / TYPE=31)
 *
 * Capability classes, operational modes and the quality indicators that
 * qualify every following position message: ADS-B version, NIC supplements,
 * NACp, GVA, SIL, SDA and the heading reference direction.
 *
 * Airborne (subtype 0):
 * | TYPE | ST | CC | OM | VER | NICa | NACp | GVA | SIL | NICbaro | HRD | SILs | R |
 * |------|----|----|----|-----|------|------|-----|-----|---------|-----|------|---|
 * | 5    | 3  | 16 | 16 | 3   | 1    | 4    | 2   | 2   | 1       | 1   | 1    | 1 |
 *
 * Surface (subtype 1) replaces four CC bits with the L/W code and GVA with
 * reserved bits, and adds the TAH (track angle / heading) selector.
 *
 * Version 0 transmitters fill the fields after OM with zeroes; the tracker
 * only interprets them for versions 1 and 2.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "3")]
#[serde(untagged)]
pub enum OperationStatus {
    #[deku(id = "0")]
    Airborne(OperationStatusAirborne),

    #[deku(id = "1")]
    Surface(OperationStatusSurface),

    #[deku(id_pat = "2..=7")]
    Reserved(u8, [u8; 6]),
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct OperationStatusAirborne {
    #[serde(skip)]
    pub capability_class: CapabilityClassAirborne,

    #[serde(skip)]
    pub operational_mode: OperationalMode,

    /// ADS-B version: 0 DO-260, 1 DO-260A, 2 DO-260B
    #[deku(bits = "3")]
    pub version: u8,

    /// NIC supplement A, combined with the position typecode
    #[deku(bits = "1")]
    pub nic_a: u8,

    #[deku(bits = "4")]
    #[serde(rename = "NACp")]
    pub nac_p: u8,

    /// Geometric Vertical Accuracy
    #[deku(bits = "2")]
    #[serde(rename = "GVA")]
    pub gva: u8,

    #[deku(bits = "2")]
    #[serde(rename = "SIL")]
    pub sil: u8,

    #[deku(bits = "1")]
    pub nic_baro: u8,

    /// Heading reference direction: false true north, true magnetic north
    #[deku(bits = "1")]
    pub hrd_magnetic: bool,

    /// SIL probability basis: false per hour, true per sample
    #[deku(bits = "1")]
    #[serde(skip)]
    pub sil_supplement: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub reserved: u8,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct OperationStatusSurface {
    #[serde(skip)]
    pub capability_class: CapabilityClassSurface,

    /// Aircraft length/width code
    #[deku(bits = "4")]
    #[serde(skip)]
    pub lw_code: u8,

    #[serde(skip)]
    pub operational_mode: OperationalMode,

    /// ADS-B version: 0 DO-260, 1 DO-260A, 2 DO-260B
    #[deku(bits = "3")]
    pub version: u8,

    /// NIC supplement A, combined with the position typecode
    #[deku(bits = "1")]
    pub nic_a: u8,

    #[deku(bits = "4")]
    #[serde(rename = "NACp")]
    pub nac_p: u8,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved0: u8,

    #[deku(bits = "2")]
    #[serde(rename = "SIL")]
    pub sil: u8,

    /// Track angle (false) or heading (true) in surface position messages
    #[deku(bits = "1")]
    pub tah_heading: bool,

    /// Heading reference direction: false true north, true magnetic north
    #[deku(bits = "1")]
    pub hrd_magnetic: bool,

    /// SIL probability basis: false per hour, true per sample
    #[deku(bits = "1")]
    #[serde(skip)]
    pub sil_supplement: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub reserved1: u8,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct CapabilityClassAirborne {
    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved0: u8,

    /// TCAS operational
    #[deku(bits = "1")]
    #[serde(rename = "ACAS")]
    pub acas: bool,

    /// Cockpit display of traffic information
    #[deku(bits = "1")]
    #[serde(rename = "CDTI")]
    pub cdti: bool,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved1: u8,

    /// Air-referenced velocity report capability
    #[deku(bits = "1")]
    #[serde(rename = "ARV")]
    pub arv: bool,

    /// Target state report capability
    #[deku(bits = "1")]
    #[serde(rename = "TS")]
    pub ts: bool,

    /// Trajectory change report capability
    #[deku(bits = "2")]
    #[deku(pad_bits_after = "6")]
    #[serde(rename = "TC")]
    pub tc: u8,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct CapabilityClassSurface {
    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved0: u8,

    /// Position offset applied
    #[deku(bits = "1")]
    pub poa: bool,

    /// Aircraft has 1090ES receive capability
    #[deku(bits = "1")]
    #[serde(rename = "1090ES")]
    pub es1090: bool,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved1: u8,

    /// Class B2 transmit power less than 70 W
    #[deku(bits = "1")]
    pub b2_low: bool,

    /// Aircraft has UAT receive capability
    #[deku(bits = "1")]
    #[serde(rename = "UATin")]
    pub uat_in: bool,

    #[deku(bits = "3")]
    #[serde(rename = "NACv")]
    pub nac_v: u8,

    /// NIC supplement C, used for surface containment radius
    #[deku(bits = "1")]
    pub nic_c: u8,
}

/// Operational mode field, shared between airborne and surface variants.
/// In surface messages the trailing byte carries the GPS antenna offset.
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct OperationalMode {
    #[deku(bits = "2")]
    #[serde(skip)]
    pub format: u8,

    /// TCAS resolution advisory active
    #[deku(bits = "1")]
    pub tcas_ra_active: bool,

    /// IDENT switch active
    #[deku(bits = "1")]
    pub ident: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub reserved: u8,

    /// Single antenna flag
    #[deku(bits = "1")]
    pub single_antenna: bool,

    /// System Design Assurance
    #[deku(bits = "2")]
    #[serde(rename = "SDA")]
    pub sda: u8,

    /// Reserved airborne; GPS antenna offset in surface messages
    pub gps_antenna_offset: u8,
}

impl OperationStatus {
    pub fn version(&self) -> u8 {
        match self {
            Self::Airborne(st) => st.version,
            Self::Surface(st) => st.version,
            Self::Reserved(..) => 0,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Operational status (BDS 6,5)")?;
        match self {
            Self::Airborne(st) => {
                writeln!(f, "  Version:       {}", st.version)?;
                writeln!(f, "  NACp:          {}", st.nac_p)?;
                writeln!(f, "  SIL:           {}", st.sil)?;
            }
            Self::Surface(st) => {
                writeln!(f, "  Version:       {}", st.version)?;
                writeln!(f, "  NACp:          {}", st.nac_p)?;
                writeln!(f, "  L/W code:      {}", st.lw_code)?;
            }
            Self::Reserved(..) => {}
        }
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
    fn test_operation_status_airborne() {
        let bytes = hex!("8dacc040f8210002004ab8569c35");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS65(OperationStatus::Airborne(st)) = adsb.message else {
            unreachable!()
        };
        assert_eq!(st.version, 2);
        assert_eq!(st.nic_a, 0);
        assert_eq!(st.nac_p, 10);
        assert_eq!(st.gva, 2);
        assert_eq!(st.sil, 3);
        assert_eq!(st.nic_baro, 1);
        assert!(!st.hrd_magnetic);
        assert!(st.capability_class.acas);
        assert!(st.capability_class.ts);
        assert!(!st.capability_class.arv);
        assert_eq!(st.operational_mode.sda, 2);
    }
}
