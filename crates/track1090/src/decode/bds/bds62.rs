use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * ## Target State and Status (BDS 6,2 / TYPE=29, subtype 1)
 *
 * Selected altitude, barometric setting and autopilot modes.
 *
 * | TYPE | SUB | SILs | SRC | ALT | QNH | HDG | NACp | NICb | SIL | MODE bits | RES |
 * |------|-----|------|-----|-----|-----|-----|------|------|-----|-----------|-----|
 * | 5    | 2   | 1    | 1   | 11  | 9   | 1+9 | 4    | 1    | 2   | 8         | 2   |
 */
#[derive(Copy, Clone, Debug, Serialize, PartialEq, DekuRead)]
pub struct TargetStateAndStatus {
    /// Must be 1 for the DO-260B format
    #[deku(bits = "2")]
    #[serde(skip)]
    pub subtype: u8,

    /// SIL probability basis: false per hour, true per sample
    #[deku(bits = "1")]
    #[serde(skip)]
    pub sil_supplement: bool,

    /// MCP/FCU or FMS provided the selected altitude
    #[serde(rename = "source")]
    pub alt_source: AltSource,

    /// Selected altitude in feet, LSB 32 ft; None when unavailable
    #[deku(
        bits = "11",
        endian = "big",
        map = "|altitude: u16| -> Result<_, DekuError> {
            Ok(if altitude > 0 { Some((altitude - 1) * 32) } else { None })
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude: Option<u16>,

    /// Altimeter setting (QNH/QFE) in millibars; None when unavailable
    #[deku(
        bits = "9",
        endian = "big",
        map = "|qnh: u32| -> Result<_, DekuError> {
            if qnh == 0 { Ok(None) }
            else { Ok(Some(800.0 + ((qnh - 1) as f32) * 0.8)) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barometric_setting: Option<f32>,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub heading_status: bool,

    /// Selected heading (magnetic), LSB 180/256 degrees
    #[deku(
        bits = "9",
        endian = "big",
        map = "|heading: u16| -> Result<_, DekuError> {
            if *heading_status { Ok(Some(heading as f32 * 180.0 / 256.0)) }
            else { Ok(None) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_heading: Option<f32>,

    /// Navigation Accuracy Category, position
    #[deku(bits = "4")]
    #[serde(rename = "NACp")]
    pub nac_p: u8,

    /// Barometric altitude cross-checked against another source
    #[deku(bits = "1")]
    pub nic_baro: u8,

    /// Source Integrity Level
    #[deku(bits = "2")]
    #[serde(rename = "SIL")]
    pub sil: u8,

    /// The autopilot/VNAV/altitude-hold/approach/LNAV bits below are only
    /// meaningful when this status bit is set
    #[deku(bits = "1")]
    #[serde(skip)]
    pub mode_status: bool,

    #[deku(bits = "1")]
    pub autopilot: bool,

    #[deku(bits = "1")]
    pub vnav_mode: bool,

    #[deku(bits = "1")]
    pub alt_hold: bool,

    /// Reserved for ADS-R
    #[deku(bits = "1")]
    #[serde(skip)]
    pub imf: bool,

    #[deku(bits = "1")]
    pub approach_mode: bool,

    /// Valid regardless of mode_status
    #[deku(bits = "1")]
    pub tcas_operational: bool,

    #[deku(bits = "1")]
    pub lnav_mode: bool,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved: u8,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "1")]
#[serde(rename_all = "snake_case")]
pub enum AltSource {
    Mcp = 0,
    Fms = 1,
}

impl fmt::Display for TargetStateAndStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Target state and status (BDS 6,2)")?;
        if let Some(alt) = self.selected_altitude {
            writeln!(f, "  Selected alt:  {alt} ft ({:?})", self.alt_source)?;
        }
        if let Some(qnh) = self.barometric_setting {
            writeln!(f, "  QNH:           {qnh:.1} mbar")?;
        }
        if let Some(heading) = self.selected_heading {
            writeln!(f, "  Sel. heading:  {heading:.1}°")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::adsb::ME;
    use crate::decode::{Message, DF};
    use approx::assert_relative_eq;
    use hexlit::hex;

    #[test]
    fn test_target_state_and_status() {
        let bytes = hex!("8da08f94ea1b785e8f3c088ab467");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS62(tss) = adsb.message else {
            unreachable!()
        };
        assert_eq!(tss.subtype, 1);
        assert_eq!(tss.alt_source, AltSource::Mcp);
        assert_eq!(tss.selected_altitude, Some(14016));
        assert_relative_eq!(
            tss.barometric_setting.unwrap(),
            1012.8,
            max_relative = 1e-4
        );
        assert_relative_eq!(
            tss.selected_heading.unwrap(),
            229.9,
            max_relative = 1e-3
        );
        assert_eq!(tss.nac_p, 9);
        assert_eq!(tss.nic_baro, 1);
        assert_eq!(tss.sil, 3);
    }
}
