use crate::decode::{getbit, getbits};
use serde::Serialize;

/**
 * ## Selected Vertical Intention (BDS 4,0)
 *
 * MCP/FCU and FMS selected altitudes, the altimeter setting and the
 * autopilot mode bits. Scored on status-bit/value coherence and on the
 * altitudes landing in the plausible 1000-50000 ft band.
 */
#[derive(Debug, PartialEq, Serialize, Copy, Clone)]
#[serde(rename = "40")]
pub struct VerticalIntent {
    /// MCP/FCU selected altitude, feet
    pub mcp_altitude: Option<u32>,
    /// FMS selected altitude, feet
    pub fms_altitude: Option<u32>,
    /// Altimeter setting (QNH), millibars
    pub qnh: Option<f32>,
    /// Autopilot mode bits, when the status bit is set
    pub modes: Option<NavModes>,
    /// Source of the altitude used by automation
    pub altitude_source: AltitudeSource,
}

#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone, Default)]
pub struct NavModes {
    pub vnav: bool,
    pub alt_hold: bool,
    pub approach: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeSource {
    #[default]
    Invalid,
    Unknown,
    Aircraft,
    Mcp,
    Fms,
}

pub fn score(mb: &[u8; 7]) -> i32 {
    let mcp_valid = getbit(mb, 1) != 0;
    let mcp_raw = getbits(mb, 2, 13);
    let fms_valid = getbit(mb, 14) != 0;
    let fms_raw = getbits(mb, 15, 26);
    let baro_valid = getbit(mb, 27) != 0;
    let baro_raw = getbits(mb, 28, 39);
    let reserved_1 = getbits(mb, 40, 47);
    let mode_valid = getbit(mb, 48) != 0;
    let mode_raw = getbits(mb, 49, 51);
    let reserved_2 = getbits(mb, 52, 53);
    let source_valid = getbit(mb, 54) != 0;
    let source_raw = getbits(mb, 55, 56);

    if !mcp_valid && !fms_valid && !baro_valid && !mode_valid && !source_valid {
        return 0;
    }

    let mut score = 0;

    let mut mcp_alt = 0;
    if mcp_valid && mcp_raw != 0 {
        mcp_alt = mcp_raw * 16;
        if (1000..=50000).contains(&mcp_alt) {
            score += 13;
        } else {
            return 0; // unlikely altitude
        }
    } else if !mcp_valid && mcp_raw == 0 {
        score += 1;
    } else {
        return 0;
    }

    let mut fms_alt = 0;
    if fms_valid && fms_raw != 0 {
        fms_alt = fms_raw * 16;
        if (1000..=50000).contains(&fms_alt) {
            score += 13;
        } else {
            return 0; // unlikely altitude
        }
    } else if !fms_valid && fms_raw == 0 {
        score += 1;
    } else {
        return 0;
    }

    if baro_valid && baro_raw != 0 {
        let baro_setting = 800.0 + baro_raw as f32 * 0.1;
        if (900.0..=1100.0).contains(&baro_setting) {
            score += 13;
        } else {
            return 0; // unlikely pressure setting
        }
    } else if !baro_valid && baro_raw == 0 {
        score += 1;
    } else {
        return 0;
    }

    if reserved_1 != 0 {
        return 0;
    }

    if mode_valid {
        score += 4;
    } else if mode_raw == 0 {
        score += 1;
    } else {
        return 0;
    }

    if reserved_2 != 0 {
        return 0;
    }

    if source_valid {
        score += 3;
    } else if source_raw == 0 {
        score += 1;
    } else {
        return 0;
    }

    // small penalty for inconsistent data
    if mcp_valid && fms_valid && mcp_alt != fms_alt {
        score -= 4;
    }

    // selected altitudes are usually multiples of 500 ft
    if mcp_valid {
        let remainder = mcp_alt % 500;
        if !(remainder < 16 || remainder > 484) {
            score -= 4;
        }
    }
    if fms_valid {
        let remainder = fms_alt % 500;
        if !(remainder < 16 || remainder > 484) {
            score -= 4;
        }
    }

    score
}

pub fn decode(mb: &[u8; 7]) -> VerticalIntent {
    let mcp_valid = getbit(mb, 1) != 0;
    let fms_valid = getbit(mb, 14) != 0;
    let baro_valid = getbit(mb, 27) != 0;
    let mode_valid = getbit(mb, 48) != 0;
    let source_valid = getbit(mb, 54) != 0;

    let modes = mode_valid.then(|| {
        let raw = getbits(mb, 49, 51);
        NavModes {
            vnav: raw & 4 != 0,
            alt_hold: raw & 2 != 0,
            approach: raw & 1 != 0,
        }
    });

    let altitude_source = if source_valid {
        match getbits(mb, 55, 56) {
            0 => AltitudeSource::Unknown,
            1 => AltitudeSource::Aircraft,
            2 => AltitudeSource::Mcp,
            _ => AltitudeSource::Fms,
        }
    } else {
        AltitudeSource::Invalid
    };

    VerticalIntent {
        mcp_altitude: mcp_valid.then(|| getbits(mb, 2, 13) * 16),
        fms_altitude: fms_valid.then(|| getbits(mb, 15, 26) * 16),
        qnh: baro_valid.then(|| 800.0 + getbits(mb, 28, 39) as f32 * 0.1),
        modes,
        altitude_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FL350 selected on the MCP, 1013 mb: mcp_raw = 35008/16 = 2188,
    // baro_raw = (1013.2 - 800) * 10 = 2132
    fn sample() -> [u8; 7] {
        let mut mb = [0u8; 7];
        // mcp_valid + mcp_raw 2188 (0b100010001100)
        mb[0] = 0b11000100;
        mb[1] = 0b01100000;
        // baro_valid (bit 27) + baro_raw 2132 (0b100001010100) in bits 28-39
        mb[3] = 0b00110000;
        mb[4] = 0b10101000;
        mb
    }

    #[test]
    fn test_score_and_decode() {
        let mb = sample();
        assert!(score(&mb) > 0);
        let intent = decode(&mb);
        assert_eq!(intent.mcp_altitude, Some(35008));
        assert_eq!(intent.fms_altitude, None);
        let qnh = intent.qnh.unwrap();
        assert!((qnh - 1013.2).abs() < 0.01);
        assert_eq!(intent.altitude_source, AltitudeSource::Invalid);
    }

    #[test]
    fn test_unlikely_altitude_rejected() {
        let mut mb = [0u8; 7];
        // mcp_valid with raw value 1 -> 16 ft, implausible
        mb[0] = 0b10000000;
        mb[1] = 0b00001000;
        assert_eq!(score(&mb), 0);
    }
}
