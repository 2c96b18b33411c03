use crate::decode::{getbit, getbits};
use serde::Serialize;

/**
 * ## Heading and Speed Report (BDS 6,0)
 *
 * Magnetic heading, IAS, Mach and the two vertical rates. Barometric and
 * inertial rates are cross-checked within 2000 ft/min.
 */
#[derive(Debug, PartialEq, Serialize, Copy, Clone)]
#[serde(rename = "60")]
pub struct HeadingSpeedReport {
    /// Magnetic heading, degrees
    pub mag_heading: Option<f32>,
    /// Indicated airspeed, knots
    pub ias: Option<u16>,
    /// Mach number
    pub mach: Option<f32>,
    /// Barometric altitude rate, ft/min
    pub baro_rate: Option<i32>,
    /// Inertial vertical velocity, ft/min
    pub inertial_rate: Option<i32>,
}

pub fn score(mb: &[u8; 7]) -> i32 {
    let heading_valid = getbit(mb, 1) != 0;
    let heading_sign = getbit(mb, 2) != 0;
    let heading_raw = getbits(mb, 3, 12);

    let ias_valid = getbit(mb, 13) != 0;
    let ias_raw = getbits(mb, 14, 23);

    let mach_valid = getbit(mb, 24) != 0;
    let mach_raw = getbits(mb, 25, 34);

    let baro_rate_valid = getbit(mb, 35) != 0;
    let baro_rate_sign = getbit(mb, 36) != 0;
    let baro_rate_raw = getbits(mb, 37, 45);

    let inertial_rate_valid = getbit(mb, 46) != 0;
    let inertial_rate_sign = getbit(mb, 47) != 0;
    let inertial_rate_raw = getbits(mb, 48, 56);

    if !heading_valid || !ias_valid || !mach_valid
        || (!baro_rate_valid && !inertial_rate_valid)
    {
        return 0;
    }

    let mut score = 12; // heading always plausible once the status bit is set
    let _ = heading_sign;
    let _ = heading_raw;

    let ias = ias_raw;
    if ias_raw != 0 {
        if (50..=700).contains(&ias) {
            score += 11;
        } else {
            return 0;
        }
    } else {
        score += 1;
    }

    if mach_raw != 0 {
        let mach = mach_raw as f32 * 2.048 / 512.0;
        if (0.1..=0.9).contains(&mach) {
            score += 11;
        } else {
            return 0;
        }
    } else {
        score += 1;
    }

    let mut baro_rate = 0;
    if baro_rate_valid {
        baro_rate = baro_rate_raw as i32 * 32;
        if baro_rate_sign {
            baro_rate -= 16384;
        }
        if (-6000..=6000).contains(&baro_rate) {
            score += 11;
        } else {
            return 0;
        }
    } else if baro_rate_raw == 0 && !baro_rate_sign {
        score += 1;
    } else {
        return 0;
    }

    let mut inertial_rate = 0;
    if inertial_rate_valid {
        inertial_rate = inertial_rate_raw as i32 * 32;
        if inertial_rate_sign {
            inertial_rate -= 16384;
        }
        if (-6000..=6000).contains(&inertial_rate) {
            score += 11;
        } else {
            return 0;
        }
    } else if inertial_rate_raw == 0 && !inertial_rate_sign {
        score += 1;
    } else {
        return 0;
    }

    // the two vertical rates measure the same thing
    if baro_rate_valid && inertial_rate_valid && (baro_rate - inertial_rate).abs() > 2000 {
        score -= 12;
    }

    score
}

pub fn decode(mb: &[u8; 7]) -> HeadingSpeedReport {
    let heading_valid = getbit(mb, 1) != 0;
    let heading_sign = getbit(mb, 2) != 0;
    let ias_valid = getbit(mb, 13) != 0;
    let mach_valid = getbit(mb, 24) != 0;
    let baro_rate_valid = getbit(mb, 35) != 0;
    let baro_rate_sign = getbit(mb, 36) != 0;
    let inertial_rate_valid = getbit(mb, 46) != 0;
    let inertial_rate_sign = getbit(mb, 47) != 0;

    HeadingSpeedReport {
        mag_heading: heading_valid.then(|| {
            let mut heading = getbits(mb, 3, 12) as f32 * 90.0 / 512.0;
            if heading_sign {
                heading += 180.0;
            }
            heading
        }),
        ias: ias_valid.then(|| getbits(mb, 14, 23) as u16),
        mach: mach_valid.then(|| getbits(mb, 25, 34) as f32 * 2.048 / 512.0),
        baro_rate: baro_rate_valid.then(|| {
            let mut rate = getbits(mb, 37, 45) as i32 * 32;
            if baro_rate_sign {
                rate -= 16384;
            }
            rate
        }),
        inertial_rate: inertial_rate_valid.then(|| {
            let mut rate = getbits(mb, 48, 56) as i32 * 32;
            if inertial_rate_sign {
                rate -= 16384;
            }
            rate
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hexlit::hex;

    #[test]
    fn test_valid_bds60() {
        // DF21 frame carrying both BDS 5,0 and 6,0 plausible payloads;
        // checked here against the 6,0 reading
        let frame = hex!("A8001EBCFFFB23286004A73F6A5B");
        let mb: [u8; 7] = frame[4..11].try_into().unwrap();
        assert!(score(&mb) > 0);
    }

    #[test]
    fn test_rate_mismatch_penalty() {
        // heading 180°, ias 250 kt, mach 0.6, baro +2016, inertial -2016
        let mut mb = [0u8; 7];
        mb[0] = 0b11000000; // heading valid, sign set, raw 0
        mb[1] = 0b00001001; // ias valid, ias 250 = 0011111010
        mb[2] = 0b11110101; // ias cont., mach valid (bit 24)
        mb[3] = 0b00100101; // mach raw 150 -> 0.6
        mb[4] = 0b10100001; // baro_rate_valid, raw 63 -> 2016 ft/min
        mb[5] = 0b11111111; // inertial valid, sign, raw 449 -> -2016
        mb[6] = 0b11000001;

        let baseline = score(&mb);
        assert!(baseline > 0);
        let report = decode(&mb);
        assert_eq!(report.baro_rate, Some(2016));
        assert_eq!(report.inertial_rate, Some(-2016));
        assert_relative_eq!(report.mag_heading.unwrap(), 180.0, max_relative = 1e-3);
        // 4032 ft/min apart: the cross-check penalty applies
        assert_eq!(baseline, 12 + 11 + 11 + 11 + 11 - 12);
    }
}
