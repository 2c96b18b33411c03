use deku::prelude::*;
use libm::{fabs, floor};
use serde::{Deserialize, Serialize};
use std::fmt;

/**
 * Positions are encoded in Compact Position Reporting (CPR) format: two
 * 17-bit numbers, alternated on even and odd frames, which trade global
 * ambiguity against local accuracy.
 *
 * Decoding comes in two shapes:
 *
 *  - globally unambiguous decoding, combining a recent even/odd pair;
 *  - locally unambiguous decoding, using one frame plus a reference
 *    position known to be within half a zone of the true position.
 *
 * Surface positions use 90° zones instead of 360°, so the global surface
 * variant additionally needs a reference to select among four solutions.
 */

/// A flag to qualify a CPR position as odd or even
#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone, Hash)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "1")]
#[serde(rename_all = "snake_case")]
pub enum CPRFormat {
    Even = 0,
    Odd = 1,
}

impl fmt::Display for CPRFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Even => "even",
                Self::Odd => "odd",
            }
        )
    }
}

/// The kind of CPR encoding a message used. Halves of a global pair must
/// agree on the kind.
#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CprType {
    #[default]
    Airborne,
    Surface,
    /// Coarse TIS-B airborne format, 12-bit values upscaled to 17
    Coarse,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Copy)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Why a CPR decode did not produce a position
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CprError {
    /// Not enough input or a zone boundary was crossed; harmless, retry
    /// with the next frame
    Skipped,
    /// The pair decodes to something implausible; the stored halves are
    /// poisoned
    BadData,
}

/// NZ, the number of latitude zones between the equator and a pole
const NZ: f64 = 15.0;

/// CPR lat and lon values are encoded on 17 bits
const CPR_MAX: f64 = 131_072.0;

const D_LAT_EVEN: f64 = 360.0 / (4.0 * NZ);
const D_LAT_ODD: f64 = 360.0 / (4.0 * NZ - 1.0);

/// Given a latitude, the number of longitude zones between 1 and 59.
/// Precomputed table from 1090-WP-9-14.
#[rustfmt::skip]
pub fn nl(lat: f64) -> u64 {
    let mut lat = lat;
    if lat < 0.0 { lat = -lat; }
    if lat < 29.911_356_86 {
        if lat < 10.470_471_30 { return 59; }
        if lat < 14.828_174_37 { return 58; }
        if lat < 18.186_263_57 { return 57; }
        if lat < 21.029_394_93 { return 56; }
        if lat < 23.545_044_87 { return 55; }
        if lat < 25.829_247_07 { return 54; }
        if lat < 27.938_987_10 { return 53; }
        return 52;
    }
    if lat < 44.194_549_51 {
        if lat < 31.772_097_08 { return 51; }
        if lat < 33.539_934_36 { return 50; }
        if lat < 35.228_995_98 { return 49; }
        if lat < 36.850_251_08 { return 48; }
        if lat < 38.412_418_92 { return 47; }
        if lat < 39.922_566_84 { return 46; }
        if lat < 41.386_518_32 { return 45; }
        if lat < 42.809_140_12 { return 44; }
        return 43;
    }
    if lat < 59.954_592_77 {
        if lat < 45.546_267_23 { return 42; }
        if lat < 46.867_332_52 { return 41; }
        if lat < 48.160_391_28 { return 40; }
        if lat < 49.427_764_39 { return 39; }
        if lat < 50.671_501_66 { return 38; }
        if lat < 51.893_424_69 { return 37; }
        if lat < 53.095_161_53 { return 36; }
        if lat < 54.278_174_72 { return 35; }
        if lat < 55.443_784_44 { return 34; }
        if lat < 56.593_187_56 { return 33; }
        if lat < 57.727_473_54 { return 32; }
        if lat < 58.847_637_76 { return 31; }
        return 30;
    }
    if lat < 61.049_177_74 { return 29; }
    if lat < 62.132_166_59 { return 28; }
    if lat < 63.204_274_79 { return 27; }
    if lat < 64.266_165_23 { return 26; }
    if lat < 65.318_453_10 { return 25; }
    if lat < 66.361_710_08 { return 24; }
    if lat < 67.396_467_74 { return 23; }
    if lat < 68.423_220_22 { return 22; }
    if lat < 69.442_426_31 { return 21; }
    if lat < 70.454_510_75 { return 20; }
    if lat < 71.459_864_73 { return 19; }
    if lat < 72.458_845_45 { return 18; }
    if lat < 73.451_774_42 { return 17; }
    if lat < 74.438_934_16 { return 16; }
    if lat < 75.420_562_57 { return 15; }
    if lat < 76.396_843_91 { return 14; }
    if lat < 77.367_894_61 { return 13; }
    if lat < 78.333_740_83 { return 12; }
    if lat < 79.294_282_25 { return 11; }
    if lat < 80.249_232_13 { return 10; }
    if lat < 81.198_013_49 { return 9; }
    if lat < 82.139_569_81 { return 8; }
    if lat < 83.071_994_45 { return 7; }
    if lat < 83.991_735_63 { return 6; }
    if lat < 84.891_661_91 { return 5; }
    if lat < 85.755_416_21 { return 4; }
    if lat < 86.535_369_98 { return 3; }
    if lat < 87.000_000_00 { return 2; }
    1
}

// The sign of % in Rust matches the dividend; CPR needs the positive branch
fn modulo(a: f64, b: f64) -> f64 {
    let res = a % b;
    if res < 0.0 {
        res + fabs(b)
    } else {
        res
    }
}

/// Decode a global airborne position from an even/odd pair. `fflag` selects
/// which half provides the output position (the one received last).
pub fn decode_global_airborne(
    even: (u32, u32),
    odd: (u32, u32),
    fflag: CPRFormat,
) -> Result<Position, CprError> {
    let (lat0, lon0) = (f64::from(even.0), f64::from(even.1));
    let (lat1, lon1) = (f64::from(odd.0), f64::from(odd.1));

    // latitude index
    let j = floor((59.0 * lat0 - 60.0 * lat1) / CPR_MAX + 0.5);

    let mut rlat0 = D_LAT_EVEN * (modulo(j, 60.0) + lat0 / CPR_MAX);
    let mut rlat1 = D_LAT_ODD * (modulo(j, 59.0) + lat1 / CPR_MAX);

    if rlat0 >= 270.0 {
        rlat0 -= 360.0;
    }
    if rlat1 >= 270.0 {
        rlat1 -= 360.0;
    }

    if !(-90.0..=90.0).contains(&rlat0) || !(-90.0..=90.0).contains(&rlat1) {
        return Err(CprError::BadData);
    }
    if nl(rlat0) != nl(rlat1) {
        // the two halves straddle a longitude zone boundary
        return Err(CprError::Skipped);
    }

    let (rlat, ni, m, c) = match fflag {
        CPRFormat::Odd => {
            let nl1 = nl(rlat1);
            let ni = (nl1 - 1).max(1) as f64;
            let m = floor((lon0 * (nl1 - 1) as f64 - lon1 * nl1 as f64) / CPR_MAX + 0.5);
            (rlat1, ni, m, lon1 / CPR_MAX)
        }
        CPRFormat::Even => {
            let nl0 = nl(rlat0);
            let ni = nl0.max(1) as f64;
            let m = floor((lon0 * (nl0 - 1) as f64 - lon1 * nl0 as f64) / CPR_MAX + 0.5);
            (rlat0, ni, m, lon0 / CPR_MAX)
        }
    };

    let mut rlon = (360.0 / ni) * (modulo(m, ni) + c);
    if rlon > 180.0 {
        rlon -= 360.0;
    }

    Ok(Position {
        latitude: rlat,
        longitude: rlon,
    })
}

/// Decode a global surface position. The 90° zones leave a four-fold
/// ambiguity, resolved towards the reference location.
pub fn decode_global_surface(
    reflat: f64,
    reflon: f64,
    even: (u32, u32),
    odd: (u32, u32),
    fflag: CPRFormat,
) -> Result<Position, CprError> {
    let (lat0, lon0) = (f64::from(even.0), f64::from(even.1));
    let (lat1, lon1) = (f64::from(odd.0), f64::from(odd.1));

    const D_LAT_EVEN_SURF: f64 = 90.0 / 60.0;
    const D_LAT_ODD_SURF: f64 = 90.0 / 59.0;

    let j = floor((59.0 * lat0 - 60.0 * lat1) / CPR_MAX + 0.5);

    let mut rlat0 = D_LAT_EVEN_SURF * (modulo(j, 60.0) + lat0 / CPR_MAX);
    let mut rlat1 = D_LAT_ODD_SURF * (modulo(j, 59.0) + lat1 / CPR_MAX);

    // Pick the hemisphere closest to the reference location; no valid
    // message encodes a latitude in -180..-90 or 90..180.
    if rlat0 - reflat > 45.0 {
        rlat0 -= 90.0;
    }
    if rlat1 - reflat > 45.0 {
        rlat1 -= 90.0;
    }

    if !(-90.0..=90.0).contains(&rlat0) || !(-90.0..=90.0).contains(&rlat1) {
        return Err(CprError::BadData);
    }
    if nl(rlat0) != nl(rlat1) {
        return Err(CprError::Skipped);
    }

    let (rlat, ni, m, c) = match fflag {
        CPRFormat::Odd => {
            let nl1 = nl(rlat1);
            let ni = (nl1 - 1).max(1) as f64;
            let m = floor((lon0 * (nl1 - 1) as f64 - lon1 * nl1 as f64) / CPR_MAX + 0.5);
            (rlat1, ni, m, lon1 / CPR_MAX)
        }
        CPRFormat::Even => {
            let nl0 = nl(rlat0);
            let ni = nl0.max(1) as f64;
            let m = floor((lon0 * (nl0 - 1) as f64 - lon1 * nl0 as f64) / CPR_MAX + 0.5);
            (rlat0, ni, m, lon0 / CPR_MAX)
        }
    };

    let mut rlon = (90.0 / ni) * (modulo(m, ni) + c);

    // All four longitude quadrants are valid; walk towards the reference
    // in 90 degree steps.
    rlon += floor((reflon - rlon + 45.0) / 90.0) * 90.0;
    if rlon > 180.0 {
        rlon -= 360.0;
    }
    if rlon < -180.0 {
        rlon += 360.0;
    }

    Ok(Position {
        latitude: rlat,
        longitude: rlon,
    })
}

/// Decode a single CPR half against a reference position known to be within
/// half a cell. The caller is responsible for limiting the admissible range
/// around the reference.
pub fn decode_local(
    cpr_lat: u32,
    cpr_lon: u32,
    fflag: CPRFormat,
    surface: bool,
    reflat: f64,
    reflon: f64,
) -> Result<Position, CprError> {
    let fractional_lat = f64::from(cpr_lat) / CPR_MAX;
    let fractional_lon = f64::from(cpr_lon) / CPR_MAX;

    let full = if surface { 90.0 } else { 360.0 };
    let d_lat = match fflag {
        CPRFormat::Even => full / 60.0,
        CPRFormat::Odd => full / 59.0,
    };

    let j = floor(reflat / d_lat)
        + floor(0.5 + modulo(reflat, d_lat) / d_lat - fractional_lat);
    let rlat = d_lat * (j + fractional_lat);

    if !(-90.0..=90.0).contains(&rlat) {
        return Err(CprError::Skipped);
    }
    // more than half a cell away: the reference is not usable
    if fabs(rlat - reflat) > d_lat / 2.0 {
        return Err(CprError::Skipped);
    }

    let ni = match fflag {
        CPRFormat::Even => nl(rlat),
        CPRFormat::Odd => nl(rlat).saturating_sub(1),
    }
    .max(1);
    let d_lon = full / ni as f64;

    let m = floor(reflon / d_lon)
        + floor(0.5 + modulo(reflon, d_lon) / d_lon - fractional_lon);
    let rlon = d_lon * (m + fractional_lon);

    if fabs(rlon - reflon) > d_lon / 2.0 {
        return Err(CprError::Skipped);
    }

    Ok(Position {
        latitude: rlat,
        longitude: rlon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::adsb::ME;
    use crate::decode::{Message, DF};
    use approx::assert_relative_eq;
    use hexlit::hex;

    fn cpr_of(frame: &[u8]) -> (u32, u32, CPRFormat) {
        let msg = Message::from_frame(frame).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        match adsb.message {
            ME::BDS05(p) => (p.lat_cpr, p.lon_cpr, p.parity),
            ME::BDS06(p) => (p.lat_cpr, p.lon_cpr, p.parity),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_decode_airborne_global() {
        let (even_lat, even_lon, f1) = cpr_of(&hex!("8D40058B58C901375147EFD09357"));
        let (odd_lat, odd_lon, f2) = cpr_of(&hex!("8D40058B58C904A87F402D3B8C59"));
        assert_eq!(f1, CPRFormat::Even);
        assert_eq!(f2, CPRFormat::Odd);

        let pos = decode_global_airborne(
            (even_lat, even_lon),
            (odd_lat, odd_lon),
            CPRFormat::Odd,
        )
        .unwrap();

        assert_relative_eq!(pos.latitude, 49.81755, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 6.08442, max_relative = 1e-3);

        let (even_lat, even_lon, _) = cpr_of(&hex!("8d4d224f58bf003b221b34aa5b8d"));
        let (odd_lat, odd_lon, _) = cpr_of(&hex!("8d4d224f58bf07c2d41a9a353d70"));

        let pos = decode_global_airborne(
            (even_lat, even_lon),
            (odd_lat, odd_lon),
            CPRFormat::Odd,
        )
        .unwrap();

        assert_relative_eq!(pos.latitude, 42.346, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 0.4347, max_relative = 1e-3);
    }

    #[test]
    fn test_decode_airborne_local() {
        let (lat, lon, parity) = cpr_of(&hex!("8D40058B58C901375147EFD09357"));
        let pos = decode_local(lat, lon, parity, false, 49.0, 6.0).unwrap();
        assert_relative_eq!(pos.latitude, 49.82410, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 6.06785, max_relative = 1e-3);
    }

    #[test]
    fn test_decode_surface_local() {
        let (lat, lon, parity) = cpr_of(&hex!("8c4841753aab238733c8cd4020b1"));
        let pos = decode_local(lat, lon, parity, true, 51.99, 4.375).unwrap();
        assert_relative_eq!(pos.latitude, 52.32061, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 4.73473, max_relative = 1e-3);
    }

    #[test]
    fn test_local_far_reference_resolves_wrong_cell() {
        let (lat, lon, parity) = cpr_of(&hex!("8D40058B58C901375147EFD09357"));
        // a bogus reference resolves to the wrong cell nearby: only the
        // caller's range limit can reject this, never the cell math
        let pos = decode_local(lat, lon, parity, false, -33.0, 151.0).unwrap();
        assert!(fabs(pos.latitude - -33.0) <= 3.1);
        assert!(fabs(pos.latitude - 49.8) > 10.0);
    }

    // encoder used to drive the round-trip tests
    pub(crate) fn encode(lat: f64, lon: f64, fflag: CPRFormat, surface: bool) -> (u32, u32) {
        let full = if surface { 90.0 } else { 360.0 };
        let d_lat = match fflag {
            CPRFormat::Even => full / 60.0,
            CPRFormat::Odd => full / 59.0,
        };
        let yz = floor(CPR_MAX * modulo(lat, d_lat) / d_lat + 0.5);
        let rlat = d_lat * (yz / CPR_MAX + floor(lat / d_lat));

        let ni = match fflag {
            CPRFormat::Even => nl(rlat),
            CPRFormat::Odd => nl(rlat).saturating_sub(1),
        }
        .max(1);
        let d_lon = full / ni as f64;
        let xz = floor(CPR_MAX * modulo(lon, d_lon) / d_lon + 0.5);

        (
            (yz as u32) & 0x1ffff,
            (xz as u32) & 0x1ffff,
        )
    }

    #[test]
    fn test_global_roundtrip_grid() {
        for lat_i in -8..9 {
            for lon_i in -17..18 {
                let lat = lat_i as f64 * 10.0 + 0.3;
                let lon = lon_i as f64 * 10.0 + 0.7;

                let even = encode(lat, lon, CPRFormat::Even, false);
                let odd = encode(lat, lon, CPRFormat::Odd, false);

                let pos = decode_global_airborne(even, odd, CPRFormat::Odd)
                    .unwrap_or_else(|e| panic!("{lat},{lon}: {e:?}"));
                // 17 bit resolution: about 5.1 m in latitude
                assert_relative_eq!(pos.latitude, lat, epsilon = 1e-3);
                assert_relative_eq!(pos.longitude, lon, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_surface_roundtrip() {
        let lat = 52.32061;
        let lon = 4.73473;
        let even = encode(lat, lon, CPRFormat::Even, true);
        let odd = encode(lat, lon, CPRFormat::Odd, true);

        let pos = decode_global_surface(52.0, 4.3, even, odd, CPRFormat::Odd).unwrap();
        assert_relative_eq!(pos.latitude, lat, epsilon = 1e-4);
        assert_relative_eq!(pos.longitude, lon, epsilon = 1e-4);
    }
}
