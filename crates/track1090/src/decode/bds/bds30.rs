use crate::decode::{getbit, getbits};
use crate::filter::IcaoFilter;
use serde::Serialize;

/**
 * ## ACAS Resolution Advisory (BDS 3,0)
 *
 * Active resolution advisories, complements and the threat identity.
 * The same payload layout travels in the MV field of DF16 replies.
 */
#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone)]
#[serde(rename = "30")]
pub struct AcasResolutionAdvisory {
    /// Active resolution advisories, 14 bits
    pub ara: u16,
    /// Resolution advisory complements
    pub rac: u8,
    /// RA terminated
    pub rat: bool,
    /// Multiple threat encounter
    pub mte: bool,
    /// Threat type indicator
    pub tti: u8,
    /// Threat ICAO address when tti == 1
    pub threat_addr: Option<u32>,
}

/// Plausibility of an ACAS RA payload: complementary up/down and left/right
/// bits may not both be set, the threat-type indicator constrains the
/// trailing bits, and a TTI=1 threat address should belong to an aircraft
/// heard recently. The filter is only consulted on the Comm-B path
/// (`df16 = false`).
pub fn acas_ra_valid(mb: &[u8; 7], df16: bool, filter: Option<&IcaoFilter>) -> bool {
    let ara = getbit(mb, 9) != 0;
    let rat = getbit(mb, 27) != 0;
    let mte = getbit(mb, 28) != 0;

    // not an RA if none of the bits are set
    if !ara && !rat && !mte {
        return false;
    }

    if getbits(mb, 9, 28) == 0 {
        return false;
    }
    if getbit(mb, 23) != 0 && getbit(mb, 24) != 0 {
        return false; // both "above" and "below"
    }
    if getbit(mb, 25) != 0 && getbit(mb, 26) != 0 {
        return false; // both "left" and "right"
    }

    if df16 {
        // bits 29 to 56 are reserved in the MV field
        return getbits(mb, 29, 56) == 0;
    }

    // left/right is unused outside DF16, require zero
    if getbit(mb, 25) != 0 || getbit(mb, 26) != 0 {
        return false;
    }

    match getbits(mb, 29, 30) {
        // no identity data: the rest must be zero
        0 => getbits(mb, 31, 56) == 0,
        // 24-bit Mode S threat address, trailing two bits zero
        1 => {
            if getbits(mb, 55, 56) != 0 {
                return false;
            }
            filter.is_some_and(|f| f.test(getbits(mb, 31, 54)))
        }
        // altitude, range and bearing: hard to tell apart from garbage
        2 => false,
        _ => false,
    }
}

pub fn score(mb: &[u8; 7], filter: &IcaoFilter) -> i32 {
    // BDS identifier
    if mb[0] != 0x30 {
        return 0;
    }

    if !acas_ra_valid(mb, false, Some(filter)) {
        return 0;
    }

    56
}

pub fn decode(mb: &[u8; 7]) -> AcasResolutionAdvisory {
    let tti = getbits(mb, 29, 30) as u8;
    AcasResolutionAdvisory {
        ara: getbits(mb, 9, 22) as u16,
        rac: getbits(mb, 23, 26) as u8,
        rat: getbit(mb, 27) != 0,
        mte: getbit(mb, 28) != 0,
        tti,
        threat_addr: (tti == 1).then(|| getbits(mb, 31, 54)),
    }
}
