use crate::decode::{getbit, getbits};
use serde::Serialize;

/**
 * ## Data Link Capability Report (BDS 1,0)
 *
 * Fixed register identifier 0x10 in the first byte, a handful of capability
 * bits afterwards. Scored as a Comm-B hypothesis on the identifier plus the
 * reserved bits being zero.
 */
#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone)]
#[serde(rename = "10")]
pub struct DataLinkCapability {
    /// Continuation flag, further capability registers follow
    pub continuation: bool,
    /// Overlay command capability (DF20/21 register addressing)
    pub ovc: bool,
    /// ACAS operational
    pub acas_operational: bool,
    /// Mode S subnetwork version
    pub mode_s_version: u8,
    /// Transponder enhanced protocol indicator (level 5)
    pub enhanced_protocol: bool,
    /// Mode S specific services capability
    pub specific_services: bool,
    /// Aircraft identification capability
    pub ident_capability: bool,
}

pub fn score(mb: &[u8; 7]) -> i32 {
    // BDS identifier
    if mb[0] != 0x10 {
        return 0;
    }

    // reserved bits
    if getbits(mb, 10, 14) != 0 {
        return 0;
    }

    56
}

pub fn decode(mb: &[u8; 7]) -> DataLinkCapability {
    DataLinkCapability {
        continuation: getbit(mb, 9) != 0,
        ovc: getbit(mb, 15) != 0,
        acas_operational: getbit(mb, 16) != 0,
        mode_s_version: getbits(mb, 17, 23) as u8,
        enhanced_protocol: getbit(mb, 24) != 0,
        specific_services: getbit(mb, 25) != 0,
        ident_capability: getbit(mb, 33) != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_identifier() {
        let mb = [0x10, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(score(&mb) > 0);

        let mb = [0x20, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(score(&mb), 0);

        // reserved bits set
        let mb = [0x10, 0x43, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(score(&mb), 0);
    }
}
