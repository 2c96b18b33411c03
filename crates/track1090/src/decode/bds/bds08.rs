use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/// Valid characters of the AIS charset used for callsigns
pub const AIS_CHARSET: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/**
 * ## Aircraft Identification and Category (BDS 0,8)
 *
 * Broadcasts the callsign and the wake vortex category of the aircraft.
 *
 * | TC  | CA  | C1  | C2  | C3  | C4  | C5  | C6  | C7  | C8  |
 * | --- | --- | --- | --- | --- | --- | --- | --- | --- | --- |
 * | 5   | 3   | 6   | 6   | 6   | 6   | 6   | 6   | 6   | 6   |
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Clone)]
pub struct AircraftIdentification {
    /// The typecode (between 1 and 4)
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    /// The category (aircraft by decreasing weight class for tc=4)
    #[deku(bits = "3")]
    #[serde(skip)]
    pub ca: u8,

    /// Callsign, eight AIS-charset characters, space padded
    #[deku(reader = "read_callsign(deku::reader)")]
    pub callsign: String,
}

impl AircraftIdentification {
    /// Category encoded as a single hex byte A0-D7 (0xA0 for tc=4 ca=0)
    pub fn category(&self) -> u8 {
        ((0x0e - self.tc) << 4) | self.ca
    }

    /// True when every character is one the AIS charset can legitimately
    /// produce for an identification (letters, digits, space)
    pub fn callsign_valid(&self) -> bool {
        self.callsign
            .bytes()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == b' ')
    }
}

fn read_callsign<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
    reader: &mut Reader<R>,
) -> Result<String, DekuError> {
    let mut callsign = String::with_capacity(8);
    for _ in 0..8 {
        let c = u8::from_reader_with_ctx(
            reader,
            (deku::ctx::Endian::Big, deku::ctx::BitSize(6)),
        )?;
        callsign.push(AIS_CHARSET[c as usize] as char);
    }
    Ok(callsign)
}

impl fmt::Display for AircraftIdentification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Aircraft identification (BDS 0,8)")?;
        writeln!(f, "  Callsign:      {}", self.callsign)?;
        writeln!(f, "  Category:      {:02X}", self.category())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::adsb::ME;
    use crate::decode::{Message, DF};
    use hexlit::hex;

    #[test]
    fn test_callsign() {
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        let msg = Message::from_frame(&bytes).unwrap();
        let DF::ExtendedSquitterADSB(adsb) = msg.df else {
            unreachable!()
        };
        let ME::BDS08(ident) = adsb.message else {
            unreachable!()
        };
        assert_eq!(ident.callsign, "EZY85MH ");
        assert!(ident.callsign_valid());
        assert_eq!(ident.tc, 4);
        assert_eq!(ident.category(), 0xa0);
    }
}
