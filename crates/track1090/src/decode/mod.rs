pub mod adsb;
pub mod bds;
pub mod commb;
pub mod cpr;
pub mod crc;

use adsb::{ADSB, ME};
use commb::CommB;
use crc::{ErrorTables, FixBits};
use deku::prelude::*;
use serde::ser::{Serialize, Serializer};
use std::fmt;

use crate::filter::IcaoFilter;

/**
 * DF stands for Downlink Format.
 *
 * A number between 0 and 24 encoding the type of the message, and whether it
 * is short (56 bits) or long (112 bits).
 *
 * |  [`DF`]  |  Name                               |  Section    |
 * | -------- | ----------------------------------- | ----------- |
 * | 0        | [`DF::ShortAirAirSurveillance`]     | 3.1.2.8.2   |
 * | 4        | [`DF::SurveillanceAltitudeReply`]   | 3.1.2.6.5   |
 * | 5        | [`DF::SurveillanceIdentityReply`]   | 3.1.2.6.7   |
 * | 11       | [`DF::AllCallReply`]                | 2.1.2.5.2.2 |
 * | 16       | [`DF::LongAirAirSurveillance`]      | 3.1.2.8.3   |
 * | 17       | [`DF::ExtendedSquitterADSB`]        | 3.1.2.8.6   |
 * | 18       | [`DF::ExtendedSquitterTisB`]        | 3.1.2.8.7   |
 * | 19       | [`DF::ExtendedSquitterMilitary`]    | 3.1.2.8.8   |
 * | 20       | [`DF::CommBAltitudeReply`]          | 3.1.2.6.6   |
 * | 21       | [`DF::CommBIdentityReply`]          | 3.1.2.6.8   |
 * | 24       | [`DF::CommDExtended`]               | 3.1.2.7.3   |
 */
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "5", ctx = "crc: u32")]
#[serde(tag = "DF")]
pub enum DF {
    /// DF=0: Short Air-Air Surveillance (3.1.2.8.2)
    #[deku(id = "0")]
    #[serde(rename = "DF0")]
    ShortAirAirSurveillance {
        /// Vertical status (airborne: 0, on ground: 1)
        #[deku(bits = "1")]
        vs: u8,
        /// Crosslink capability
        #[deku(bits = "1")]
        #[serde(skip)]
        cc: u8,
        #[deku(bits = "1")]
        #[serde(skip)]
        unused: u8,
        /// Sensitivity level, ACAS
        #[deku(bits = "3")]
        #[serde(skip)]
        sl: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        unused1: u8,
        /// Reply information
        #[deku(bits = "4")]
        #[serde(skip)]
        ri: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        unused2: u8,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// Address recovered from the parity overlay
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=4: Surveillance Altitude Reply (3.1.2.6.5)
    #[deku(id = "4")]
    #[serde(rename = "DF4")]
    SurveillanceAltitudeReply {
        /// Flight Status
        fs: FlightStatus,
        /// Downlink request, raw 5 bits
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        /// Utility message, raw 6 bits
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=5: Surveillance Identity Reply (3.1.2.6.7)
    #[deku(id = "5")]
    #[serde(rename = "DF5")]
    SurveillanceIdentityReply {
        /// Flight Status
        fs: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        /// Identity code (squawk)
        #[serde(rename = "squawk")]
        id: IdentityCode,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=11: All-call reply (2.1.2.5.2.2)
    #[deku(id = "11")]
    #[serde(rename = "DF11")]
    AllCallReply {
        /// Transponder capability
        capability: Capability,
        /// Address announced
        #[serde(rename = "icao24")]
        icao: ICAO,
        /// Parity/interrogator identifier
        #[serde(skip)]
        p_icao: ICAO,
    },

    /// DF=16: Long Air-Air Surveillance / ACAS (3.1.2.8.3)
    #[deku(id = "16")]
    #[serde(rename = "DF16")]
    LongAirAirSurveillance {
        /// Vertical status (airborne: 0, on ground: 1)
        #[deku(bits = "1")]
        vs: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved1: u8,
        /// Sensitivity level (inoperative: 0)
        #[deku(bits = "3")]
        sl: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved2: u8,
        /// Reply information
        #[deku(bits = "4")]
        ri: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved3: u8,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// Message, ACAS (56 bits, a register requested in UF=0)
        #[serde(skip)]
        mv: [u8; 7],
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=17: Extended Squitter ADS-B (3.1.2.8.6)
    #[deku(id = "17")]
    #[serde(rename = "ADSB")]
    ExtendedSquitterADSB(ADSB),

    /// DF=18: Extended Squitter Supplementary (3.1.2.8.7)
    ///
    /// Non-transponder ADS-B, ADS-R rebroadcast and TIS-B uplink traffic.
    #[deku(id = "18")]
    #[serde(rename = "DF18")]
    ExtendedSquitterTisB {
        /// Control field selecting the addressing scheme
        cf: ControlField,
        /// Parity/interrogator identifier
        #[serde(skip)]
        pi: ICAO,
    },

    /// DF=19: Extended Squitter Military Application (3.1.2.8.8)
    #[deku(id = "19")]
    #[serde(skip)]
    ExtendedSquitterMilitary {
        #[deku(bits = "3")]
        af: u8,
    },

    /// DF=20: Comm-B Altitude Reply (3.1.2.6.6)
    #[deku(id = "20")]
    #[serde(rename = "DF20")]
    CommBAltitudeReply {
        /// Flight Status
        fs: FlightStatus,
        /// Downlink request, raw; non-zero gates Comm-B decoding
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        /// Utility message, raw; non-zero gates Comm-B decoding
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// The 7 raw MB bytes, scored against the register decoders later
        #[serde(skip)]
        mb: [u8; 7],
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=21: Comm-B Identity Reply (3.1.2.6.8)
    #[deku(id = "21")]
    #[serde(rename = "DF21")]
    CommBIdentityReply {
        /// Flight Status
        fs: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        /// Identity code (squawk)
        #[serde(rename = "squawk")]
        id: IdentityCode,
        /// The 7 raw MB bytes, scored against the register decoders later
        #[serde(skip)]
        mb: [u8; 7],
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=24..31: Comm-D Extended Length Message (3.1.2.7.3)
    ///
    /// Only the first two bits of the DF field are meaningful here, so this
    /// variant re-reads the frame from the start (`id_pat` does not consume
    /// the matched bits).
    #[deku(id_pat = "24..=31")]
    #[serde(rename = "DF24")]
    CommDExtended {
        #[serde(skip)]
        df: u8,
        #[deku(bits = "1")]
        #[serde(skip)]
        spare: u8,
        /// Control, ELM
        #[serde(skip)]
        ke: KE,
        /// Number of D-segment
        #[deku(bits = "4")]
        nd: u8,
        /// Message, Comm-D, 80 bits
        #[serde(skip)]
        md: [u8; 10],
        /// Address/Parity
        #[serde(skip)]
        parity: ICAO,
    },
}

/// A decoded Mode S frame: the 24-bit syndrome and the DF payload.
#[derive(Debug, PartialEq, serde::Serialize, Clone)]
pub struct Message {
    /// CRC syndrome: 0 for a parity-correct DF17/18, the transponder
    /// address for address/parity downlink formats
    #[serde(skip)]
    pub crc: u32,

    /// The Downlink Format encoded in the first 5 bits
    #[serde(flatten)]
    pub df: DF,
}

impl Message {
    /// Parse a 7- or 14-byte frame. The CRC syndrome is computed first and
    /// threaded through the address/parity fields; DF17/18 frames with a
    /// non-zero syndrome are rejected (repair them first).
    pub fn from_frame(frame: &[u8]) -> Result<Message, DekuError> {
        let bits = match frame.len() {
            crc::SHORT_MSG_BYTES => crc::SHORT_MSG_BITS,
            crc::LONG_MSG_BYTES => crc::LONG_MSG_BITS,
            len => {
                return Err(DekuError::Parse(
                    format!("invalid frame length: {len} bytes").into(),
                ))
            }
        };

        let df = frame[0] >> 3;
        if frame_bits(df) != bits {
            return Err(DekuError::Parse(
                format!("frame length does not match DF{df}").into(),
            ));
        }

        let crc = crc::checksum(frame, bits);
        if (df == 17 || df == 18) && crc != 0 {
            return Err(DekuError::Assertion(
                format!("invalid CRC in extended squitter: {crc:06x}").into(),
            ));
        }

        let mut cursor = deku::no_std_io::Cursor::new(frame);
        let mut reader = Reader::new(&mut cursor);
        let df = DF::from_reader_with_ctx(&mut reader, crc)?;
        Ok(Message { crc, df })
    }

    /// The 24-bit address this message refers to, from the AA field or from
    /// the parity overlay.
    pub fn icao24(&self) -> Option<u32> {
        match &self.df {
            DF::ShortAirAirSurveillance { ap, .. }
            | DF::SurveillanceAltitudeReply { ap, .. }
            | DF::SurveillanceIdentityReply { ap, .. }
            | DF::LongAirAirSurveillance { ap, .. }
            | DF::CommBAltitudeReply { ap, .. }
            | DF::CommBIdentityReply { ap, .. } => Some(ap.0),
            DF::AllCallReply { icao, .. } => Some(icao.0),
            DF::ExtendedSquitterADSB(adsb) => Some(adsb.icao24.0),
            DF::ExtendedSquitterTisB { cf, .. } => Some(cf.aa.0),
            DF::CommDExtended { parity, .. } => Some(parity.0),
            DF::ExtendedSquitterMilitary { .. } => None,
        }
    }
}

/// Frame length implied by the DF field: DFs with bit 4 set are long.
pub fn frame_bits(df: u8) -> usize {
    if df & 0x10 != 0 {
        crc::LONG_MSG_BITS
    } else {
        crc::SHORT_MSG_BITS
    }
}

// Extract one bit from a message. The first bit (MSB of the first byte) is
// numbered 1, matching how the specs number them.
#[inline(always)]
pub(crate) fn getbit(data: &[u8], bitnum: u32) -> u32 {
    getbits(data, bitnum, bitnum)
}

// Extract bits firstbit..=lastbit (1-based, inclusive) from a message.
#[inline(always)]
pub(crate) fn getbits(data: &[u8], firstbit: u32, lastbit: u32) -> u32 {
    debug_assert!(firstbit <= lastbit);
    debug_assert!(lastbit - firstbit + 1 <= 32);

    let mut result: u64 = 0;
    for bitnum in firstbit..=lastbit {
        let bi = bitnum - 1;
        let byte = data[(bi >> 3) as usize];
        let bit = (byte >> (7 - (bi & 7))) & 1;
        result = (result << 1) | bit as u64;
    }
    result as u32
}

/// Where a message came from, ordered by trustworthiness. Field updates from
/// a lower source never displace fresh data from a higher one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, Default, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Invalid,
    /// Position guessed from receiver locations only
    Indirect,
    ModeAc,
    Sbs,
    Mlat,
    ModeS,
    /// ADS-C via satellite (JAERO), minutes old but trustworthy
    Jaero,
    /// Mode S with a CRC-verified address
    ModeSChecked,
    Tisb,
    Adsr,
    Adsb,
    /// Priority input, collapsed to ADS-B on acceptance
    Prio,
}

/// How the 24-bit address was obtained, best first. The tracker keeps the
/// highest-priority type it has seen recently.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, Default, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum AddrType {
    /// ADS-B with an ICAO address
    AdsbIcao,
    /// ADS-B from a non-transponder device, ICAO address
    AdsbIcaoNt,
    /// ADS-R rebroadcast, ICAO address
    AdsrIcao,
    /// TIS-B with an ICAO address
    TisbIcao,
    /// ADS-C (JAERO)
    Jaero,
    Mlat,
    /// Mode S address/parity
    ModeS,
    /// ADS-B with an anonymous/self-assigned address
    AdsbOther,
    /// ADS-R rebroadcast, anonymous address
    AdsrOther,
    /// TIS-B trackfile number
    TisbTrackfile,
    /// TIS-B, anonymous address
    TisbOther,
    /// Mode A/C
    ModeAc,
    Other,
    #[default]
    Unknown,
}

/// Frame rejection reasons, counted separately in the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    /// DF value the demodulator does not handle
    UnknownDf,
    /// CRC error that the syndrome tables cannot repair
    BadCrc,
    /// A parity-overlaid address that matches no recently seen aircraft
    UnknownIcao,
    /// Valid structure, unusable content
    Unparsed,
}

/// A decoded frame plus the provenance the tracker needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: Message,
    pub addr: u32,
    pub addrtype: AddrType,
    pub source: DataSource,
    pub corrected_bits: u8,
    /// Interrogator ID from a DF11 syndrome
    pub iid: u8,
    /// Comm-B register content for DF20/21
    pub commb: Option<CommB>,
}

/// Score how plausible this Mode S frame looks. The more positive, the more
/// reliable the frame is.
///
/// - 1000: DF0/4/5/16/24 with a CRC-derived address matching a known aircraft
/// - 1800: DF17/18 with good CRC and a known address (1400 unknown);
///   divided by (errors+1) when error-corrected
/// - 1600: DF11, IID=0, good CRC, known address (750 unknown);
///   1000 for IID≠0 with a known address
/// - 1000: DF20/21 with a known CRC-derived address, 500 on a low-16-bit
///   (Data/Parity overlay) match
/// - -1: might be valid but the address matches no known aircraft
/// - -2: bad frame or unrepairable CRC error
pub fn score_frame(frame: &[u8], filter: &IcaoFilter, tables: &ErrorTables) -> i32 {
    let df = frame[0] >> 3;
    let bits = frame_bits(df);
    if bits / 8 > frame.len() {
        return -2;
    }

    let syndrome = crc::checksum(frame, bits);

    match df {
        0 | 4 | 5 | 16 | 24..=31 => {
            if filter.test(syndrome) {
                1000
            } else {
                -1
            }
        }

        11 => {
            let iid = syndrome & 0x7f;
            let masked = syndrome & 0xffff80;
            let Some(info) = tables.diagnose(masked, bits) else {
                return -2;
            };
            // two-bit fixes are ambiguous in DF11, never apply them
            if info.error_count() > 1 {
                return -2;
            }

            let mut addr = getbits(frame, 9, 32);
            for &bit in info.bits() {
                if (8..32).contains(&(bit as u32)) {
                    addr ^= 1 << (31 - bit as u32);
                }
            }

            let known = filter.test(addr);
            let divisor = info.error_count() as i32 + 1;
            match (iid, known) {
                (0, true) => 1600 / divisor,
                (0, false) => 750 / divisor,
                (_, true) => 1000 / divisor,
                (_, false) => -1,
            }
        }

        17 | 18 => {
            let Some(info) = tables.diagnose(syndrome, bits) else {
                return -2;
            };

            let mut addr = getbits(frame, 9, 32);
            for &bit in info.bits() {
                if (8..32).contains(&(bit as u32)) {
                    addr ^= 1 << (31 - bit as u32);
                }
            }

            let base = if filter.test(addr) { 1800 } else { 1400 };
            base / (info.error_count() as i32 + 1)
        }

        20 | 21 => {
            if filter.test(syndrome) {
                1000
            } else if filter.test_fuzzy(syndrome & 0xffff).is_some() {
                // Data/Parity overlay in use, only the low 16 bits match
                500
            } else {
                -1
            }
        }

        _ => -2,
    }
}

/// Validate, repair and decode one frame, resolving the address and tagging
/// the provenance. The frame is modified in place when bits are corrected.
pub fn decode_frame(
    frame: &mut [u8],
    filter: &mut IcaoFilter,
    tables: &ErrorTables,
) -> Result<Decoded, Reject> {
    let df = frame[0] >> 3;
    let bits = frame_bits(df);
    if bits / 8 != frame.len() {
        return Err(Reject::UnknownDf);
    }

    let mut syndrome = crc::checksum(frame, bits);
    let mut corrected_bits = 0u8;
    let mut iid = 0u8;

    let (addr, addrtype, source) = match df {
        0 | 4 | 5 | 16 => {
            if !filter.test(syndrome) {
                return Err(Reject::UnknownIcao);
            }
            (syndrome, AddrType::ModeS, DataSource::ModeS)
        }

        11 => {
            let masked = syndrome & 0xffff80;
            if masked != 0 {
                let info = tables.diagnose(masked, bits).ok_or(Reject::BadCrc)?;
                if info.error_count() > 1 {
                    return Err(Reject::BadCrc);
                }
                crc::apply_fix(frame, &info);
                corrected_bits = info.error_count() as u8;
                syndrome = crc::checksum(frame, bits);
            }
            iid = (syndrome & 0x7f) as u8;

            let addr = getbits(frame, 9, 32);
            let source = if iid == 0 {
                DataSource::ModeSChecked
            } else {
                DataSource::ModeS
            };
            // only seed the filter from uncorrected, unambiguous all-calls
            if corrected_bits == 0 && (iid == 0 || filter.test(addr)) {
                filter.add(addr);
            }
            (addr, AddrType::ModeS, source)
        }

        17 => {
            if syndrome != 0 {
                let info = tables.diagnose(syndrome, bits).ok_or(Reject::BadCrc)?;
                crc::apply_fix(frame, &info);
                corrected_bits = info.error_count() as u8;
                syndrome = crc::checksum(frame, bits);
                if syndrome != 0 {
                    return Err(Reject::BadCrc);
                }
            }
            let addr = getbits(frame, 9, 32);
            if corrected_bits == 0 {
                filter.add(addr);
            }
            (addr, AddrType::AdsbIcao, DataSource::Adsb)
        }

        18 => {
            if syndrome != 0 {
                let info = tables.diagnose(syndrome, bits).ok_or(Reject::BadCrc)?;
                crc::apply_fix(frame, &info);
                corrected_bits = info.error_count() as u8;
                syndrome = crc::checksum(frame, bits);
                if syndrome != 0 {
                    return Err(Reject::BadCrc);
                }
            }
            let addr = getbits(frame, 9, 32);
            let (addrtype, source) = match frame[0] & 7 {
                0 => (AddrType::AdsbIcaoNt, DataSource::Adsb),
                1 => (AddrType::AdsbOther, DataSource::Adsb),
                2 => (AddrType::TisbIcao, DataSource::Tisb),
                5 => (AddrType::TisbOther, DataSource::Tisb),
                6 => (AddrType::AdsrIcao, DataSource::Adsr),
                // coarse TIS-B (CF=3) uses a different ME layout, and the
                // management/reserved codes carry no aircraft state
                _ => return Err(Reject::Unparsed),
            };
            if corrected_bits == 0 && addrtype == AddrType::AdsbIcaoNt {
                filter.add(addr);
            }
            (addr, addrtype, source)
        }

        20 | 21 => {
            let addr = if filter.test(syndrome) {
                syndrome
            } else if let Some(full) = filter.test_fuzzy(syndrome & 0xffff) {
                full
            } else {
                return Err(Reject::UnknownIcao);
            };
            (addr, AddrType::ModeS, DataSource::ModeS)
        }

        24..=31 => {
            if !filter.test(syndrome) {
                return Err(Reject::UnknownIcao);
            }
            (syndrome, AddrType::ModeS, DataSource::ModeS)
        }

        _ => return Err(Reject::UnknownDf),
    };

    let message = Message::from_frame(frame).map_err(|_| Reject::Unparsed)?;

    let commb = match &message.df {
        DF::CommBAltitudeReply { dr, um, mb, .. }
        | DF::CommBIdentityReply { dr, um, mb, .. } => {
            // If DR or UM are set this is probably multisite noise; frames
            // with repaired bits are not worth guessing a register from.
            if *dr != 0 || *um != 0 || corrected_bits > 0 {
                Some(CommB::Unknown)
            } else {
                Some(commb::decode(mb, filter))
            }
        }
        _ => None,
    };

    Ok(Decoded {
        message,
        addr,
        addrtype,
        source,
        corrected_bits,
        iid,
        commb,
    })
}

/// A decoded message with its receive metadata, the unit of work handed to
/// the tracker. Immutable once built.
#[derive(Debug, Clone)]
pub struct TimedMessage {
    /// 12 MHz receive-clock value at the end of bit 56
    pub timestamp: u64,
    /// Wall clock at reception, milliseconds since the epoch
    pub system_timestamp: u64,
    /// Mean signal power over the frame, linear full-scale units
    pub signal_level: f64,
    /// Which receiver produced this frame (0 for the local demodulator)
    pub receiver_id: u128,
    pub decoded: Decoded,
}

/// ICAO 24-bit address recovered from the parity overlay (the CRC syndrome
/// equals the address for these downlink formats)
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
#[deku(ctx = "crc: u32")]
pub struct IcaoParity(
    // the final bits were already consumed by the checksum, reuse its value
    #[deku(bits = 24, map = "|_v: u32| -> Result<_, DekuError> { Ok(crc) }")] pub u32,
);

impl fmt::Debug for IcaoParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for IcaoParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for IcaoParity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:06x}", &self.0))
    }
}

/// ICAO 24-bit transponder address
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
pub struct ICAO(#[deku(bits = 24, endian = "big")] pub u32);

impl fmt::Debug for ICAO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for ICAO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for ICAO {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:06x}", &self.0))
    }
}

impl core::str::FromStr for ICAO {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u32::from_str_radix(s, 16)?))
    }
}

/// 13-bit identity code (squawk), four octal digits
#[derive(PartialEq, Eq, DekuRead, Copy, Clone, Hash)]
pub struct IdentityCode(#[deku(reader = "Self::read(deku::reader)")] pub u16);

impl IdentityCode {
    fn read<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
        reader: &mut Reader<R>,
    ) -> Result<u16, DekuError> {
        let num = u16::from_reader_with_ctx(
            reader,
            (deku::ctx::Endian::Big, deku::ctx::BitSize(13)),
        )?;
        Ok(decode_id13(num))
    }
}

impl fmt::Debug for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Display for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Serialize for IdentityCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:04x}", &self.0))
    }
}

/// 13-bit encoded altitude, decoded to feet. None when the field is empty
/// or the Gillham code is invalid.
#[derive(Debug, PartialEq, Eq, serde::Serialize, DekuRead, Copy, Clone)]
pub struct AC13Field(#[deku(reader = "Self::read(deku::reader)")] pub Option<u16>);

impl AC13Field {
    fn read<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
        reader: &mut Reader<R>,
    ) -> Result<Option<u16>, DekuError> {
        let ac13 = u16::from_reader_with_ctx(
            reader,
            (deku::ctx::Endian::Big, deku::ctx::BitSize(13)),
        )?;

        if ac13 == 0 {
            return Ok(None);
        }

        let m_bit = ac13 & 0x0040;
        let q_bit = ac13 & 0x0010;

        if m_bit != 0 {
            // metric altitude
            let meters = ((ac13 & 0x1f80) >> 1) | (ac13 & 0x3f);
            Ok(Some((meters as f32 * 3.28084) as u16))
        } else if q_bit != 0 {
            // 11-bit integer after removing the Q and M bits, 25 ft steps
            let n = ((ac13 & 0x1f80) >> 2) | ((ac13 & 0x0020) >> 1) | (ac13 & 0x000f);
            if n > 40 {
                Ok(Some(n * 25 - 1000))
            } else {
                Ok(None)
            }
        } else {
            // 11-bit Gillham coded altitude
            match gray2alt(decode_id13(ac13)) {
                Ok(n) if n >= 0 => Ok(Some(100 * n as u16)),
                _ => Ok(None),
            }
        }
    }
}

/// Transponder level and additional information (3.1.2.5.2.2.1)
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "3")]
#[allow(non_camel_case_types)]
pub enum Capability {
    /// Level 1 transponder (surveillance only)
    #[serde(rename = "level1")]
    AG_LEVEL1 = 0x00,
    #[deku(id_pat = "0x01..=0x03")]
    AG_RESERVED,
    /// Level 2 or above transponder, on ground
    #[serde(rename = "ground")]
    AG_GROUND = 0x04,
    /// Level 2 or above transponder, airborne
    #[serde(rename = "airborne")]
    AG_AIRBORNE = 0x05,
    /// Level 2 or above transponder, either airborne or on ground
    #[serde(rename = "ground/airborne")]
    AG_GROUND_AIRBORNE = 0x06,
    /// DR≠0 or FS∈{2,3,4,5}, airborne or on ground
    AG_DR0 = 0x07,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::AG_LEVEL1 => "Level 1",
                Self::AG_RESERVED => "reserved",
                Self::AG_GROUND => "ground",
                Self::AG_AIRBORNE => "airborne",
                Self::AG_GROUND_AIRBORNE => "ground/airborne",
                Self::AG_DR0 => "DR0",
            }
        )
    }
}

/// Airborne or ground, alert and SPI (used in DF=4, 5, 20 and 21)
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    NoAlertNoSpiAirborne = 0b000,
    NoAlertNoSpiOnGround = 0b001,
    AlertNoSpiAirborne = 0b010,
    AlertNoSpiOnGround = 0b011,
    AlertSpiAirborneGround = 0b100,
    NoAlertSpiAirborneGround = 0b101,
    Reserved = 0b110,
    NotAssigned = 0b111,
}

impl FlightStatus {
    pub fn alert(&self) -> bool {
        matches!(
            self,
            Self::AlertNoSpiAirborne | Self::AlertNoSpiOnGround | Self::AlertSpiAirborneGround
        )
    }

    pub fn spi(&self) -> bool {
        matches!(
            self,
            Self::AlertSpiAirborneGround | Self::NoAlertSpiAirborneGround
        )
    }

    /// Some(true) on ground, Some(false) airborne, None undetermined
    pub fn on_ground(&self) -> Option<bool> {
        match self {
            Self::NoAlertNoSpiAirborne | Self::AlertNoSpiAirborne => Some(false),
            Self::NoAlertNoSpiOnGround | Self::AlertNoSpiOnGround => Some(true),
            _ => None,
        }
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self.on_ground() {
                Some(true) => "ground",
                Some(false) => "airborne",
                None => "airborne/ground",
            }
        )
    }
}

/// The control field in DF=18 messages
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Clone)]
pub struct ControlField {
    pub t: ControlFieldType,
    /// AA: Address, announced
    pub aa: ICAO,
    /// ME: message, extended squitter
    pub me: ME,
}

/// The control field type in DF=18 messages
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[allow(non_camel_case_types)]
pub enum ControlFieldType {
    /// ADS-B message from a non-transponder device
    #[deku(id = "0")]
    ADSB_ES_NT,
    /// Reserved for ES/NT devices with an alternate address space
    #[deku(id = "1")]
    ADSB_ES_NT_ALT,
    /// Fine format TIS-B message
    #[deku(id = "2")]
    TISB_FINE,
    /// Coarse format TIS-B message
    #[deku(id = "3")]
    TISB_COARSE,
    /// TIS-B management message
    #[deku(id = "4")]
    TISB_MANAGE,
    /// TIS-B relay of an ADS-B message, anonymous address
    #[deku(id = "5")]
    TISB_ADSB_RELAY,
    /// ADS-B rebroadcast, same format as DF=17
    #[deku(id = "6")]
    TISB_ADSB,
    #[deku(id = "7")]
    Reserved,
}

/// Uplink / Downlink (DF=24)
#[derive(Debug, PartialEq, Eq, DekuRead, Copy, Clone)]
#[repr(u8)]
#[deku(id_type = "u8", bits = "1")]
pub enum KE {
    DownlinkELMTx = 0,
    UplinkELMAck = 1,
}

/// Decode a [Gillham code](https://en.wikipedia.org/wiki/Gillham_code).
///
/// In the identity field, bits are interleaved as follows (message bit 20 to
/// bit 32): C1-A1-C2-A2-C4-A4-ZERO-B1-D1-B2-D2-B4-D4. The result groups each
/// octal digit into one hex nibble.
#[rustfmt::skip]
pub fn decode_id13(id13_field: u16) -> u16 {
    let mut hex_gillham: u16 = 0;

    if id13_field & 0x1000 != 0 { hex_gillham |= 0x0010; } // Bit 12 = C1
    if id13_field & 0x0800 != 0 { hex_gillham |= 0x1000; } // Bit 11 = A1
    if id13_field & 0x0400 != 0 { hex_gillham |= 0x0020; } // Bit 10 = C2
    if id13_field & 0x0200 != 0 { hex_gillham |= 0x2000; } // Bit  9 = A2
    if id13_field & 0x0100 != 0 { hex_gillham |= 0x0040; } // Bit  8 = C4
    if id13_field & 0x0080 != 0 { hex_gillham |= 0x4000; } // Bit  7 = A4
    // bit 6 is X or M
    if id13_field & 0x0020 != 0 { hex_gillham |= 0x0100; } // Bit  5 = B1
    if id13_field & 0x0010 != 0 { hex_gillham |= 0x0001; } // Bit  4 = D1 or Q
    if id13_field & 0x0008 != 0 { hex_gillham |= 0x0200; } // Bit  3 = B2
    if id13_field & 0x0004 != 0 { hex_gillham |= 0x0002; } // Bit  2 = D2
    if id13_field & 0x0002 != 0 { hex_gillham |= 0x0400; } // Bit  1 = B4
    if id13_field & 0x0001 != 0 { hex_gillham |= 0x0004; } // Bit  0 = D4

    hex_gillham
}

/// Convert a Gillham code to an altitude in 100 ft increments.
#[rustfmt::skip]
pub fn gray2alt(gray: u16) -> Result<i32, &'static str> {
    let mut five_hundreds: u32 = 0;
    let mut one_hundreds: u32 = 0;

    // zero bits must be zero, D1 set is illegal, C1..C4 cannot be zero
    if (gray & 0x8889) != 0 || (gray & 0x00f0) == 0 {
        return Err("invalid altitude");
    }

    if gray & 0x0010 != 0 { one_hundreds ^= 0x007; } // C1
    if gray & 0x0020 != 0 { one_hundreds ^= 0x003; } // C2
    if gray & 0x0040 != 0 { one_hundreds ^= 0x001; } // C4

    // remove 7s (make 7->5, and 5->7)
    if (one_hundreds & 5) == 5 { one_hundreds ^= 2; }

    if one_hundreds > 5 { return Err("invalid altitude"); }

    if gray & 0x0002 != 0 { five_hundreds ^= 0x0ff; } // D2
    if gray & 0x0004 != 0 { five_hundreds ^= 0x07f; } // D4
    if gray & 0x1000 != 0 { five_hundreds ^= 0x03f; } // A1
    if gray & 0x2000 != 0 { five_hundreds ^= 0x01f; } // A2
    if gray & 0x4000 != 0 { five_hundreds ^= 0x00f; } // A4
    if gray & 0x0100 != 0 { five_hundreds ^= 0x007; } // B1
    if gray & 0x0200 != 0 { five_hundreds ^= 0x003; } // B2
    if gray & 0x0400 != 0 { five_hundreds ^= 0x001; } // B4

    // correct order of one_hundreds
    if five_hundreds & 1 != 0 && one_hundreds <= 6 {
        one_hundreds = 6 - one_hundreds;
    }

    let n = (five_hundreds * 5) + one_hundreds;
    if n >= 13 {
        Ok(n as i32 - 13)
    } else {
        Err("invalid altitude")
    }
}

/// Convert from a (hex) Mode A value to a 0-4095 index
pub fn mode_a_to_index(mode_a: u16) -> usize {
    ((mode_a & 0x0007) | ((mode_a & 0x0070) >> 1) | ((mode_a & 0x0700) >> 2)
        | ((mode_a & 0x7000) >> 3)) as usize
}

/// Convert from a 0-4095 index to a (hex) Mode A value
pub fn index_to_mode_a(index: usize) -> u16 {
    let index = index as u16;
    (index & 0o007) | ((index & 0o070) << 1) | ((index & 0o700) << 2) | ((index & 0o7000) << 3)
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let crc = self.crc;
        match &self.df {
            DF::ShortAirAirSurveillance { ac, .. } => {
                writeln!(f, " DF0. Short Air-Air Surveillance")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                if let Some(alt) = ac.0 {
                    writeln!(f, "  Altitude:      {alt} ft barometric")?;
                }
            }
            DF::SurveillanceAltitudeReply { fs, ac, .. } => {
                writeln!(f, " DF4. Surveillance, Altitude Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                writeln!(f, "  Air/Ground:    {fs}")?;
                if let Some(alt) = ac.0 {
                    writeln!(f, "  Altitude:      {alt} ft barometric")?;
                }
            }
            DF::SurveillanceIdentityReply { fs, id, .. } => {
                writeln!(f, " DF5. Surveillance, Identity Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                writeln!(f, "  Air/Ground:    {fs}")?;
                writeln!(f, "  Squawk:        {id}")?;
            }
            DF::AllCallReply {
                capability, icao, ..
            } => {
                writeln!(f, " DF11. All Call Reply")?;
                writeln!(f, "  ICAO Address:  {icao}")?;
                writeln!(f, "  Air/Ground:    {capability}")?;
            }
            DF::LongAirAirSurveillance { ac, .. } => {
                writeln!(f, " DF16. Long Air-Air ACAS")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                if let Some(alt) = ac.0 {
                    writeln!(f, "  Baro altitude: {alt} ft")?;
                }
            }
            DF::ExtendedSquitterADSB(msg) => write!(f, "{msg}")?,
            DF::ExtendedSquitterTisB { cf, .. } => {
                writeln!(f, " DF18. Extended Squitter {:?}", cf.t)?;
                writeln!(f, "  Address:       {}", cf.aa)?;
            }
            DF::ExtendedSquitterMilitary { .. } => {}
            DF::CommBAltitudeReply { ac, .. } => {
                writeln!(f, " DF20. Comm-B, Altitude Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                if let Some(alt) = ac.0 {
                    writeln!(f, "  Altitude:      {alt} ft")?;
                }
            }
            DF::CommBIdentityReply { id, .. } => {
                writeln!(f, " DF21. Comm-B, Identity Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                writeln!(f, "  Squawk:        {id}")?;
            }
            DF::CommDExtended { .. } => {
                writeln!(f, " DF24. Comm-D Extended Length Message")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
            }
        }
        Ok(())
    }
}

/// Configuration knobs of the decoder core. Collaborators construct one and
/// keep it immutable for the lifetime of the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How many CRC bit errors to repair (0, 1 or 2)
    pub nfix_crc: FixBits,
    /// Receiver location, used for range checks and receiver-relative CPR
    pub user_lat: Option<f64>,
    pub user_lon: Option<f64>,
    /// Maximum plausible range from the receiver, meters (0 disables)
    pub max_range: f64,
    /// Upper bound for the position reliability counters
    pub filter_persistence: u8,
    /// Both reliability counters must reach this before a position is exposed
    pub json_reliable: u8,
    /// Reduced-rate forwarding interval, ms
    pub beast_reduce_interval: u64,
    /// Trace point interval for airborne aircraft, ms
    pub json_trace_interval: u64,
    /// Drop an aircraft once unseen for this long, ms
    pub track_expire: u64,
    /// JAERO validity expiry, ms
    pub track_expire_jaero: u64,
    /// Number of registry buckets, must be a power of two
    pub aircraft_buckets: usize,
    /// Keep per-aircraft traces at all
    pub keep_traces: bool,
    /// Maximum number of points in the uncompressed trace ring
    pub trace_max: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            nfix_crc: FixBits::One,
            user_lat: None,
            user_lon: None,
            max_range: 0.0,
            filter_persistence: 8,
            json_reliable: 2,
            beast_reduce_interval: 1000,
            json_trace_interval: 30_000,
            track_expire: 60_000,
            track_expire_jaero: 33 * 60_000,
            aircraft_buckets: 1 << 20,
            keep_traces: true,
            trace_max: 142_000,
        }
    }
}

impl Settings {
    pub fn user_position(&self) -> Option<(f64, f64)> {
        match (self.user_lat, self.user_lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    #[test]
    fn test_ac13field() {
        let bytes = hex!("a0001910cc300030aa0000eae004");
        let msg = Message::from_frame(&bytes).unwrap();
        match msg.df {
            DF::CommBAltitudeReply { ac, .. } => {
                assert_eq!(ac.0, Some(39000));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_invalid_crc() {
        let bytes = hex!("8d4ca251204994b1c36e60a5343d");
        assert!(Message::from_frame(&bytes).is_err());
    }

    #[test]
    fn test_icao24() {
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        let msg = Message::from_frame(&bytes).unwrap();
        assert_eq!(msg.icao24(), Some(0x406b90));
    }

    #[test]
    fn test_getbits() {
        let data = [0x8d, 0x40, 0x6b, 0x90];
        assert_eq!(getbits(&data, 1, 5), 17); // DF
        assert_eq!(getbits(&data, 9, 32), 0x406b90); // AA
        assert_eq!(getbit(&data, 1), 1);
        assert_eq!(getbit(&data, 5), 1);
        assert_eq!(getbit(&data, 6), 0);
    }

    #[test]
    fn test_mode_a_index_roundtrip() {
        for index in 0..4096 {
            assert_eq!(mode_a_to_index(index_to_mode_a(index)), index);
        }
    }

    #[test]
    fn test_score_frame_df17() {
        let mut filter = IcaoFilter::new();
        let tables = ErrorTables::new(FixBits::One);
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");

        // unknown address: plausible but lower score
        assert_eq!(score_frame(&bytes, &filter, &tables), 1400);

        filter.add(0x406b90);
        assert_eq!(score_frame(&bytes, &filter, &tables), 1800);
    }

    #[test]
    fn test_score_frame_single_bit_error() {
        let mut filter = IcaoFilter::new();
        filter.add(0x406b90);
        let tables = ErrorTables::new(FixBits::One);

        let mut bytes = hex!("8D406B902015A678D4D220AA4BDA");
        bytes[13] ^= 0x01;
        assert_eq!(score_frame(&bytes, &filter, &tables), 900);
    }

    #[test]
    fn test_decode_frame_corrects_last_bit() {
        let mut filter = IcaoFilter::new();
        filter.add(0x406b90);
        let tables = ErrorTables::new(FixBits::One);

        let good = hex!("8D406B902015A678D4D220AA4BDA");
        let mut damaged = good;
        damaged[13] ^= 0x01;

        let decoded = decode_frame(&mut damaged, &mut filter, &tables).unwrap();
        assert_eq!(decoded.corrected_bits, 1);
        assert_eq!(decoded.addr, 0x406b90);
        assert_eq!(damaged, good);
    }

    #[test]
    fn test_decode_frame_unknown_icao() {
        let mut filter = IcaoFilter::new();
        let tables = ErrorTables::new(FixBits::One);

        // DF4 with an address nobody has announced
        let mut bytes = hex!("20001718029FCD");
        assert_eq!(
            decode_frame(&mut bytes, &mut filter, &tables),
            Err(Reject::UnknownIcao)
        );
    }
}
