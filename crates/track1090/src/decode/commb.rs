use super::bds::{bds10, bds17, bds20, bds30, bds40, bds44, bds50, bds60};
use crate::filter::IcaoFilter;
use serde::Serialize;
use tracing::trace;

/**
 * ## Comm-B register dispatch
 *
 * A DF20/21 reply carries whatever register the interrogator asked for, and
 * the request is not visible on the downlink. Every candidate decoder
 * inspects the 7 MB bytes and returns an integer plausibility score (0:
 * definitely not this register, higher: more plausible). The strictly best
 * scorer wins and its decode is stored; a tie means the payload is
 * ambiguous and nothing is stored.
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "commb")]
#[serde(rename_all = "snake_case")]
pub enum CommB {
    /// All 56 bits zero, a transponder with nothing to say
    EmptyResponse,
    DataLinkCaps(bds10::DataLinkCapability),
    GicbCaps(bds17::GicbCapability),
    AircraftIdent(bds20::AircraftIdent),
    AcasRa(bds30::AcasResolutionAdvisory),
    VerticalIntent(bds40::VerticalIntent),
    Meteorological(bds44::MeteoRoutineReport),
    TrackTurn(bds50::TrackTurnReport),
    HeadingSpeed(bds60::HeadingSpeedReport),
    /// Two registers scored equally well, nothing stored
    Ambiguous,
    /// No decoder recognized the payload
    Unknown,
}

struct Decoder {
    score: fn(&[u8; 7], &IcaoFilter) -> i32,
    decode: fn(&[u8; 7]) -> CommB,
}

fn score_empty(mb: &[u8; 7], _: &IcaoFilter) -> i32 {
    if mb.iter().all(|&b| b == 0) {
        56
    } else {
        0
    }
}

static DECODERS: [Decoder; 9] = [
    Decoder {
        score: score_empty,
        decode: |_| CommB::EmptyResponse,
    },
    Decoder {
        score: |mb, _| bds10::score(mb),
        decode: |mb| CommB::DataLinkCaps(bds10::decode(mb)),
    },
    Decoder {
        score: |mb, _| bds20::score(mb),
        decode: |mb| CommB::AircraftIdent(bds20::decode(mb)),
    },
    Decoder {
        score: bds30::score,
        decode: |mb| CommB::AcasRa(bds30::decode(mb)),
    },
    Decoder {
        score: |mb, _| bds17::score(mb),
        decode: |mb| CommB::GicbCaps(bds17::decode(mb)),
    },
    Decoder {
        score: |mb, _| bds40::score(mb),
        decode: |mb| CommB::VerticalIntent(bds40::decode(mb)),
    },
    Decoder {
        score: |mb, _| bds50::score(mb),
        decode: |mb| CommB::TrackTurn(bds50::decode(mb)),
    },
    Decoder {
        score: |mb, _| bds60::score(mb),
        decode: |mb| CommB::HeadingSpeed(bds60::decode(mb)),
    },
    Decoder {
        score: |mb, _| bds44::score(mb),
        decode: |mb| CommB::Meteorological(bds44::decode(mb)),
    },
];

/// Score the MB field against all register hypotheses and decode the
/// strictly best one.
pub fn decode(mb: &[u8; 7], filter: &IcaoFilter) -> CommB {
    let mut best_score = 0;
    let mut best: Option<&Decoder> = None;
    let mut ambiguous = false;

    for decoder in &DECODERS {
        let score = (decoder.score)(mb, filter);
        if score > best_score {
            best_score = score;
            best = Some(decoder);
            ambiguous = false;
        } else if best.is_some() && score == best_score {
            ambiguous = true;
        }
    }

    match best {
        Some(_) if ambiguous => {
            trace!("ambiguous Comm-B payload {mb:02x?}");
            CommB::Ambiguous
        }
        Some(decoder) => (decoder.decode)(mb),
        None => CommB::Unknown,
    }
}
