use crate::decode::{getbit, getbits};
use serde::Serialize;

/**
 * ## Track and Turn Report (BDS 5,0)
 *
 * Roll angle, true track, ground speed, track angle rate and true airspeed.
 * The scorer cross-checks the track rate against the rate implied by the
 * roll angle and TAS: a coordinated turn satisfies
 * `rate ≈ 68625·tan(roll) / (TAS·20π)` within 2°/s.
 */
#[derive(Debug, PartialEq, Serialize, Copy, Clone)]
#[serde(rename = "50")]
pub struct TrackTurnReport {
    /// Roll angle, degrees, negative left wing down
    pub roll: Option<f32>,
    /// True track angle, degrees
    pub track: Option<f32>,
    /// Ground speed, knots
    pub gs: Option<u16>,
    /// Track angle rate, degrees/second
    pub track_rate: Option<f32>,
    /// True airspeed, knots
    pub tas: Option<u16>,
}

pub fn score(mb: &[u8; 7]) -> i32 {
    let roll_valid = getbit(mb, 1) != 0;
    let roll_sign = getbit(mb, 2) != 0;
    let roll_raw = getbits(mb, 3, 11);

    let track_valid = getbit(mb, 12) != 0;
    let track_sign = getbit(mb, 13) != 0;
    let track_raw = getbits(mb, 14, 23);

    let gs_valid = getbit(mb, 24) != 0;
    let gs_raw = getbits(mb, 25, 34);

    let track_rate_valid = getbit(mb, 35) != 0;
    let track_rate_sign = getbit(mb, 36) != 0;
    let track_rate_raw = getbits(mb, 37, 45);

    let tas_valid = getbit(mb, 46) != 0;
    let tas_raw = getbits(mb, 47, 56);

    if !roll_valid || !track_valid || !gs_valid || !tas_valid {
        return 0;
    }

    let mut score = 0;

    let mut roll = roll_raw as f32 * 45.0 / 256.0;
    if roll_sign {
        roll -= 90.0;
    }
    if (-40.0..40.0).contains(&roll) {
        score += 11;
    } else {
        return 0;
    }

    score += 12; // track always plausible once the status bit is set

    let gs = gs_raw * 2;
    if gs_raw != 0 {
        if (50..=700).contains(&gs) {
            score += 11;
        } else {
            return 0;
        }
    } else {
        score += 1;
    }

    let mut track_rate = 0.0;
    if track_rate_valid {
        track_rate = track_rate_raw as f32 * 8.0 / 256.0;
        if track_rate_sign {
            track_rate -= 16.0;
        }
        if (-10.0..=10.0).contains(&track_rate) {
            score += 11;
        } else {
            return 0;
        }
    } else if track_rate_raw == 0 && !track_rate_sign {
        score += 1;
    } else {
        return 0;
    }

    let tas = tas_raw * 2;
    if tas_raw != 0 {
        if (50..=700).contains(&tas) {
            score += 11;
        } else {
            return 0;
        }
    } else {
        score += 1;
    }

    // small penalty for inconsistent data
    if gs_raw != 0 && tas_raw != 0 && (gs as i32 - tas as i32).abs() > 150 {
        score -= 6;
    }

    // compare the track angle rate to the turn rate a coordinated turn at
    // this roll angle and TAS would produce
    if tas > 0 && track_rate_valid {
        let turn_rate = 68625.0 * libm::tan(roll as f64 * std::f64::consts::PI / 180.0)
            / (tas as f64 * 20.0 * std::f64::consts::PI);
        if (turn_rate - track_rate as f64).abs() > 2.0 {
            score -= 6;
        }
    }

    score
}

pub fn decode(mb: &[u8; 7]) -> TrackTurnReport {
    let roll_valid = getbit(mb, 1) != 0;
    let roll_sign = getbit(mb, 2) != 0;
    let track_valid = getbit(mb, 12) != 0;
    let track_sign = getbit(mb, 13) != 0;
    let gs_valid = getbit(mb, 24) != 0;
    let track_rate_valid = getbit(mb, 35) != 0;
    let track_rate_sign = getbit(mb, 36) != 0;
    let tas_valid = getbit(mb, 46) != 0;

    TrackTurnReport {
        roll: roll_valid.then(|| {
            let mut roll = getbits(mb, 3, 11) as f32 * 45.0 / 256.0;
            if roll_sign {
                roll -= 90.0;
            }
            roll
        }),
        track: track_valid.then(|| {
            let mut track = getbits(mb, 14, 23) as f32 * 90.0 / 512.0;
            if track_sign {
                track += 180.0;
            }
            track
        }),
        gs: gs_valid.then(|| getbits(mb, 25, 34) as u16 * 2),
        track_rate: track_rate_valid.then(|| {
            let mut rate = getbits(mb, 37, 45) as f32 * 8.0 / 256.0;
            if track_rate_sign {
                rate -= 16.0;
            }
            rate
        }),
        tas: tas_valid.then(|| getbits(mb, 47, 56) as u16 * 2),
    }
}
