use crate::decode::Settings;
use tracing::warn;

/**
 * Per-aircraft position history. Points are packed into fixed-layout
 * records, grouped four at a time with one wide record of slow-changing
 * state per group. The recent portion lives uncompressed in a ring that
 * grows geometrically; older groups are frozen into zstd chunks.
 */

/// Points per group
pub const SFOUR: usize = 4;

/// Uncompressed points kept before freezing a chunk
const CHUNK_POINTS: usize = 512;

/// zstd level used for frozen chunks
const CHUNK_LEVEL: i32 = 1;

pub const TRACE_MIN_ELAPSED: u64 = 5_000;

// quantisation factors of the packed point record
pub const GS_FACTOR: f32 = 10.0;
pub const TRACK_FACTOR: f32 = 100.0;
pub const ALT_FACTOR: f32 = 1.0 / 6.25;
pub const RATE_FACTOR: f32 = 1.0 / 8.0;
pub const ROLL_FACTOR: f32 = 100.0;

// flag bits of StatePoint.flags
pub const F_ON_GROUND: u16 = 1 << 0;
pub const F_STALE: u16 = 1 << 1;
pub const F_LEG_MARKER: u16 = 1 << 2;
pub const F_GS_VALID: u16 = 1 << 3;
pub const F_TRACK_VALID: u16 = 1 << 4;
pub const F_BARO_ALT_VALID: u16 = 1 << 5;
pub const F_BARO_RATE_VALID: u16 = 1 << 6;
pub const F_GEOM_ALT_VALID: u16 = 1 << 7;
pub const F_GEOM_RATE_VALID: u16 = 1 << 8;
pub const F_IAS_VALID: u16 = 1 << 9;
pub const F_ROLL_VALID: u16 = 1 << 10;

/// One compact trace point. The byte layout (see `to_bytes`) is the wire
/// contract with downstream consumers and must not change implicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatePoint {
    /// ms since epoch, 48 bits carried
    pub timestamp: u64,
    pub flags: u16,
    /// degrees ×1e6
    pub lat: i32,
    pub lon: i32,
    /// knots ×10
    pub gs: u16,
    /// degrees ×100
    pub track: u16,
    /// feet ÷6.25
    pub baro_alt: i16,
    /// ft/min ÷8
    pub baro_rate: i16,
    pub geom_alt: i16,
    pub geom_rate: i16,
    pub ias: u16,
    /// degrees ×100
    pub roll: i16,
}

pub const STATE_POINT_BYTES: usize = 32;

impl StatePoint {
    /// Fixed little-endian layout, 32 bytes:
    /// ts48 flags16 lat32 lon32 gs16 track16 balt16 brate16 galt16 grate16
    /// ias16 roll16
    pub fn to_bytes(&self) -> [u8; STATE_POINT_BYTES] {
        let mut b = [0u8; STATE_POINT_BYTES];
        b[0..6].copy_from_slice(&self.timestamp.to_le_bytes()[0..6]);
        b[6..8].copy_from_slice(&self.flags.to_le_bytes());
        b[8..12].copy_from_slice(&self.lat.to_le_bytes());
        b[12..16].copy_from_slice(&self.lon.to_le_bytes());
        b[16..18].copy_from_slice(&self.gs.to_le_bytes());
        b[18..20].copy_from_slice(&self.track.to_le_bytes());
        b[20..22].copy_from_slice(&self.baro_alt.to_le_bytes());
        b[22..24].copy_from_slice(&self.baro_rate.to_le_bytes());
        b[24..26].copy_from_slice(&self.geom_alt.to_le_bytes());
        b[26..28].copy_from_slice(&self.geom_rate.to_le_bytes());
        b[28..30].copy_from_slice(&self.ias.to_le_bytes());
        b[30..32].copy_from_slice(&self.roll.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8; STATE_POINT_BYTES]) -> StatePoint {
        let mut ts = [0u8; 8];
        ts[0..6].copy_from_slice(&b[0..6]);
        StatePoint {
            timestamp: u64::from_le_bytes(ts),
            flags: u16::from_le_bytes([b[6], b[7]]),
            lat: i32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            lon: i32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            gs: u16::from_le_bytes([b[16], b[17]]),
            track: u16::from_le_bytes([b[18], b[19]]),
            baro_alt: i16::from_le_bytes([b[20], b[21]]),
            baro_rate: i16::from_le_bytes([b[22], b[23]]),
            geom_alt: i16::from_le_bytes([b[24], b[25]]),
            geom_rate: i16::from_le_bytes([b[26], b[27]]),
            ias: u16::from_le_bytes([b[28], b[29]]),
            roll: i16::from_le_bytes([b[30], b[31]]),
        }
    }

    pub fn set(&mut self, flag: u16, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

/// The wide record stored with every 4th point: slow-changing identity,
/// intent and quality state. Fixed little-endian layout, 48 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateAll {
    pub callsign: [u8; 8],
    pub squawk: u16,
    pub nav_altitude_mcp: i16,
    pub nav_altitude_fms: i16,
    /// millibars ×10
    pub nav_qnh: i16,
    /// degrees ×90 (wraps 360° onto the full u16 range)
    pub nav_heading: u16,
    /// ×1000
    pub mach: u16,
    /// deg/s ×100
    pub track_rate: i16,
    pub mag_heading: u16,
    pub true_heading: u16,
    pub wind_direction: i16,
    pub wind_speed: i16,
    pub oat: i16,
    pub tat: i16,
    pub category: u8,
    pub pos_nic: u8,
    pub pos_rc: u16,
    pub emergency: u8,
    pub nav_modes: u8,
    pub airground: u8,
    pub nav_altitude_src: u8,
    pub tas: u16,
    pub adsb_version: u8,
    pub quality_bits: u16,
    /// one bit per field above, same order
    pub valid_bits: u32,
}

impl Default for StateAll {
    fn default() -> Self {
        StateAll {
            callsign: [0; 8],
            squawk: 0,
            nav_altitude_mcp: 0,
            nav_altitude_fms: 0,
            nav_qnh: 0,
            nav_heading: 0,
            mach: 0,
            track_rate: 0,
            mag_heading: 0,
            true_heading: 0,
            wind_direction: 0,
            wind_speed: 0,
            oat: 0,
            tat: 0,
            category: 0,
            pos_nic: 0,
            pos_rc: 0,
            emergency: 0,
            nav_modes: 0,
            airground: 0,
            nav_altitude_src: 0,
            tas: 0,
            adsb_version: 0,
            quality_bits: 0,
            valid_bits: 0,
        }
    }
}

pub const STATE_ALL_BYTES: usize = 52;

impl StateAll {
    pub fn to_bytes(&self) -> [u8; STATE_ALL_BYTES] {
        let mut b = [0u8; STATE_ALL_BYTES];
        b[0..8].copy_from_slice(&self.callsign);
        b[8..10].copy_from_slice(&self.squawk.to_le_bytes());
        b[10..12].copy_from_slice(&self.nav_altitude_mcp.to_le_bytes());
        b[12..14].copy_from_slice(&self.nav_altitude_fms.to_le_bytes());
        b[14..16].copy_from_slice(&self.nav_qnh.to_le_bytes());
        b[16..18].copy_from_slice(&self.nav_heading.to_le_bytes());
        b[18..20].copy_from_slice(&self.mach.to_le_bytes());
        b[20..22].copy_from_slice(&self.track_rate.to_le_bytes());
        b[22..24].copy_from_slice(&self.mag_heading.to_le_bytes());
        b[24..26].copy_from_slice(&self.true_heading.to_le_bytes());
        b[26..28].copy_from_slice(&self.wind_direction.to_le_bytes());
        b[28..30].copy_from_slice(&self.wind_speed.to_le_bytes());
        b[30..32].copy_from_slice(&self.oat.to_le_bytes());
        b[32..34].copy_from_slice(&self.tat.to_le_bytes());
        b[34] = self.category;
        b[35] = self.pos_nic;
        b[36..38].copy_from_slice(&self.pos_rc.to_le_bytes());
        b[38] = self.emergency;
        b[39] = self.nav_modes;
        b[40] = self.airground;
        b[41] = self.nav_altitude_src;
        b[42..44].copy_from_slice(&self.tas.to_le_bytes());
        b[44] = self.adsb_version;
        b[45] = 0;
        b[46..48].copy_from_slice(&self.quality_bits.to_le_bytes());
        b[48..52].copy_from_slice(&self.valid_bits.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8; STATE_ALL_BYTES]) -> StateAll {
        let mut callsign = [0u8; 8];
        callsign.copy_from_slice(&b[0..8]);
        let u16_at = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([b[i], b[i + 1]]);
        StateAll {
            callsign,
            squawk: u16_at(8),
            nav_altitude_mcp: i16_at(10),
            nav_altitude_fms: i16_at(12),
            nav_qnh: i16_at(14),
            nav_heading: u16_at(16),
            mach: u16_at(18),
            track_rate: i16_at(20),
            mag_heading: u16_at(22),
            true_heading: u16_at(24),
            wind_direction: i16_at(26),
            wind_speed: i16_at(28),
            oat: i16_at(30),
            tat: i16_at(32),
            category: b[34],
            pos_nic: b[35],
            pos_rc: u16_at(36),
            emergency: b[38],
            nav_modes: b[39],
            airground: b[40],
            nav_altitude_src: b[41],
            tas: u16_at(42),
            adsb_version: b[44],
            quality_bits: u16_at(46),
            valid_bits: u32::from_le_bytes([b[48], b[49], b[50], b[51]]),
        }
    }
}

/// Four compact points plus one wide record
#[derive(Debug, Clone, Default)]
pub struct FourState {
    pub points: [StatePoint; SFOUR],
    pub all: StateAll,
}

/// A frozen, compressed run of trace points
#[derive(Debug, Clone)]
pub struct StateChunk {
    pub compressed: Vec<u8>,
    pub num_states: usize,
    pub first_timestamp: u64,
    pub last_timestamp: u64,
}

/// What the tracker knows at the moment a position is accepted; the trace
/// policy decides whether it becomes a point.
#[derive(Debug, Clone, Default)]
pub struct TraceInput {
    pub now: u64,
    pub lat: f64,
    pub lon: f64,
    pub on_ground: bool,
    pub ag_valid: bool,
    pub stale: bool,
    /// ground track, or true heading while on the ground
    pub track: Option<f32>,
    pub gs: Option<f32>,
    pub baro_alt: Option<i32>,
    pub baro_alt_reliable: bool,
    pub baro_rate: Option<i32>,
    pub geom_alt: Option<i32>,
    pub geom_rate: Option<i32>,
    pub ias: Option<u16>,
    pub roll: Option<f32>,
    pub squawk: Option<u16>,
    pub mlat: bool,
    pub acas_ra_recent: bool,
    pub reliable_recently: bool,
    pub all: StateAll,
}

impl TraceInput {
    fn to_point(&self) -> StatePoint {
        let mut p = StatePoint {
            timestamp: self.now,
            lat: (self.lat * 1e6).round() as i32,
            lon: (self.lon * 1e6).round() as i32,
            ..Default::default()
        };
        p.set(F_ON_GROUND, self.on_ground);
        p.set(F_STALE, self.stale);
        if let Some(gs) = self.gs {
            p.gs = (gs * GS_FACTOR).round() as u16;
            p.set(F_GS_VALID, true);
        }
        if let Some(track) = self.track {
            p.track = (track * TRACK_FACTOR).round() as u16;
            p.set(F_TRACK_VALID, true);
        }
        if let Some(alt) = self.baro_alt {
            p.baro_alt = (alt as f32 * ALT_FACTOR).round() as i16;
            p.set(F_BARO_ALT_VALID, true);
        }
        if let Some(rate) = self.baro_rate {
            p.baro_rate = (rate as f32 * RATE_FACTOR).round() as i16;
            p.set(F_BARO_RATE_VALID, true);
        }
        if let Some(alt) = self.geom_alt {
            p.geom_alt = (alt as f32 * ALT_FACTOR).round() as i16;
            p.set(F_GEOM_ALT_VALID, true);
        }
        if let Some(rate) = self.geom_rate {
            p.geom_rate = (rate as f32 * RATE_FACTOR).round() as i16;
            p.set(F_GEOM_RATE_VALID, true);
        }
        if let Some(ias) = self.ias {
            p.ias = ias;
            p.set(F_IAS_VALID, true);
        }
        if let Some(roll) = self.roll {
            p.roll = (roll * ROLL_FACTOR).round() as i16;
            p.set(F_ROLL_VALID, true);
        }
        p
    }
}

/// The per-aircraft trace: a growing uncompressed ring plus frozen chunks
/// and a cache of the last rendered JSON fragment.
#[derive(Debug, Default)]
pub struct Trace {
    current: Vec<FourState>,
    /// points in the uncompressed portion
    len: usize,
    /// points frozen into chunks
    frozen_len: usize,
    pub chunks: Vec<StateChunk>,
    /// most recent point held back, preferred over an on-the-dot sample
    buffered: Option<Box<(StatePoint, StateAll)>>,
    /// rendered JSON fragment, invalidated by every write
    pub json_cache: Option<String>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.len + self.frozen_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn recent_len(&self) -> usize {
        self.len
    }

    pub fn point(&self, i: usize) -> &StatePoint {
        &self.current[i / SFOUR].points[i % SFOUR]
    }

    pub fn last_point(&self) -> Option<&StatePoint> {
        self.len.checked_sub(1).map(|i| self.point(i))
    }

    fn push(&mut self, point: StatePoint, all: &StateAll, max_points: usize) {
        self.json_cache = None;

        if self.len % SFOUR == 0 {
            if self.len >= CHUNK_POINTS {
                self.freeze(max_points);
            }
            // the Vec grows geometrically underneath; freezing caps it
            self.current.push(FourState {
                all: *all,
                ..Default::default()
            });
        }

        let group = self.len / SFOUR;
        self.current[group].points[self.len % SFOUR] = point;
        self.len += 1;
    }

    /// Compress the uncompressed portion into a chunk. Trims the oldest
    /// chunks once the configured maximum number of points is exceeded.
    fn freeze(&mut self, max_points: usize) {
        if self.len == 0 {
            return;
        }

        let mut raw =
            Vec::with_capacity(self.current.len() * (SFOUR * STATE_POINT_BYTES + STATE_ALL_BYTES));
        for group in &self.current {
            raw.extend_from_slice(&group.all.to_bytes());
            for p in &group.points {
                raw.extend_from_slice(&p.to_bytes());
            }
        }

        let first = self.point(0).timestamp;
        let last = self.last_point().map(|p| p.timestamp).unwrap_or(first);

        match zstd::bulk::compress(&raw, CHUNK_LEVEL) {
            Ok(compressed) => {
                self.chunks.push(StateChunk {
                    compressed,
                    num_states: self.len,
                    first_timestamp: first,
                    last_timestamp: last,
                });
                self.frozen_len += self.len;
            }
            Err(e) => {
                // losing history beats losing the process
                warn!("trace chunk compression failed: {e}");
            }
        }

        self.current.clear();
        self.len = 0;

        while self.frozen_len > max_points && self.chunks.len() > 1 {
            let dropped = self.chunks.remove(0);
            self.frozen_len -= dropped.num_states;
        }
    }

    /// Decompress one frozen chunk back into groups.
    pub fn thaw(chunk: &StateChunk) -> Option<Vec<FourState>> {
        let group_bytes = SFOUR * STATE_POINT_BYTES + STATE_ALL_BYTES;
        let groups = chunk.num_states.div_ceil(SFOUR);
        let raw = zstd::bulk::decompress(&chunk.compressed, groups * group_bytes).ok()?;

        let mut out = Vec::with_capacity(groups);
        for g in 0..groups {
            let mut group = FourState::default();

            let mut allb = [0u8; STATE_ALL_BYTES];
            allb.copy_from_slice(&raw[g * group_bytes..][..STATE_ALL_BYTES]);
            group.all = StateAll::from_bytes(&allb);

            let base = g * group_bytes + STATE_ALL_BYTES;
            for i in 0..SFOUR {
                let mut b = [0u8; STATE_POINT_BYTES];
                b.copy_from_slice(&raw[base + i * STATE_POINT_BYTES..][..STATE_POINT_BYTES]);
                group.points[i] = StatePoint::from_bytes(&b);
            }
            out.push(group);
        }
        Some(out)
    }

    /// Flush the buffered point if any (used when an aircraft goes quiet).
    pub fn flush_buffered(&mut self, max_points: usize) {
        if let Some(buffered) = self.buffered.take() {
            let (point, all) = *buffered;
            self.push(point, &all, max_points);
        }
    }
}

/// Decide whether an accepted position becomes a trace point, apply it, and
/// report whether anything was recorded. The policy records position,
/// altitude, speed and heading changes densely, throttles steady cruise and
/// non-moving targets, and prefers the buffered most recent point once
/// enough time elapsed.
pub fn trace_add(trace: &mut Trace, input: TraceInput, settings: &Settings) -> bool {
    if !settings.keep_traces {
        return false;
    }

    let max_elapsed = settings.json_trace_interval;
    let mut min_elapsed = TRACE_MIN_ELAPSED.min(max_elapsed);
    let mut turn_density = 4.5f64;
    let mut max_speed_diff = 5.0f64;
    let max_alt_diff = 125;

    if matches!(input.baro_alt, Some(alt) if alt > 10_000) {
        max_speed_diff = 10.0;
    }

    if input.mlat {
        min_elapsed *= 2;
        turn_density /= 2.0;
        max_speed_diff = 30.0;
    }
    // some towers on MLAT create unnecessary data
    if input.squawk == Some(0x7777) {
        min_elapsed += 60_000;
    }

    let new_lat = (input.lat * 1e6).round() as i32;
    let new_lon = (input.lon * 1e6).round() as i32;

    // drop exact repeats of recent points
    let start = trace.recent_len().saturating_sub(6);
    for i in start..trace.recent_len().saturating_sub(1) {
        let p = trace.point(i);
        if p.lat == new_lat && p.lon == new_lon {
            return false;
        }
    }

    let decision = decide(trace, &input, min_elapsed, max_elapsed, turn_density, max_speed_diff, max_alt_diff);

    let point = input.to_point();

    match decision {
        Decision::Drop => {
            // remember the sample anyway; it may be emitted later instead
            // of a less informative on-schedule one
            trace.buffered = Some(Box::new((point, input.all)));
            false
        }
        Decision::SaveBuffered => {
            trace.flush_buffered(settings.trace_max);
            trace.buffered = Some(Box::new((point, input.all)));
            true
        }
        Decision::Save => {
            trace.buffered = None;
            trace.push(point, &input.all, settings.trace_max);
            true
        }
    }
}

enum Decision {
    Drop,
    Save,
    /// emit the buffered point, keep the current one buffered
    SaveBuffered,
}

#[allow(clippy::too_many_arguments)]
fn decide(
    trace: &Trace,
    input: &TraceInput,
    min_elapsed: u64,
    max_elapsed: u64,
    turn_density: f64,
    max_speed_diff: f64,
    max_alt_diff: i32,
) -> Decision {
    let Some(last) = trace.last_point() else {
        return Decision::Save;
    };
    let now = input.now;

    let elapsed = now.saturating_sub(last.timestamp);
    let buffered_elapsed = trace
        .buffered
        .as_ref()
        .map(|b| b.0.timestamp.saturating_sub(last.timestamp))
        .unwrap_or(0);

    // duplicate position within a second
    let new_lat = (input.lat * 1e6).round() as i32;
    let new_lon = (input.lon * 1e6).round() as i32;
    if elapsed < 1_000 && new_lat == last.lat && new_lon == last.lon {
        return Decision::Drop;
    }

    let save = |prefer_buffered: bool| {
        if prefer_buffered && (elapsed > max_elapsed || buffered_elapsed > min_elapsed * 3 / 2) {
            Decision::SaveBuffered
        } else {
            Decision::Save
        }
    };

    let alt_diff = match (input.baro_alt, last.has(F_BARO_ALT_VALID)) {
        (Some(alt), true) if input.baro_alt_reliable => {
            (alt - (last.baro_alt as f32 / ALT_FACTOR) as i32).abs()
        }
        _ => 0,
    };

    // record more points when the altitude changes very quickly
    if alt_diff >= max_alt_diff && elapsed <= min_elapsed {
        return save(true);
    }

    if let (Some(gs), true) = (input.gs, last.has(F_GS_VALID)) {
        let speed_diff = (last.gs as f64 / GS_FACTOR as f64 - gs as f64).abs();
        if speed_diff > max_speed_diff {
            return save(true);
        }
    }

    // air/ground transitions are recorded precisely
    let on_ground = if input.ag_valid {
        input.on_ground
    } else {
        last.has(F_ON_GROUND)
    };
    if on_ground != last.has(F_ON_GROUND) {
        return save(true);
    }

    // record non-moving targets every now and then
    if elapsed > 10 * max_elapsed {
        return save(true);
    }

    let distance = super::greatcircle(
        last.lat as f64 / 1e6,
        last.lon as f64 / 1e6,
        input.lat,
        input.lon,
    );

    // don't clutter the trace while parked
    if distance < 25.0 && max_elapsed > 5_000 {
        return Decision::Drop;
    }

    // record the trace precisely around a TCAS advisory
    if input.acas_ra_recent {
        return save(false);
    }

    if elapsed < min_elapsed {
        return Decision::Drop;
    }

    // an emergency keeps the trace dense even if the squawk later drops
    if input.squawk == Some(0x7700) && elapsed > 2 * min_elapsed {
        return save(true);
    }

    if !on_ground && elapsed > max_elapsed {
        return save(true);
    }
    if on_ground && elapsed > 4 * max_elapsed {
        return save(true);
    }

    if !input.reliable_recently {
        // spotty reception gets marked in the trace
        return save(false);
    }

    let track_diff = match (input.track, last.has(F_TRACK_VALID)) {
        (Some(track), true) => {
            let last_track = last.track as f64 / TRACK_FACTOR as f64;
            let mut diff = (track as f64 - last_track).rem_euclid(360.0);
            if diff > 180.0 {
                diff = 360.0 - diff;
            }
            diff
        }
        _ => 0.0,
    };

    if on_ground {
        if distance * track_diff > 250.0 {
            return save(true);
        }
        if distance > 400.0 {
            return save(true);
        }
    }

    // significant turns: time * turn angle above threshold
    if track_diff > 0.5 && (elapsed as f64 / 1000.0) * track_diff * turn_density > 100.0 {
        return save(true);
    }

    // altitude slice transitions (125/250/500 ft by altitude band)
    if let (Some(alt), true) = (input.baro_alt, input.baro_alt_reliable) {
        if !last.has(F_BARO_ALT_VALID) {
            return save(false);
        }
        let last_alt = (last.baro_alt as f32 / ALT_FACTOR) as i32;

        let div = if alt > 8_000 {
            500
        } else if alt > 4_000 {
            250
        } else {
            125
        };
        let offset = div / 2;
        let alt_add = if alt >= 0 { offset } else { -offset };
        let last_alt_add = if last_alt >= 0 { offset } else { -offset };

        let div_delta = ((alt + alt_add) / div - (last_alt + last_alt_add) / div).abs();
        if div_delta >= 1 && alt_diff >= div / 2 {
            if div_delta >= 2 {
                return save(true);
            }
            return save(false);
        }

        if alt_diff >= 25 && elapsed > (1000 * 22 * div as u64) / alt_diff as u64 {
            return save(false);
        }
    }

    Decision::Drop
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(now: u64, lat: f64, lon: f64) -> TraceInput {
        TraceInput {
            now,
            lat,
            lon,
            ag_valid: true,
            baro_alt: Some(30_000),
            baro_alt_reliable: true,
            gs: Some(450.0),
            track: Some(90.0),
            reliable_recently: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_point_roundtrip() {
        let mut p = StatePoint {
            timestamp: 1_700_000_000_123,
            lat: 42_257_000,
            lon: -8_633_000,
            gs: 4_385,
            track: 11_425,
            baro_alt: (39_000.0 * ALT_FACTOR) as i16,
            baro_rate: -128,
            geom_alt: 6_000,
            geom_rate: 0,
            ias: 280,
            roll: -250,
            ..Default::default()
        };
        p.set(F_GS_VALID, true);
        p.set(F_BARO_ALT_VALID, true);

        assert_eq!(StatePoint::from_bytes(&p.to_bytes()), p);
    }

    #[test]
    fn test_first_point_always_saved() {
        let mut trace = Trace::default();
        let settings = Settings::default();
        assert!(trace_add(&mut trace, input(1000, 50.0, 8.0), &settings));
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_throttled_in_cruise() {
        let mut trace = Trace::default();
        let settings = Settings::default();
        assert!(trace_add(&mut trace, input(0, 50.0, 8.0), &settings));

        // same heading and speed two seconds later, moving normally
        assert!(!trace_add(&mut trace, input(2_000, 50.004, 8.0), &settings));
        assert_eq!(trace.len(), 1);

        // past the interval the next point is recorded
        let saved = trace_add(&mut trace, input(31_000, 50.06, 8.0), &settings);
        assert!(saved);
        assert!(trace.len() >= 2);
    }

    #[test]
    fn test_speed_change_recorded() {
        let mut trace = Trace::default();
        let settings = Settings::default();
        assert!(trace_add(&mut trace, input(0, 50.0, 8.0), &settings));

        let mut fast = input(3_000, 50.006, 8.0);
        fast.gs = Some(480.0);
        assert!(trace_add(&mut trace, fast, &settings));
    }

    #[test]
    fn test_duplicate_dropped() {
        let mut trace = Trace::default();
        let settings = Settings::default();
        assert!(trace_add(&mut trace, input(0, 50.0, 8.0), &settings));
        assert!(!trace_add(&mut trace, input(500, 50.0, 8.0), &settings));
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_freeze_and_thaw() {
        let mut trace = Trace::default();
        let all = StateAll::default();

        for i in 0..(CHUNK_POINTS + 10) {
            let mut p = StatePoint {
                timestamp: i as u64 * 1000,
                lat: 50_000_000 + i as i32 * 1000,
                lon: 8_000_000,
                ..Default::default()
            };
            p.set(F_GS_VALID, true);
            trace.push(p, &all, 100_000);
        }

        assert_eq!(trace.len(), CHUNK_POINTS + 10);
        assert_eq!(trace.chunks.len(), 1);
        assert_eq!(trace.recent_len(), 10);

        let thawed = Trace::thaw(&trace.chunks[0]).unwrap();
        assert_eq!(thawed.len() * SFOUR, CHUNK_POINTS);
        assert_eq!(thawed[0].points[0].lat, 50_000_000);
        assert_eq!(thawed[1].points[2].timestamp, 6_000);
    }

    #[test]
    fn test_max_points_trims_old_chunks() {
        let mut trace = Trace::default();
        let all = StateAll::default();

        for i in 0..(4 * CHUNK_POINTS) {
            let p = StatePoint {
                timestamp: i as u64,
                ..Default::default()
            };
            trace.push(p, &all, CHUNK_POINTS);
        }
        // only one full frozen chunk may remain at this limit
        assert!(trace.chunks.len() <= 2);
    }
}
