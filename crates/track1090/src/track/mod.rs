pub mod globe;
pub mod registry;
pub mod trace;

use libm::{atan2, cos, fabs, sin, sqrt};
use serde::Serialize;

use crate::decode::adsb::ME;
use crate::decode::bds::bds05::SurveillanceStatus;
use crate::decode::bds::bds09::{AirborneVelocitySubType, AirspeedType, VerticalRateSource};
use crate::decode::bds::bds40::{AltitudeSource, NavModes};
use crate::decode::bds::bds61::{AircraftStatusType, EmergencyState};
use crate::decode::bds::bds62::AltSource;
use crate::decode::bds::bds65::OperationStatus;
use crate::decode::commb::CommB;
use crate::decode::cpr::{self, CPRFormat, CprError, CprType, Position};
use crate::decode::{AddrType, DataSource, Settings, TimedMessage, DF};
use crate::geomag;
use crate::stats::{update_range_histogram, Counters};
use registry::Registry;
use trace::{Trace, TraceInput};

/// Data older than this may be displaced by a lower-priority source
pub const TRACK_STALE: u64 = 15_000;
/// Default validity expiry
pub const TRACK_EXPIRE: u64 = 30_000;
/// Expiry for rough (indirect) positions
pub const TRACK_EXPIRE_ROUGH: u64 = 120_000;
/// Window for pairing heading and track measurements for wind
pub const TRACK_WT_TIMEOUT: u64 = 2_500;
/// Derived wind and temperature go stale after this
pub const WIND_TIMEOUT: u64 = 60_000;

pub const ALTITUDE_BARO_RELIABLE_MAX: i32 = 20;

/// Rc value for "unknown containment radius"
pub const RC_UNKNOWN: u32 = 0;

// data moves through three states:
//  fresh: valid, updates from a less reliable source are not accepted
//  stale: valid, updates from a less reliable source are accepted
//  expired: not valid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Validity {
    /// when the data arrived, ms
    pub updated: u64,
    /// when to next forward the data for reduced-rate output, ms
    pub next_reduce_forward: u64,
    /// where the current data came from
    pub source: DataSource,
    /// the best source that ever provided this field
    pub last_source: DataSource,
    pub stale: bool,
}

impl Validity {
    pub fn valid(&self) -> bool {
        self.source != DataSource::Invalid
    }

    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated)
    }

    /// Periodic aging: flag stale data, expire it entirely after the
    /// source-specific timeout.
    pub fn expire(&mut self, now: u64, timeout: u64, jaero_timeout: u64) {
        if self.source == DataSource::Invalid {
            return;
        }
        self.stale = now > self.updated + TRACK_STALE;

        let limit = match self.source {
            DataSource::Jaero => jaero_timeout,
            DataSource::Indirect => TRACK_EXPIRE_ROUGH,
            _ => timeout,
        };
        if now > self.updated + limit {
            self.source = DataSource::Invalid;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirGround {
    #[default]
    Invalid,
    Ground,
    Airborne,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadingType {
    #[default]
    Invalid,
    GroundTrack,
    True,
    Magnetic,
}

/// One stored CPR half with the integrity that came with it
#[derive(Debug, Clone, Copy, Default)]
pub struct CprHalf {
    pub lat: u32,
    pub lon: u32,
    pub nic: u8,
    pub rc: u32,
    pub cpr_type: CprType,
}

/// Everything we know about one airframe.
pub struct Aircraft {
    pub addr: u32,
    pub addrtype: AddrType,
    pub addrtype_updated: u64,
    /// last packet with a reliable address, ms
    pub seen: u64,
    /// last accepted position, ms
    pub seen_pos: u64,
    pub messages: u32,

    // identity
    pub callsign: String,
    pub callsign_valid: Validity,
    pub squawk: u16,
    pub squawk_valid: Validity,
    squawk_tentative: Option<u16>,
    pub category: u8,
    pub category_updated: u64,

    // altitudes
    pub baro_alt: i32,
    pub baro_alt_valid: Validity,
    pub alt_reliable: i32,
    pub geom_alt: i32,
    pub geom_alt_valid: Validity,
    pub geom_delta: i32,
    pub geom_delta_valid: Validity,

    // speeds
    pub gs: f32,
    pub gs_valid: Validity,
    pub gs_last_pos: f32,
    pub ias: u32,
    pub ias_valid: Validity,
    pub tas: u32,
    pub tas_valid: Validity,
    pub mach: f64,
    pub mach_valid: Validity,

    // angles
    pub track: f32,
    pub track_valid: Validity,
    pub track_rate: f32,
    pub track_rate_valid: Validity,
    pub roll: f32,
    pub roll_valid: Validity,
    pub mag_heading: f32,
    pub mag_heading_valid: Validity,
    pub true_heading: f32,
    pub true_heading_valid: Validity,

    // vertical rates
    pub baro_rate: i32,
    pub baro_rate_valid: Validity,
    pub geom_rate: i32,
    pub geom_rate_valid: Validity,

    // position
    pub cpr_odd: CprHalf,
    pub cpr_odd_valid: Validity,
    pub cpr_even: CprHalf,
    pub cpr_even_valid: Validity,
    pub lat: f64,
    pub lon: f64,
    pub pos_nic: u8,
    pub pos_rc: u32,
    pub pos_surface: bool,
    pub pos_reliable_odd: f32,
    pub pos_reliable_even: f32,
    pub position_valid: Validity,
    pub prev_lat: f64,
    pub prev_lon: f64,
    pub prev_pos_time: u64,

    // navigation intent
    pub nav_qnh: f32,
    pub nav_qnh_valid: Validity,
    pub nav_altitude_mcp: u32,
    pub nav_altitude_mcp_valid: Validity,
    pub nav_altitude_fms: u32,
    pub nav_altitude_fms_valid: Validity,
    pub nav_heading: f32,
    pub nav_heading_valid: Validity,
    pub nav_modes: NavModes,
    pub nav_modes_valid: Validity,
    pub nav_altitude_src: AltitudeSource,
    pub nav_altitude_src_valid: Validity,

    // status
    pub emergency: EmergencyState,
    pub emergency_valid: Validity,
    pub airground: AirGround,
    pub airground_valid: Validity,
    pub alert: bool,
    pub alert_valid: Validity,
    pub spi: bool,
    pub spi_valid: Validity,
    pub acas_ra: [u8; 7],
    pub acas_ra_valid: Validity,

    // quality indicators
    pub adsb_version: i32,
    pub adsr_version: i32,
    pub tisb_version: i32,
    pub adsb_hrd: HeadingType,
    pub adsb_tah: HeadingType,
    pub nic_a: u8,
    pub nic_a_valid: Validity,
    pub nic_c: u8,
    pub nic_c_valid: Validity,
    pub nic_baro: u8,
    pub nic_baro_valid: Validity,
    pub nac_p: u8,
    pub nac_p_valid: Validity,
    pub nac_v: u8,
    pub nac_v_valid: Validity,
    pub sil: u8,
    pub sil_valid: Validity,
    /// false per hour, true per sample
    pub sil_type_per_sample: bool,
    pub gva: u8,
    pub gva_valid: Validity,
    pub sda: u8,
    pub sda_valid: Validity,

    // derived
    pub wind_speed: f32,
    pub wind_direction: f32,
    pub wind_altitude: i32,
    pub wind_updated: u64,
    pub oat: f32,
    pub tat: f32,
    pub oat_updated: u64,
    pub magnetic_declination: f64,
    pub declination_updated: u64,
    declination_lat: f64,
    declination_lon: f64,

    // signal
    pub signal_level: [f64; 8],
    pub signal_next: usize,

    pub trace: Trace,
    pub globe_index: i32,

    /// intra-bucket chain, registry internal
    pub(crate) next: u32,
}

impl Aircraft {
    pub fn new(addr: u32, now: u64) -> Self {
        Aircraft {
            addr,
            addrtype: AddrType::Unknown,
            addrtype_updated: now,
            seen: now,
            seen_pos: 0,
            messages: 0,
            callsign: String::new(),
            callsign_valid: Validity::default(),
            squawk: 0,
            squawk_valid: Validity::default(),
            squawk_tentative: None,
            category: 0,
            category_updated: 0,
            baro_alt: 0,
            baro_alt_valid: Validity::default(),
            alt_reliable: 0,
            geom_alt: 0,
            geom_alt_valid: Validity::default(),
            geom_delta: 0,
            geom_delta_valid: Validity::default(),
            gs: 0.0,
            gs_valid: Validity::default(),
            gs_last_pos: 0.0,
            ias: 0,
            ias_valid: Validity::default(),
            tas: 0,
            tas_valid: Validity::default(),
            mach: 0.0,
            mach_valid: Validity::default(),
            track: 0.0,
            track_valid: Validity::default(),
            track_rate: 0.0,
            track_rate_valid: Validity::default(),
            roll: 0.0,
            roll_valid: Validity::default(),
            mag_heading: 0.0,
            mag_heading_valid: Validity::default(),
            true_heading: 0.0,
            true_heading_valid: Validity::default(),
            baro_rate: 0,
            baro_rate_valid: Validity::default(),
            geom_rate: 0,
            geom_rate_valid: Validity::default(),
            cpr_odd: CprHalf::default(),
            cpr_odd_valid: Validity::default(),
            cpr_even: CprHalf::default(),
            cpr_even_valid: Validity::default(),
            lat: 0.0,
            lon: 0.0,
            pos_nic: 0,
            pos_rc: 0,
            pos_surface: false,
            pos_reliable_odd: 0.0,
            pos_reliable_even: 0.0,
            position_valid: Validity::default(),
            prev_lat: 0.0,
            prev_lon: 0.0,
            prev_pos_time: 0,
            nav_qnh: 0.0,
            nav_qnh_valid: Validity::default(),
            nav_altitude_mcp: 0,
            nav_altitude_mcp_valid: Validity::default(),
            nav_altitude_fms: 0,
            nav_altitude_fms_valid: Validity::default(),
            nav_heading: 0.0,
            nav_heading_valid: Validity::default(),
            nav_modes: NavModes::default(),
            nav_modes_valid: Validity::default(),
            nav_altitude_src: AltitudeSource::Invalid,
            nav_altitude_src_valid: Validity::default(),
            emergency: EmergencyState::None,
            emergency_valid: Validity::default(),
            airground: AirGround::Invalid,
            airground_valid: Validity::default(),
            alert: false,
            alert_valid: Validity::default(),
            spi: false,
            spi_valid: Validity::default(),
            acas_ra: [0; 7],
            acas_ra_valid: Validity::default(),
            adsb_version: -1,
            adsr_version: -1,
            tisb_version: -1,
            adsb_hrd: HeadingType::Magnetic,
            adsb_tah: HeadingType::GroundTrack,
            nic_a: 0,
            nic_a_valid: Validity::default(),
            nic_c: 0,
            nic_c_valid: Validity::default(),
            nic_baro: 0,
            nic_baro_valid: Validity::default(),
            nac_p: 0,
            nac_p_valid: Validity::default(),
            nac_v: 0,
            nac_v_valid: Validity::default(),
            sil: 0,
            sil_valid: Validity::default(),
            sil_type_per_sample: false,
            gva: 0,
            gva_valid: Validity::default(),
            sda: 0,
            sda_valid: Validity::default(),
            wind_speed: 0.0,
            wind_direction: 0.0,
            wind_altitude: 0,
            wind_updated: 0,
            oat: 0.0,
            tat: 0.0,
            oat_updated: 0,
            magnetic_declination: 0.0,
            declination_updated: 0,
            declination_lat: 0.0,
            declination_lon: 0.0,
            signal_level: [0.0; 8],
            signal_next: 0,
            trace: Trace::default(),
            globe_index: -5,
            next: registry::NONE,
        }
    }

    /// Is the position good enough to expose downstream?
    pub fn pos_reliable(&self, settings: &Settings) -> bool {
        if !self.position_valid.valid() {
            return false;
        }
        // the slow and indirect sources never accumulate CPR pairs
        if matches!(
            self.position_valid.source,
            DataSource::Jaero | DataSource::Mlat | DataSource::Indirect
        ) {
            return true;
        }
        let reliable = settings.json_reliable as f32;
        self.pos_reliable_odd >= reliable && self.pos_reliable_even >= reliable
    }

    pub fn alt_baro_reliable(&self, settings: &Settings) -> bool {
        if !self.baro_alt_valid.valid() {
            return false;
        }
        self.position_valid.source == DataSource::Jaero
            || self.alt_reliable >= 2 * settings.json_reliable as i32
    }

    /// Mean signal of the last eight frames quantised to one byte
    pub fn signal_8bit(&self) -> u8 {
        let mean: f64 = self.signal_level.iter().sum::<f64>() / 8.0;
        let signal = (sqrt(mean) * 255.0).clamp(0.0, 255.0);
        if signal > 0.0 && signal < 1.0 {
            return 1;
        }
        signal.round() as u8
    }

    /// True heading if available, otherwise magnetic heading corrected by
    /// the cached declination.
    fn heading_true(&self, now: u64) -> Option<f64> {
        if self.true_heading_valid.valid() && self.true_heading_valid.age(now) < TRACK_WT_TIMEOUT
        {
            return Some(self.true_heading as f64);
        }
        if self.mag_heading_valid.valid()
            && self.mag_heading_valid.age(now) < TRACK_WT_TIMEOUT
            && self.declination_updated != 0
        {
            return Some(norm_360(
                self.mag_heading as f64 + self.magnetic_declination,
            ));
        }
        None
    }
}

/// Distance between points on a spherical earth, meters. Up to 0.5% error
/// because the earth is not actually spherical; fine for sanity checks.
pub fn greatcircle(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let lat0 = lat0.to_radians();
    let lon0 = lon0.to_radians();
    let lat1 = lat1.to_radians();
    let lon1 = lon1.to_radians();

    let dlat = fabs(lat1 - lat0);
    let dlon = fabs(lon1 - lon0);

    // haversine for small distances, for numerical stability
    if dlat < 0.001 && dlon < 0.001 {
        let a = sin(dlat / 2.0) * sin(dlat / 2.0)
            + cos(lat0) * cos(lat1) * sin(dlon / 2.0) * sin(dlon / 2.0);
        return 6371e3 * 2.0 * atan2(sqrt(a), sqrt(1.0 - a));
    }

    // spherical law of cosines
    6371e3 * libm::acos((sin(lat0) * sin(lat1) + cos(lat0) * cos(lat1) * cos(dlon)).clamp(-1.0, 1.0))
}

fn bearing(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let lat0 = lat0.to_radians();
    let lon0 = lon0.to_radians();
    let lat1 = lat1.to_radians();
    let lon1 = lon1.to_radians();

    let y = sin(lon1 - lon0) * cos(lat1);
    let x = cos(lat0) * sin(lat1) - sin(lat0) * cos(lat1) * cos(lon1 - lon0);
    let mut res = atan2(y, x).to_degrees() + 360.0;
    while res > 360.0 {
        res -= 360.0;
    }
    res
}

/// Fold an angle difference into (-limit, limit]
fn norm_diff(mut angle: f64, limit: f64) -> f64 {
    while angle <= -limit {
        angle += 2.0 * limit;
    }
    while angle > limit {
        angle -= 2.0 * limit;
    }
    angle
}

fn norm_360(mut angle: f64) -> f64 {
    while angle < 0.0 {
        angle += 360.0;
    }
    while angle >= 360.0 {
        angle -= 360.0;
    }
    angle
}

fn bogus_lat_lon(lat: f64, lon: f64) -> bool {
    if fabs(lat) >= 90.0 || fabs(lon) >= 180.0 {
        return true;
    }
    if lat == 0.0 && (lon == -90.0 || lon == 90.0 || lon == 0.0) {
        return true;
    }
    if fabs(lat) < 0.01 && fabs(lon) < 0.01 {
        return true;
    }
    false
}

/// Per-message context threaded through the field updates; collects the
/// flags the original kept on the message struct.
struct Ctx {
    now: u64,
    source: DataSource,
    addrtype: AddrType,
    receiver_id: u128,
    /// extended squitter gets the fast reduce interval
    is_es: bool,
    reduce_interval: u64,
    reduce_forward: bool,
    cpr_valid: bool,
}

/// Should we accept some new data from the given source? On acceptance the
/// validity is refreshed and the reduced-rate forwarding throttle advanced.
fn accept_data(d: &mut Validity, source: DataSource, ctx: &mut Ctx, reduce_often: bool) -> bool {
    let receive_time = ctx.now;

    if source == DataSource::Invalid {
        return false;
    }
    if receive_time < d.updated {
        return false;
    }
    if source < d.source && receive_time < d.updated + TRACK_STALE {
        return false;
    }

    // prevent JAERO and other SBS input from disrupting other data
    // sources too quickly
    if source != DataSource::ModeS && source <= DataSource::Jaero && source != d.last_source {
        if source != DataSource::Jaero && receive_time < d.updated + 60_000 {
            return false;
        }
        if source == DataSource::Jaero && receive_time < d.updated + 600_000 {
            return false;
        }
    }

    d.source = if source == DataSource::Prio {
        DataSource::Adsb
    } else {
        source
    };
    d.last_source = d.source;
    d.updated = receive_time;
    d.stale = false;

    if receive_time > d.next_reduce_forward {
        if ctx.is_es || reduce_often {
            d.next_reduce_forward = receive_time + ctx.reduce_interval;
        } else {
            d.next_reduce_forward = receive_time + ctx.reduce_interval * 4;
        }
        // keep global CPR possible even at a high reduce interval
        if ctx.reduce_interval > 7_000 && ctx.cpr_valid {
            d.next_reduce_forward = receive_time + 7_000;
        }
        ctx.reduce_forward = true;
    }
    true
}

/// A position candidate extracted from a message, handed to the CPR logic.
#[derive(Debug, Clone, Copy)]
struct CprCandidate {
    cpr_type: CprType,
    lat: u32,
    lon: u32,
    fflag: CPRFormat,
    nic: u8,
    rc: u32,
    /// surface movement if the message carried one, for the pairing window
    gs: Option<f64>,
}

/// What a message update did, for the fan-out stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Update {
    pub aircraft: u32,
    pub position: Option<Position>,
    pub position_reliable: bool,
    pub callsign_changed: bool,
    pub squawk_changed: bool,
    pub emergency_changed: bool,
    pub reduce_forward: bool,
    pub pos_bad: bool,
    pub pos_ignore: bool,
    pub cpr_relative: bool,
}

/// The tracker: per-aircraft world state fed by decoded messages.
pub struct Tracker {
    pub settings: Settings,
    pub registry: Registry,
    /// receiver-id module hook: reference location for surface decoding
    pub receiver_ref: Option<Box<dyn Fn(u128) -> Option<(f64, f64)> + Send>>,
}

impl Tracker {
    pub fn new(settings: Settings) -> Self {
        let buckets = settings.aircraft_buckets;
        Tracker {
            settings,
            registry: Registry::new(buckets),
            receiver_ref: None,
        }
    }

    /// Digest one decoded message into the aircraft state. Returns None
    /// when the message creates no aircraft (registry refusal).
    pub fn update(&mut self, msg: &TimedMessage, counters: &mut Counters) -> Option<Update> {
        let now = msg.system_timestamp;
        counters.count_source(msg.decoded.source);

        let existed = self.registry.find(msg.decoded.addr).is_some();
        let idx = self.registry.find_or_create(msg.decoded.addr, now)?;
        if !existed {
            counters.unique_aircraft += 1;
        }

        let mut ctx = Ctx {
            now,
            source: msg.decoded.source,
            addrtype: msg.decoded.addrtype,
            receiver_id: msg.receiver_id,
            is_es: matches!(
                msg.decoded.message.df,
                DF::ExtendedSquitterADSB(_) | DF::ExtendedSquitterTisB { .. }
            ),
            reduce_interval: self.settings.beast_reduce_interval,
            reduce_forward: false,
            cpr_valid: false,
        };

        let mut update = Update {
            aircraft: idx,
            ..Default::default()
        };
        let mut cpr_candidate = None;

        {
            let a = self.registry.get_mut(idx);
            a.seen = now;
            a.messages += 1;

            if msg.signal_level > 0.0 {
                a.signal_level[a.signal_next & 7] = msg.signal_level;
                a.signal_next = (a.signal_next + 1) & 7;
            }

            match &msg.decoded.message.df {
                DF::ShortAirAirSurveillance { vs, ac, .. } => {
                    let ag = if *vs == 1 {
                        AirGround::Ground
                    } else {
                        AirGround::Airborne
                    };
                    if accept_data(&mut a.airground_valid, ctx.source, &mut ctx, false) {
                        a.airground = ag;
                    }
                    if let Some(alt) = ac.0 {
                        update_baro_alt(a, alt as i32, &mut ctx, counters);
                    }
                }

                DF::LongAirAirSurveillance { vs, ac, mv, .. } => {
                    let ag = if *vs == 1 {
                        AirGround::Ground
                    } else {
                        AirGround::Airborne
                    };
                    if accept_data(&mut a.airground_valid, ctx.source, &mut ctx, false) {
                        a.airground = ag;
                    }
                    if let Some(alt) = ac.0 {
                        update_baro_alt(a, alt as i32, &mut ctx, counters);
                    }
                    // the MV field of an ACAS reply carries the active RA
                    if crate::decode::bds::bds30::acas_ra_valid(mv, true, None)
                        && accept_data(&mut a.acas_ra_valid, ctx.source, &mut ctx, false)
                    {
                        a.acas_ra = *mv;
                    }
                }

                DF::SurveillanceAltitudeReply { fs, ac, .. } => {
                    apply_flight_status(a, *fs, &mut ctx);
                    if let Some(alt) = ac.0 {
                        update_baro_alt(a, alt as i32, &mut ctx, counters);
                    }
                }

                DF::SurveillanceIdentityReply { fs, id, .. } => {
                    apply_flight_status(a, *fs, &mut ctx);
                    update.squawk_changed |= update_squawk(a, id.0, &mut ctx);
                }

                DF::AllCallReply { capability, .. } => {
                    use crate::decode::Capability::*;
                    let ag = match capability {
                        AG_GROUND => AirGround::Ground,
                        AG_AIRBORNE => AirGround::Airborne,
                        _ => AirGround::Uncertain,
                    };
                    if ag != AirGround::Uncertain
                        && accept_data(&mut a.airground_valid, ctx.source, &mut ctx, false)
                    {
                        a.airground = ag;
                    }
                }

                DF::ExtendedSquitterADSB(adsb) => {
                    cpr_candidate =
                        apply_es_message(a, &adsb.message, &mut ctx, &mut update, counters);
                }
                DF::ExtendedSquitterTisB { cf, .. } => {
                    cpr_candidate = apply_es_message(a, &cf.me, &mut ctx, &mut update, counters);
                }

                DF::CommBAltitudeReply { fs, ac, .. } => {
                    apply_flight_status(a, *fs, &mut ctx);
                    if let Some(alt) = ac.0 {
                        update_baro_alt(a, alt as i32, &mut ctx, counters);
                    }
                }
                DF::CommBIdentityReply { fs, id, .. } => {
                    apply_flight_status(a, *fs, &mut ctx);
                    update.squawk_changed |= update_squawk(a, id.0, &mut ctx);
                }

                _ => {}
            }

            if let Some(commb) = &msg.decoded.commb {
                apply_commb(a, commb, &mut ctx, &mut update);
            }

            calc_wind(a, now);
            calc_temp(a, now);
        }

        if let Some(candidate) = cpr_candidate {
            self.store_cpr_half(idx, &candidate, &mut ctx);
            self.update_position(idx, &candidate, &mut ctx, &mut update, counters);
        }

        update.reduce_forward = ctx.reduce_forward;
        update.position_reliable = {
            let a = self.registry.get(idx);
            a.pos_reliable(&self.settings)
        };
        Some(update)
    }

    fn store_cpr_half(&mut self, idx: u32, candidate: &CprCandidate, ctx: &mut Ctx) {
        let a = self.registry.get_mut(idx);
        let half = CprHalf {
            lat: candidate.lat,
            lon: candidate.lon,
            nic: candidate.nic,
            rc: candidate.rc,
            cpr_type: candidate.cpr_type,
        };
        match candidate.fflag {
            CPRFormat::Odd => {
                if accept_data(&mut a.cpr_odd_valid, ctx.source, ctx, true) {
                    a.cpr_odd = half;
                }
            }
            CPRFormat::Even => {
                if accept_data(&mut a.cpr_even_valid, ctx.source, ctx, true) {
                    a.cpr_even = half;
                }
            }
        }
    }

    /// CPR position updating: global from a recent even/odd pair, local
    /// against a reference as fallback.
    fn update_position(
        &mut self,
        idx: u32,
        candidate: &CprCandidate,
        ctx: &mut Ctx,
        update: &mut Update,
        counters: &mut Counters,
    ) {
        let now = ctx.now;
        let surface = candidate.cpr_type == CprType::Surface;

        if surface {
            counters.cpr_surface += 1;
        } else {
            counters.cpr_airborne += 1;
        }

        // Surface: 25 seconds if >25kt or speed unknown, 50 otherwise.
        // Airborne: 10 seconds.
        let max_elapsed: u64 = if surface {
            match candidate.gs {
                Some(gs) if gs <= 25.0 => 50_000,
                _ => 25_000,
            }
        } else {
            10_000
        };

        let receiver_reference = self.receiver_ref.as_ref().and_then(|f| f(ctx.receiver_id));

        let a = self.registry.get_mut(idx);
        a.pos_surface = a.airground_valid.valid() && a.airground == AirGround::Ground;

        let mut result: Result<(Position, u8, u32), CprError> = Err(CprError::Skipped);

        let pair_usable = a.cpr_odd_valid.valid()
            && a.cpr_even_valid.valid()
            && a.cpr_odd_valid.source == a.cpr_even_valid.source
            && a.cpr_odd.cpr_type == a.cpr_even.cpr_type
            && a.cpr_odd_valid.updated.abs_diff(a.cpr_even_valid.updated) <= max_elapsed;

        if pair_usable {
            // NIC and Rc from the worse half: smaller NIC, larger Rc
            let nic = a.cpr_even.nic.min(a.cpr_odd.nic);
            let rc = if a.cpr_even.rc == RC_UNKNOWN || a.cpr_odd.rc == RC_UNKNOWN {
                RC_UNKNOWN
            } else {
                a.cpr_even.rc.max(a.cpr_odd.rc)
            };

            let even = (a.cpr_even.lat, a.cpr_even.lon);
            let odd = (a.cpr_odd.lat, a.cpr_odd.lon);

            let global = if surface {
                // reference preference: receiver, aircraft, user, last seen
                let reference = receiver_reference
                    .or_else(|| {
                        if a.position_valid.valid() {
                            Some((a.lat, a.lon))
                        } else {
                            None
                        }
                    })
                    .or(self.settings.user_position())
                    .or_else(|| {
                        if a.seen_pos > 0 {
                            Some((a.lat, a.lon))
                        } else {
                            None
                        }
                    });
                match reference {
                    Some((reflat, reflon)) => {
                        cpr::decode_global_surface(reflat, reflon, even, odd, candidate.fflag)
                    }
                    None => Err(CprError::Skipped),
                }
            } else {
                cpr::decode_global_airborne(even, odd, candidate.fflag)
            };

            result = global.and_then(|pos| {
                // range check against the receiver location
                if self.settings.max_range > 0.0 {
                    if let Some((ulat, ulon)) = self.settings.user_position() {
                        let range = greatcircle(ulat, ulon, pos.latitude, pos.longitude);
                        if range > self.settings.max_range {
                            counters.cpr_global_range_checks += 1;
                            return Err(CprError::BadData);
                        }
                    }
                }

                let (ok, ignore) =
                    speed_check(a, ctx.source, pos.latitude, pos.longitude, candidate);
                update.pos_ignore |= ignore;
                if !ok {
                    counters.cpr_global_speed_checks += 1;
                    return Err(CprError::BadData);
                }
                Ok((pos, nic, rc))
            });

            match result {
                Ok(_) => {
                    if accept_data(&mut a.position_valid, ctx.source, ctx, true) {
                        counters.cpr_global_ok += 1;

                        let persist = self.settings.filter_persistence as f32;
                        if a.pos_reliable_odd <= 0.0 || a.pos_reliable_even <= 0.0 {
                            a.pos_reliable_odd = 1.0;
                            a.pos_reliable_even = 1.0;
                        } else if candidate.fflag == CPRFormat::Odd {
                            a.pos_reliable_odd = (a.pos_reliable_odd + 1.0).min(persist);
                        } else {
                            a.pos_reliable_even = (a.pos_reliable_even + 1.0).min(persist);
                        }

                        if a.gs_valid.valid() {
                            a.gs_last_pos = a.gs;
                        }
                    } else {
                        counters.cpr_global_skipped += 1;
                        result = Err(CprError::BadData);
                    }
                }
                Err(CprError::BadData) => {
                    // Global CPR produced implausible results: bad data.
                    // At least one of the halves is wrong, poison both.
                    position_bad(a, update, counters);
                    return;
                }
                Err(CprError::Skipped) => {
                    counters.cpr_global_skipped += 1;
                }
            }
        }

        // otherwise try relative CPR
        if result.is_err() {
            let local = self.local_cpr(idx, candidate, ctx, update, counters);
            let a = self.registry.get_mut(idx);
            match local {
                Some((pos, nic, rc, aircraft_relative)) => {
                    if accept_data(&mut a.position_valid, ctx.source, ctx, true) {
                        counters.cpr_local_ok += 1;
                        update.cpr_relative = true;
                        if aircraft_relative {
                            counters.cpr_local_aircraft_relative += 1;
                        } else {
                            counters.cpr_local_receiver_relative += 1;
                        }
                        if a.gs_valid.valid() {
                            a.gs_last_pos = a.gs;
                        }
                        // a local decode refreshes confidence in the half
                        // it used, without the global floor
                        let persist = self.settings.filter_persistence as f32;
                        match candidate.fflag {
                            CPRFormat::Odd => {
                                a.pos_reliable_odd = (a.pos_reliable_odd + 1.0).min(persist)
                            }
                            CPRFormat::Even => {
                                a.pos_reliable_even = (a.pos_reliable_even + 1.0).min(persist)
                            }
                        }
                        result = Ok((pos, nic, rc));
                    } else {
                        counters.cpr_local_skipped += 1;
                    }
                }
                None => {
                    counters.cpr_local_skipped += 1;
                }
            }
        }

        let Ok((pos, nic, rc)) = result else {
            return;
        };

        self.set_position(idx, pos, nic, rc, ctx, update, counters);
    }

    /// Relative CPR against the aircraft's own last position (within ten
    /// minutes, 100 NM limit) or the receiver location (airborne only,
    /// limited by the configured max range).
    fn local_cpr(
        &mut self,
        idx: u32,
        candidate: &CprCandidate,
        ctx: &mut Ctx,
        update: &mut Update,
        counters: &mut Counters,
    ) -> Option<(Position, u8, u32, bool)> {
        let surface = candidate.cpr_type == CprType::Surface;
        let a = self.registry.get_mut(idx);

        let mut nic = candidate.nic;
        let mut rc = candidate.rc;

        let (reflat, reflon, range_limit, aircraft_relative) =
            if ctx.now < a.position_valid.updated + 10 * 60 * 1000 && a.seen_pos > 0 {
                // 100 NM in ten minutes is 600 knots: fast but possible. A
                // wrong cell would need the aircraft to cover 260 NM in
                // that window, which nothing subsonic does.
                if a.pos_nic < nic {
                    nic = a.pos_nic;
                }
                if a.pos_rc != RC_UNKNOWN && (rc == RC_UNKNOWN || a.pos_rc > rc) {
                    rc = a.pos_rc;
                }
                (a.lat, a.lon, 1852.0 * 100.0, true)
            } else if !surface && self.settings.user_position().is_some() {
                let (ulat, ulon) = self.settings.user_position().unwrap();
                // The zone is at least 360 NM wide, the nominal max range
                // half of that. A receiver hearing beyond half a zone
                // needs the admissible range reduced to stay unambiguous.
                let max_range = self.settings.max_range;
                let limit = if max_range <= 0.0 {
                    return None;
                } else if max_range <= 1852.0 * 180.0 {
                    max_range
                } else if max_range < 1852.0 * 360.0 {
                    1852.0 * 360.0 - max_range
                } else {
                    return None;
                };
                (ulat, ulon, limit, false)
            } else {
                return None;
            };

        let pos = cpr::decode_local(
            candidate.lat,
            candidate.lon,
            candidate.fflag,
            surface,
            reflat,
            reflon,
        )
        .ok()?;

        if range_limit > 0.0 {
            let range = greatcircle(reflat, reflon, pos.latitude, pos.longitude);
            if range > range_limit {
                counters.cpr_local_range_checks += 1;
                return None;
            }
        }

        let (ok, ignore) = speed_check(a, ctx.source, pos.latitude, pos.longitude, candidate);
        update.pos_ignore |= ignore;
        if !ok {
            counters.cpr_local_speed_checks += 1;
            return None;
        }

        Some((pos, nic, rc, aircraft_relative))
    }

    fn set_position(
        &mut self,
        idx: u32,
        pos: Position,
        nic: u8,
        rc: u32,
        ctx: &mut Ctx,
        update: &mut Update,
        counters: &mut Counters,
    ) {
        let now = ctx.now;
        let settings_max_range = self.settings.max_range;
        let user_position = self.settings.user_position();

        let a = self.registry.get_mut(idx);

        a.prev_lat = a.lat;
        a.prev_lon = a.lon;
        a.prev_pos_time = a.seen_pos;

        a.lat = pos.latitude;
        a.lon = pos.longitude;
        a.pos_nic = nic;
        a.pos_rc = rc;
        a.pos_surface = a.airground_valid.valid() && a.airground == AirGround::Ground;
        a.seen_pos = now;

        // the address type follows the accepted position
        a.addrtype = ctx.addrtype;
        a.addrtype_updated = now;

        a.globe_index = globe::globe_index(pos.latitude, pos.longitude);

        if a.pos_reliable_odd >= 2.0 && a.pos_reliable_even >= 2.0 && ctx.source == DataSource::Adsb
        {
            if let Some((ulat, ulon)) = user_position {
                let range = greatcircle(ulat, ulon, pos.latitude, pos.longitude);
                update_range_histogram(counters, range, settings_max_range);
            }
        }

        counters.pos_all += 1;
        update.position = Some(pos);

        // refresh the magnetic declination when the aircraft moved far
        // enough from where it was computed
        if a.declination_updated == 0
            || now > a.declination_updated + 20 * 60 * 1000
            || greatcircle(a.declination_lat, a.declination_lon, a.lat, a.lon) > 50_000.0
        {
            if let Some(declination) =
                geomag::declination(a.lat, a.lon, a.baro_alt.max(0) as f64 * 0.3048, now)
            {
                a.magnetic_declination = declination;
                a.declination_updated = now;
                a.declination_lat = a.lat;
                a.declination_lon = a.lon;
            }
        }

        // feed the trace
        let settings = self.settings.clone();
        let input = build_trace_input(a, now, &settings);
        trace::trace_add(&mut a.trace, input, &settings);
    }

    /// Periodic aging of every validity plus the reap of aircraft that
    /// went quiet. Call about once a second.
    pub fn remove_stale(&mut self, now: u64) {
        let expire_jaero = self.settings.track_expire_jaero;
        let track_expire = self.settings.track_expire;
        let trace_max = self.settings.trace_max;

        let mut to_remove = Vec::new();
        for idx in self.registry.indices() {
            let a = self.registry.get_mut(idx);
            update_validities(a, now, expire_jaero);

            // flush a buffered trace point once the aircraft goes quiet
            if now > a.seen + 60_000 {
                a.trace.flush_buffered(trace_max);
            }

            let expire = if a.position_valid.source == DataSource::Jaero {
                expire_jaero
            } else {
                track_expire
            };
            if now > a.seen + expire && !a.position_valid.valid() {
                to_remove.push(a.addr);
            }
        }

        for addr in to_remove {
            self.registry.remove(addr);
        }
    }
}

/// Age every validity of an aircraft.
pub fn update_validities(a: &mut Aircraft, now: u64, jaero_timeout: u64) {
    let t = TRACK_EXPIRE;
    a.callsign_valid.expire(now, t, jaero_timeout);
    a.squawk_valid.expire(now, t, jaero_timeout);
    a.baro_alt_valid.expire(now, t, jaero_timeout);
    a.geom_alt_valid.expire(now, t, jaero_timeout);
    a.geom_delta_valid.expire(now, t, jaero_timeout);
    a.gs_valid.expire(now, t, jaero_timeout);
    a.ias_valid.expire(now, t, jaero_timeout);
    a.tas_valid.expire(now, t, jaero_timeout);
    a.mach_valid.expire(now, t, jaero_timeout);
    a.track_valid.expire(now, t, jaero_timeout);
    a.track_rate_valid.expire(now, t, jaero_timeout);
    a.roll_valid.expire(now, t, jaero_timeout);
    a.mag_heading_valid.expire(now, t, jaero_timeout);
    a.true_heading_valid.expire(now, t, jaero_timeout);
    a.baro_rate_valid.expire(now, t, jaero_timeout);
    a.geom_rate_valid.expire(now, t, jaero_timeout);
    a.nic_a_valid.expire(now, t, jaero_timeout);
    a.nic_c_valid.expire(now, t, jaero_timeout);
    a.nic_baro_valid.expire(now, t, jaero_timeout);
    a.nac_p_valid.expire(now, t, jaero_timeout);
    a.nac_v_valid.expire(now, t, jaero_timeout);
    a.sil_valid.expire(now, t, jaero_timeout);
    a.gva_valid.expire(now, t, jaero_timeout);
    a.sda_valid.expire(now, t, jaero_timeout);
    a.emergency_valid.expire(now, t, jaero_timeout);
    a.airground_valid.expire(now, t, jaero_timeout);
    a.nav_qnh_valid.expire(now, t, jaero_timeout);
    a.nav_altitude_mcp_valid.expire(now, t, jaero_timeout);
    a.nav_altitude_fms_valid.expire(now, t, jaero_timeout);
    a.nav_altitude_src_valid.expire(now, t, jaero_timeout);
    a.nav_heading_valid.expire(now, t, jaero_timeout);
    a.nav_modes_valid.expire(now, t, jaero_timeout);
    a.cpr_odd_valid.expire(now, t, jaero_timeout);
    a.cpr_even_valid.expire(now, t, jaero_timeout);
    a.position_valid.expire(now, t, jaero_timeout);
    a.alert_valid.expire(now, t, jaero_timeout);
    a.spi_valid.expire(now, t, jaero_timeout);
    a.acas_ra_valid.expire(now, t, jaero_timeout);

    if now > a.wind_updated + WIND_TIMEOUT {
        a.wind_updated = 0;
    }
    if now > a.oat_updated + WIND_TIMEOUT {
        a.oat_updated = 0;
    }
}

/// Is it OK for the aircraft to have travelled from its last known
/// position to (lat, lon) right now? Returns (in_range, ignore): an
/// ignored sample is dropped without denting the reliability counters.
fn speed_check(
    a: &Aircraft,
    source: DataSource,
    lat: f64,
    lon: f64,
    candidate: &CprCandidate,
) -> (bool, bool) {
    let now = a.seen;

    if bogus_lat_lon(lat, lon) || (candidate.lat == 0 && candidate.lon == 0) {
        return (false, true);
    }

    let surface = a.airground_valid.valid()
        && a.airground == AirGround::Ground
        && a.pos_surface
        && candidate.cpr_type == CprType::Surface;

    if a.pos_reliable_odd < 1.0 && a.pos_reliable_even < 1.0 {
        return (true, false);
    }
    if now > a.position_valid.updated + 120_000 {
        return (true, false); // no recent reference, assume OK
    }
    if source > a.position_valid.last_source {
        return (true, false); // better quality data overrides
    }

    let elapsed = a.position_valid.age(now);

    let mut speed: f64 = if surface { 150.0 } else { 900.0 }; // guess
    if a.gs_valid.valid() {
        // the larger of the current and the last position's speed, plus
        // three knots for every second the speed has not been updated
        speed = a.gs_last_pos.max(a.gs) as f64;
        speed += 3.0 * a.gs_valid.age(now) as f64 / 1000.0;
    } else if a.tas_valid.valid() {
        speed = a.tas as f64 * 4.0 / 3.0;
    } else if a.ias_valid.valid() {
        speed = a.ias as f64 * 2.0;
    }

    if source <= DataSource::Mlat {
        if elapsed > 15_000 {
            return (true, false);
        }
        speed = (speed * 2.0).min(2400.0);
    }

    // a reasonable limit: current speed plus a third, with a floor of
    // 200 kt airborne / 20 kt surface and a surface cap of 150 kt
    speed *= 1.3;
    if surface {
        speed = speed.clamp(20.0, 150.0);
    } else {
        speed = speed.max(200.0);
    }

    let distance = greatcircle(a.lat, a.lon, lat, lon);
    let mut ignore = false;

    // bearings consistent with the tracked heading raise the limit
    if !surface
        && distance > 5.0
        && source > DataSource::Mlat
        && a.track_valid.age(now) < 7_000
        && a.position_valid.age(now) < 7_000
        && (a.lat != lat || a.lon != lon)
        && a.pos_reliable_odd >= 2.0
        && a.pos_reliable_even >= 2.0
    {
        let calc_track = bearing(a.lat, a.lon, lat, lon);
        let track_diff = fabs(norm_diff(a.track as f64 - calc_track, 180.0));
        let track_bonus = speed * (90.0 - track_diff) / 90.0;
        speed += track_bonus * (1.1 - a.track_valid.age(now) as f64 / 5000.0);
        if track_diff > 170.0 {
            ignore = true; // a reversal, drop without punishing
        }
    }

    // 100 m base distance on the surface for minor errors; airborne gets
    // no base because the ground track cross check covers it
    let base = if surface { 100.0 } else { 0.0 };
    let range = base + ((elapsed as f64 + 1000.0) / 1000.0) * (speed * 1852.0 / 3600.0);

    (distance <= range, ignore)
}

/// Global CPR went bad: poison both halves, dent the reliability, and
/// invalidate the position once both counters are gone.
fn position_bad(a: &mut Aircraft, update: &mut Update, counters: &mut Counters) {
    counters.cpr_global_bad += 1;
    update.pos_bad = true;

    a.cpr_odd_valid.source = DataSource::Invalid;
    a.cpr_even_valid.source = DataSource::Invalid;

    if update.pos_ignore {
        return;
    }

    a.pos_reliable_odd = (a.pos_reliable_odd - 1.0).max(0.0);
    a.pos_reliable_even = (a.pos_reliable_even - 1.0).max(0.0);

    if a.pos_reliable_odd <= 0.0 && a.pos_reliable_even <= 0.0 {
        a.position_valid.source = DataSource::Invalid;
    }
}

fn apply_flight_status(a: &mut Aircraft, fs: crate::decode::FlightStatus, ctx: &mut Ctx) {
    if let Some(on_ground) = fs.on_ground() {
        if accept_data(&mut a.airground_valid, ctx.source, ctx, false) {
            a.airground = if on_ground {
                AirGround::Ground
            } else {
                AirGround::Airborne
            };
        }
    }
    if accept_data(&mut a.alert_valid, ctx.source, ctx, false) {
        a.alert = fs.alert();
    }
    if accept_data(&mut a.spi_valid, ctx.source, ctx, false) {
        a.spi = fs.spi();
    }
}

/// Squawks only stick once the same code was seen twice: a single damaged
/// reply must not repaint an aircraft.
fn update_squawk(a: &mut Aircraft, squawk: u16, ctx: &mut Ctx) -> bool {
    if a.squawk_valid.valid() && a.squawk == squawk {
        accept_data(&mut a.squawk_valid, ctx.source, ctx, false);
        return false;
    }
    if a.squawk_tentative == Some(squawk) || ctx.is_es {
        if accept_data(&mut a.squawk_valid, ctx.source, ctx, false) {
            let changed = a.squawk != squawk;
            a.squawk = squawk;
            a.squawk_tentative = None;
            return changed;
        }
        return false;
    }
    a.squawk_tentative = Some(squawk);
    false
}

fn update_baro_alt(a: &mut Aircraft, alt: i32, ctx: &mut Ctx, counters: &mut Counters) {
    if a.baro_alt_valid.valid() && a.alt_reliable > 0 {
        let delta = (alt - a.baro_alt).abs();
        // an implausible jump: more than 8000 ft in under ten seconds
        if delta > 8_000 && a.baro_alt_valid.age(ctx.now) < 10_000 {
            a.alt_reliable -= 4;
            if a.alt_reliable > 0 {
                counters.suppressed_altitude_messages += 1;
                return;
            }
            // confidence used up: start over with the new value
            a.alt_reliable = 0;
        }
    }

    if accept_data(&mut a.baro_alt_valid, ctx.source, ctx, false) {
        a.baro_alt = alt;
        a.alt_reliable = (a.alt_reliable + 1).min(ALTITUDE_BARO_RELIABLE_MAX);
    }
}

fn update_geom_alt(a: &mut Aircraft, alt: i32, ctx: &mut Ctx) {
    if accept_data(&mut a.geom_alt_valid, ctx.source, ctx, false) {
        a.geom_alt = alt;
    }
}

/// Extended squitter ME dispatch; returns a position candidate when the
/// message carried CPR.
fn apply_es_message(
    a: &mut Aircraft,
    me: &ME,
    ctx: &mut Ctx,
    update: &mut Update,
    counters: &mut Counters,
) -> Option<CprCandidate> {
    let mut candidate = None;

    match me {
        ME::BDS08(ident) => {
            if ident.callsign_valid()
                && accept_data(&mut a.callsign_valid, ctx.source, ctx, false)
            {
                update.callsign_changed = a.callsign != ident.callsign;
                a.callsign = ident.callsign.clone();
            }
            a.category = ident.category();
            a.category_updated = ctx.now;
        }

        ME::BDS05(pos) => {
            ctx.cpr_valid = true;
            apply_surveillance_status(a, pos.ss, ctx);

            if let Some(alt) = pos.alt {
                if pos.gnss_height() {
                    update_geom_alt(a, alt as i32, ctx);
                } else {
                    update_baro_alt(a, alt as i32, ctx, counters);
                }
            }

            if accept_data(&mut a.airground_valid, ctx.source, ctx, false) {
                a.airground = AirGround::Airborne;
            }

            let version = version_for(a, ctx.addrtype);
            let nic_a = a.nic_a_valid.valid() && a.nic_a != 0;
            let nic_b = pos.nic_b != 0;
            let nic_c = a.nic_c_valid.valid() && a.nic_c != 0;
            let nic = compute_nic(pos.tc, version, nic_a, nic_b, nic_c);
            let rc = compute_rc(pos.tc, version, nic_a, nic_b, nic_c);

            if version == 0 {
                apply_v0_quality(a, pos.tc, ctx);
            }

            candidate = Some(CprCandidate {
                cpr_type: CprType::Airborne,
                lat: pos.lat_cpr,
                lon: pos.lon_cpr,
                fflag: pos.parity,
                nic,
                rc,
                gs: None,
            });
        }

        ME::BDS06(pos) => {
            ctx.cpr_valid = true;

            if accept_data(&mut a.airground_valid, ctx.source, ctx, false) {
                a.airground = AirGround::Ground;
            }
            if let Some(gs) = pos.groundspeed {
                if accept_data(&mut a.gs_valid, ctx.source, ctx, false) {
                    a.gs = gs as f32;
                }
            }
            if let Some(track) = pos.track {
                if accept_data(&mut a.track_valid, ctx.source, ctx, false) {
                    a.track = track as f32;
                }
            }

            let version = version_for(a, ctx.addrtype);
            let nic_a = a.nic_a_valid.valid() && a.nic_a != 0;
            let nic_c = a.nic_c_valid.valid() && a.nic_c != 0;
            let nic = compute_nic(pos.tc, version, nic_a, false, nic_c);
            let rc = compute_rc(pos.tc, version, nic_a, false, nic_c);

            if version == 0 {
                apply_v0_quality(a, pos.tc, ctx);
            }

            candidate = Some(CprCandidate {
                cpr_type: CprType::Surface,
                lat: pos.lat_cpr,
                lon: pos.lon_cpr,
                fflag: pos.parity,
                nic,
                rc,
                gs: pos.groundspeed,
            });
        }

        ME::BDS09(velocity) => {
            if accept_data(&mut a.nac_v_valid, ctx.source, ctx, false) {
                a.nac_v = velocity.nac_v;
            }

            match &velocity.velocity {
                AirborneVelocitySubType::GroundSpeed(gs) => {
                    if accept_data(&mut a.gs_valid, ctx.source, ctx, false) {
                        a.gs = gs.groundspeed as f32;
                    }
                    if accept_data(&mut a.track_valid, ctx.source, ctx, false) {
                        a.track = gs.track as f32;
                    }
                }
                AirborneVelocitySubType::Airspeed(air) => {
                    if let Some(airspeed) = air.airspeed {
                        match air.airspeed_type {
                            AirspeedType::IAS => {
                                if accept_data(&mut a.ias_valid, ctx.source, ctx, false) {
                                    a.ias = airspeed as u32;
                                }
                            }
                            AirspeedType::TAS => {
                                if accept_data(&mut a.tas_valid, ctx.source, ctx, false) {
                                    a.tas = airspeed as u32;
                                }
                            }
                        }
                    }
                    if let Some(heading) = air.heading {
                        if accept_data(&mut a.mag_heading_valid, ctx.source, ctx, false) {
                            a.mag_heading = heading as f32;
                        }
                    }
                }
                _ => {}
            }

            if let Some(rate) = velocity.vertical_rate {
                match velocity.vrate_src {
                    VerticalRateSource::BarometricAltitude => {
                        if accept_data(&mut a.baro_rate_valid, ctx.source, ctx, false) {
                            a.baro_rate = rate as i32;
                        }
                    }
                    VerticalRateSource::GnssAltitude => {
                        if accept_data(&mut a.geom_rate_valid, ctx.source, ctx, false) {
                            a.geom_rate = rate as i32;
                        }
                    }
                }
            }

            if let Some(delta) = velocity.geo_minus_baro {
                if accept_data(&mut a.geom_delta_valid, ctx.source, ctx, false) {
                    a.geom_delta = delta as i32;
                }
                // derive the geometric altitude when it is not broadcast
                if a.baro_alt_valid.valid() && !a.geom_alt_valid.valid() {
                    let combined = combine_validity(&a.baro_alt_valid, &a.geom_delta_valid, ctx.now);
                    a.geom_alt = a.baro_alt + a.geom_delta;
                    a.geom_alt_valid = combined;
                }
            }
        }

        ME::BDS61(status) => {
            if status.subtype == AircraftStatusType::EmergencyPriorityStatus {
                if accept_data(&mut a.emergency_valid, ctx.source, ctx, false) {
                    update.emergency_changed = a.emergency != status.emergency_state;
                    a.emergency = status.emergency_state;
                }
                if status.squawk.0 != 0 {
                    update.squawk_changed |= update_squawk(a, status.squawk.0, ctx);
                }
            }
        }

        ME::BDS62(tss) => {
            if tss.subtype != 1 {
                return None;
            }
            if let Some(alt) = tss.selected_altitude {
                match tss.alt_source {
                    AltSource::Mcp => {
                        if accept_data(&mut a.nav_altitude_mcp_valid, ctx.source, ctx, false) {
                            a.nav_altitude_mcp = alt as u32;
                        }
                    }
                    AltSource::Fms => {
                        if accept_data(&mut a.nav_altitude_fms_valid, ctx.source, ctx, false) {
                            a.nav_altitude_fms = alt as u32;
                        }
                    }
                }
            }
            if let Some(qnh) = tss.barometric_setting {
                if accept_data(&mut a.nav_qnh_valid, ctx.source, ctx, false) {
                    a.nav_qnh = qnh;
                }
            }
            if let Some(heading) = tss.selected_heading {
                if accept_data(&mut a.nav_heading_valid, ctx.source, ctx, false) {
                    a.nav_heading = heading;
                }
            }
            if tss.mode_status && accept_data(&mut a.nav_modes_valid, ctx.source, ctx, false) {
                a.nav_modes = NavModes {
                    vnav: tss.vnav_mode,
                    alt_hold: tss.alt_hold,
                    approach: tss.approach_mode,
                };
            }
            if accept_data(&mut a.nac_p_valid, ctx.source, ctx, false) {
                a.nac_p = tss.nac_p;
            }
            if accept_data(&mut a.sil_valid, ctx.source, ctx, false) {
                a.sil = tss.sil;
                a.sil_type_per_sample = tss.sil_supplement;
            }
            if accept_data(&mut a.nic_baro_valid, ctx.source, ctx, false) {
                a.nic_baro = tss.nic_baro;
            }
        }

        ME::BDS65(opstatus) => {
            let version = opstatus.version() as i32;
            match ctx.addrtype {
                AddrType::AdsrIcao | AddrType::AdsrOther => a.adsr_version = version,
                AddrType::TisbIcao | AddrType::TisbTrackfile | AddrType::TisbOther => {
                    a.tisb_version = version
                }
                _ => a.adsb_version = version,
            }

            match opstatus {
                OperationStatus::Airborne(st) => {
                    if st.version >= 1 {
                        if accept_data(&mut a.nic_a_valid, ctx.source, ctx, false) {
                            a.nic_a = st.nic_a;
                        }
                        if accept_data(&mut a.nac_p_valid, ctx.source, ctx, false) {
                            a.nac_p = st.nac_p;
                        }
                        if accept_data(&mut a.sil_valid, ctx.source, ctx, false) {
                            a.sil = st.sil;
                            a.sil_type_per_sample = st.sil_supplement;
                        }
                        if accept_data(&mut a.nic_baro_valid, ctx.source, ctx, false) {
                            a.nic_baro = st.nic_baro;
                        }
                        if st.version == 2 {
                            if accept_data(&mut a.gva_valid, ctx.source, ctx, false) {
                                a.gva = st.gva;
                            }
                            if accept_data(&mut a.sda_valid, ctx.source, ctx, false) {
                                a.sda = st.operational_mode.sda;
                            }
                        }
                        a.adsb_hrd = if st.hrd_magnetic {
                            HeadingType::Magnetic
                        } else {
                            HeadingType::True
                        };
                    }
                }
                OperationStatus::Surface(st) => {
                    if st.version >= 1 {
                        if accept_data(&mut a.nic_a_valid, ctx.source, ctx, false) {
                            a.nic_a = st.nic_a;
                        }
                        if accept_data(&mut a.nic_c_valid, ctx.source, ctx, false) {
                            a.nic_c = st.capability_class.nic_c;
                        }
                        if accept_data(&mut a.nac_v_valid, ctx.source, ctx, false) {
                            a.nac_v = st.capability_class.nac_v;
                        }
                        if accept_data(&mut a.nac_p_valid, ctx.source, ctx, false) {
                            a.nac_p = st.nac_p;
                        }
                        if accept_data(&mut a.sil_valid, ctx.source, ctx, false) {
                            a.sil = st.sil;
                            a.sil_type_per_sample = st.sil_supplement;
                        }
                        if st.version == 2
                            && accept_data(&mut a.sda_valid, ctx.source, ctx, false)
                        {
                            a.sda = st.operational_mode.sda;
                        }
                        a.adsb_hrd = if st.hrd_magnetic {
                            HeadingType::Magnetic
                        } else {
                            HeadingType::True
                        };
                        a.adsb_tah = if st.tah_heading {
                            HeadingType::Magnetic
                        } else {
                            HeadingType::GroundTrack
                        };
                    }
                }
                OperationStatus::Reserved(..) => {}
            }
        }

        _ => {}
    }

    candidate
}

fn apply_surveillance_status(a: &mut Aircraft, ss: SurveillanceStatus, ctx: &mut Ctx) {
    match ss {
        SurveillanceStatus::PermanentAlert | SurveillanceStatus::TemporaryAlert => {
            if accept_data(&mut a.alert_valid, ctx.source, ctx, false) {
                a.alert = true;
            }
        }
        SurveillanceStatus::SpiCondition => {
            if accept_data(&mut a.spi_valid, ctx.source, ctx, false) {
                a.spi = true;
            }
        }
        SurveillanceStatus::NoCondition => {
            if accept_data(&mut a.alert_valid, ctx.source, ctx, false) {
                a.alert = false;
            }
            if accept_data(&mut a.spi_valid, ctx.source, ctx, false) {
                a.spi = false;
            }
        }
    }
}

fn apply_commb(a: &mut Aircraft, commb: &CommB, ctx: &mut Ctx, update: &mut Update) {
    match commb {
        CommB::AircraftIdent(ident) => {
            let valid = ident
                .callsign
                .bytes()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == b' ');
            if valid && accept_data(&mut a.callsign_valid, ctx.source, ctx, false) {
                update.callsign_changed = a.callsign != ident.callsign;
                a.callsign = ident.callsign.clone();
            }
        }

        CommB::VerticalIntent(intent) => {
            if let Some(alt) = intent.mcp_altitude {
                if accept_data(&mut a.nav_altitude_mcp_valid, ctx.source, ctx, false) {
                    a.nav_altitude_mcp = alt;
                }
            }
            if let Some(alt) = intent.fms_altitude {
                if accept_data(&mut a.nav_altitude_fms_valid, ctx.source, ctx, false) {
                    a.nav_altitude_fms = alt;
                }
            }
            if let Some(qnh) = intent.qnh {
                if accept_data(&mut a.nav_qnh_valid, ctx.source, ctx, false) {
                    a.nav_qnh = qnh;
                }
            }
            if let Some(modes) = intent.modes {
                if accept_data(&mut a.nav_modes_valid, ctx.source, ctx, false) {
                    a.nav_modes = modes;
                }
            }
            if intent.altitude_source != AltitudeSource::Invalid
                && accept_data(&mut a.nav_altitude_src_valid, ctx.source, ctx, false)
            {
                a.nav_altitude_src = intent.altitude_source;
            }
        }

        CommB::TrackTurn(report) => {
            if let Some(roll) = report.roll {
                if accept_data(&mut a.roll_valid, ctx.source, ctx, false) {
                    a.roll = roll;
                }
            }
            if let Some(track) = report.track {
                if accept_data(&mut a.track_valid, ctx.source, ctx, false) {
                    a.track = track;
                }
            }
            if let Some(gs) = report.gs {
                if accept_data(&mut a.gs_valid, ctx.source, ctx, false) {
                    a.gs = gs as f32;
                }
            }
            if let Some(rate) = report.track_rate {
                if accept_data(&mut a.track_rate_valid, ctx.source, ctx, false) {
                    a.track_rate = rate;
                }
            }
            if let Some(tas) = report.tas {
                if accept_data(&mut a.tas_valid, ctx.source, ctx, false) {
                    a.tas = tas as u32;
                }
            }
        }

        CommB::HeadingSpeed(report) => {
            if let Some(heading) = report.mag_heading {
                if accept_data(&mut a.mag_heading_valid, ctx.source, ctx, false) {
                    a.mag_heading = heading;
                }
            }
            if let Some(ias) = report.ias {
                if accept_data(&mut a.ias_valid, ctx.source, ctx, false) {
                    a.ias = ias as u32;
                }
            }
            if let Some(mach) = report.mach {
                if accept_data(&mut a.mach_valid, ctx.source, ctx, false) {
                    a.mach = mach as f64;
                }
            }
            if let Some(rate) = report.baro_rate {
                if accept_data(&mut a.baro_rate_valid, ctx.source, ctx, false) {
                    a.baro_rate = rate;
                }
            }
            if let Some(rate) = report.inertial_rate {
                // INS-derived data is treated as geometric elsewhere
                if accept_data(&mut a.geom_rate_valid, ctx.source, ctx, false) {
                    a.geom_rate = rate;
                }
            }
        }

        CommB::Meteorological(met) => {
            if let Some((speed, direction)) = met.wind {
                if a.baro_alt_valid.valid() {
                    a.wind_speed = speed as f32;
                    a.wind_direction = direction;
                    a.wind_altitude = a.baro_alt;
                    a.wind_updated = ctx.now;
                }
            }
            a.oat = met.temperature;
            a.tat = met.temperature; // no mach pairing here
            a.oat_updated = ctx.now;
        }

        CommB::AcasRa(_) => {
            if accept_data(&mut a.acas_ra_valid, ctx.source, ctx, false) {
                // raw MB bytes were validated by the scorer
            }
        }

        _ => {}
    }
}

fn combine_validity(from1: &Validity, from2: &Validity, now: u64) -> Validity {
    if !from1.valid() {
        return *from2;
    }
    if !from2.valid() {
        return *from1;
    }
    let source = from1.source.min(from2.source); // the worse of the two
    let updated = from1.updated.max(from2.updated); // the later of the two
    Validity {
        updated,
        next_reduce_forward: from1.next_reduce_forward,
        source,
        last_source: source,
        stale: now > updated + TRACK_STALE,
    }
}

fn version_for(a: &Aircraft, addrtype: AddrType) -> u8 {
    let version = match addrtype {
        AddrType::AdsrIcao | AddrType::AdsrOther => a.adsr_version,
        AddrType::TisbIcao | AddrType::TisbTrackfile | AddrType::TisbOther => a.tisb_version,
        _ => a.adsb_version,
    };
    version.clamp(0, 2) as u8
}

/// NACp implied by a version 0 position message type (ED-102A Table N-7)
fn compute_v0_nacp(metype: u8) -> Option<u8> {
    match metype {
        0 => Some(0),
        5 => Some(11),
        6 => Some(10),
        7 => Some(8),
        8 => Some(0),
        9 => Some(11),
        10 => Some(10),
        11 => Some(8),
        12 => Some(7),
        13 => Some(6),
        14 => Some(5),
        15 => Some(4),
        16 | 17 => Some(1),
        18 => Some(0),
        20 => Some(11),
        21 => Some(10),
        22 => Some(0),
        _ => None,
    }
}

/// SIL implied by a version 0 position message type (ED-102A Table N-8)
fn compute_v0_sil(metype: u8) -> Option<u8> {
    match metype {
        0 | 18 | 22 => Some(0),
        5..=17 | 20 | 21 => Some(2),
        _ => None,
    }
}

fn apply_v0_quality(a: &mut Aircraft, metype: u8, ctx: &mut Ctx) {
    if let Some(nacp) = compute_v0_nacp(metype) {
        if accept_data(&mut a.nac_p_valid, ctx.source, ctx, false) {
            a.nac_p = nacp;
        }
    }
    if let Some(sil) = compute_v0_sil(metype) {
        if accept_data(&mut a.sil_valid, ctx.source, ctx, false) {
            a.sil = sil;
            a.sil_type_per_sample = false;
        }
    }
}

/// Navigation integrity category from the position typecode, the ADS-B
/// version and the NIC supplements.
pub fn compute_nic(metype: u8, version: u8, nic_a: bool, nic_b: bool, nic_c: bool) -> u8 {
    match metype {
        5 | 9 | 20 => 11,
        6 | 10 | 21 => 10,
        7 => match version {
            2 if nic_a && !nic_c => 9,
            1 if nic_a => 9,
            _ => 8,
        },
        8 => {
            if version == 2 {
                match (nic_a, nic_c) {
                    (true, true) => 7,
                    (true, false) | (false, true) => 6,
                    _ => 0,
                }
            } else {
                0
            }
        }
        11 => match version {
            2 if nic_a && nic_b => 9,
            1 if nic_a => 9,
            _ => 8,
        },
        12 => 7,
        13 => 6,
        14 => 5,
        15 => 4,
        16 => {
            if nic_a && nic_b {
                3
            } else {
                2
            }
        }
        17 => 1,
        _ => 0,
    }
}

/// Containment radius in meters from the same inputs.
pub fn compute_rc(metype: u8, version: u8, nic_a: bool, nic_b: bool, nic_c: bool) -> u32 {
    match metype {
        5 | 9 | 20 => 8, // 7.5 m
        6 | 10 | 21 => 25,
        7 => match version {
            2 if nic_a && !nic_c => 75,
            1 if nic_a => 75,
            _ => 186, // 185.2 m, 0.1 NM
        },
        8 => {
            if version == 2 {
                match (nic_a, nic_c) {
                    (true, true) => 371,   // 0.2 NM
                    (true, false) => 556,  // 0.3 NM
                    (false, true) => 926,  // 0.5 NM
                    _ => RC_UNKNOWN,
                }
            } else {
                RC_UNKNOWN
            }
        }
        11 => match version {
            2 if nic_a && nic_b => 75,
            1 if nic_a => 75,
            _ => 186,
        },
        12 => 371,
        13 => match version {
            2 => match (nic_a, nic_b) {
                (false, true) => 556,
                (false, false) => 926,
                (true, true) => 1112, // 0.6 NM
                _ => RC_UNKNOWN,
            },
            1 => {
                if nic_a {
                    1112
                } else {
                    926
                }
            }
            _ => 926,
        },
        14 => 1852,  // 1 NM
        15 => 3704,  // 2 NM
        16 => match version {
            2 | 1 => {
                if nic_a && nic_b {
                    7408 // 4 NM
                } else {
                    14816 // 8 NM
                }
            }
            _ => 18520, // 10 NM
        },
        17 => 37040, // 20 NM
        _ => RC_UNKNOWN,
    }
}

/// When heading, track and speeds land within the pairing window, the wind
/// is the difference between the air vector and the ground vector.
fn calc_wind(a: &mut Aircraft, now: u64) {
    if !a.tas_valid.valid()
        || a.airground == AirGround::Ground
        || !a.position_valid.valid()
        || a.tas_valid.age(now) > TRACK_WT_TIMEOUT
        || a.gs_valid.age(now) > TRACK_WT_TIMEOUT
        || a.track_valid.age(now) > TRACK_WT_TIMEOUT
        || !a.gs_valid.valid()
        || !a.track_valid.valid()
    {
        return;
    }
    let Some(heading) = a.heading_true(now) else {
        return;
    };

    let trk = (a.track as f64).to_radians();
    let hdg = heading.to_radians();
    let tas = a.tas as f64;
    let gs = a.gs as f64;

    let crab = norm_diff(hdg - trk, std::f64::consts::PI);
    let headwind = gs - tas * cos(crab);
    let crosswind = tas * sin(crab);

    let ws = sqrt(headwind * headwind + crosswind * crosswind);
    if ws > 250.0 {
        // implausible, drop the sample
        return;
    }
    let wd = norm_360(heading + atan2(crosswind, headwind).to_degrees());

    a.wind_speed = ws as f32;
    a.wind_direction = wd as f32;
    a.wind_altitude = if a.baro_alt_valid.valid() { a.baro_alt } else { 0 };
    a.wind_updated = now;
}

/// Outside air temperature from the Mach/TAS ratio: the speed of sound
/// scales with the square root of the absolute temperature.
fn calc_temp(a: &mut Aircraft, now: u64) {
    if !a.mach_valid.valid()
        || a.airground == AirGround::Ground
        || a.mach < 0.395
        || !a.tas_valid.valid()
        || a.mach_valid.age(now) > TRACK_WT_TIMEOUT
        || a.tas_valid.age(now) > TRACK_WT_TIMEOUT
    {
        return;
    }

    let tas = a.tas as f64;
    let oat = (tas / (39.0 * a.mach)) * (tas / (39.0 * a.mach)) - 273.15;
    let tat = (oat + 273.15) * (1.0 + 0.2 * a.mach * a.mach) - 273.15;

    a.oat = oat as f32;
    a.tat = tat as f32;
    a.oat_updated = now;
}

/// Snapshot the aircraft for the trace policy.
fn build_trace_input(a: &Aircraft, now: u64, settings: &Settings) -> TraceInput {
    let on_ground = a.airground == AirGround::Ground;
    let ag_valid = a.airground_valid.valid() && a.airground != AirGround::Invalid;

    let track = if on_ground {
        if a.true_heading_valid.valid() {
            Some(a.true_heading)
        } else {
            None
        }
    } else if a.track_valid.valid() {
        Some(a.track)
    } else {
        None
    };

    TraceInput {
        now,
        lat: a.lat,
        lon: a.lon,
        on_ground,
        ag_valid,
        stale: a.position_valid.stale,
        track,
        gs: a.gs_valid.valid().then_some(a.gs),
        baro_alt: a.baro_alt_valid.valid().then_some(a.baro_alt),
        baro_alt_reliable: a.alt_reliable >= ALTITUDE_BARO_RELIABLE_MAX / 5,
        baro_rate: a.baro_rate_valid.valid().then_some(a.baro_rate),
        geom_alt: a.geom_alt_valid.valid().then_some(a.geom_alt),
        geom_rate: a.geom_rate_valid.valid().then_some(a.geom_rate),
        ias: a.ias_valid.valid().then_some(a.ias as u16),
        roll: a.roll_valid.valid().then_some(a.roll),
        squawk: a.squawk_valid.valid().then_some(a.squawk),
        mlat: a.position_valid.source == DataSource::Mlat,
        acas_ra_recent: a.acas_ra_valid.valid() && a.acas_ra_valid.age(now) < 15_000,
        reliable_recently: a.pos_reliable(settings),
        all: build_state_all(a, now),
    }
}

/// Assemble the wide record stored with every fourth trace point.
pub fn build_state_all(a: &Aircraft, now: u64) -> trace::StateAll {
    let mut all = trace::StateAll::default();
    let mut valid = 0u32;
    let mut bit = 0;
    let mut mark = |set: bool| {
        let b = bit;
        bit += 1;
        if set {
            valid |= 1 << b;
        }
    };

    let callsign_bytes = a.callsign.as_bytes();
    for (i, slot) in all.callsign.iter_mut().enumerate() {
        *slot = callsign_bytes.get(i).copied().unwrap_or(b' ');
    }
    mark(a.callsign_valid.valid());

    all.squawk = a.squawk;
    mark(a.squawk_valid.valid());
    all.nav_altitude_mcp = (a.nav_altitude_mcp / 4) as i16;
    mark(a.nav_altitude_mcp_valid.valid());
    all.nav_altitude_fms = (a.nav_altitude_fms / 4) as i16;
    mark(a.nav_altitude_fms_valid.valid());
    all.nav_qnh = (a.nav_qnh * 10.0) as i16;
    mark(a.nav_qnh_valid.valid());
    all.nav_heading = (norm_360(a.nav_heading as f64) * 90.0) as u16;
    mark(a.nav_heading_valid.valid());
    all.mach = (a.mach * 1000.0) as u16;
    mark(a.mach_valid.valid());
    all.track_rate = (a.track_rate * 100.0) as i16;
    mark(a.track_rate_valid.valid());
    all.mag_heading = (norm_360(a.mag_heading as f64) * 90.0) as u16;
    mark(a.mag_heading_valid.valid());
    all.true_heading = (norm_360(a.true_heading as f64) * 90.0) as u16;
    mark(a.true_heading_valid.valid());
    all.wind_direction = a.wind_direction as i16;
    all.wind_speed = a.wind_speed as i16;
    mark(a.wind_updated != 0 && now.saturating_sub(a.wind_updated) < WIND_TIMEOUT);
    all.oat = a.oat as i16;
    all.tat = a.tat as i16;
    mark(a.oat_updated != 0 && now.saturating_sub(a.oat_updated) < WIND_TIMEOUT);
    all.category = a.category;
    mark(a.category != 0);
    all.pos_nic = a.pos_nic;
    all.pos_rc = a.pos_rc.min(u16::MAX as u32) as u16;
    mark(a.position_valid.valid());
    all.emergency = a.emergency as u8;
    mark(a.emergency_valid.valid());
    all.nav_modes = (a.nav_modes.vnav as u8)
        | (a.nav_modes.alt_hold as u8) << 1
        | (a.nav_modes.approach as u8) << 2;
    mark(a.nav_modes_valid.valid());
    all.airground = match a.airground {
        AirGround::Invalid => 0,
        AirGround::Ground => 1,
        AirGround::Airborne => 2,
        AirGround::Uncertain => 3,
    };
    mark(a.airground_valid.valid());
    all.nav_altitude_src = a.nav_altitude_src as u8;
    mark(a.nav_altitude_src_valid.valid());
    all.tas = a.tas.min(u16::MAX as u32) as u16;
    mark(a.tas_valid.valid());
    all.adsb_version = a.adsb_version.clamp(0, 7) as u8;
    mark(a.adsb_version >= 0);

    all.quality_bits = (a.nic_a as u16)
        | (a.nic_c as u16) << 1
        | (a.nic_baro as u16) << 2
        | (a.nac_p as u16) << 3
        | (a.nac_v as u16) << 7
        | (a.sil as u16) << 10
        | (a.gva as u16) << 12
        | (a.sda as u16) << 14;
    mark(a.nac_p_valid.valid());
    mark(a.sil_valid.valid());
    mark(a.alert_valid.valid() && a.alert);
    mark(a.spi_valid.valid() && a.spi);

    all.valid_bits = valid;
    all
}

#[cfg(test)]
mod tests;
