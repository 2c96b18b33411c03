use serde_json::{json, Value};

use crate::decode::cpr::Position;
use crate::decode::{Settings, TimedMessage};
use crate::track::{AirGround, Aircraft, Tracker};

/**
 * After-tracker fan-out: every accepted message is offered to the output
 * collaborators together with change notifications, and the registry can be
 * rendered as a compact binary snapshot or as a JSON document.
 */

/// What the tracker tells the outputs about
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// A message passed the tracker; `reduce_forward` marks it as due for
    /// the reduced-rate outputs
    Message {
        message: std::sync::Arc<TimedMessage>,
        reduce_forward: bool,
    },
    PositionChanged {
        addr: u32,
        position: Position,
        reliable: bool,
    },
    CallsignChanged {
        addr: u32,
        callsign: String,
    },
    SquawkChanged {
        addr: u32,
        squawk: u16,
    },
    AircraftCreated {
        addr: u32,
    },
}

/// Dispatches events to the registered collaborators. Send errors mean the
/// collaborator went away; it is dropped on the next dispatch.
#[derive(Default)]
pub struct Fanout {
    senders: Vec<tokio::sync::mpsc::Sender<OutputEvent>>,
}

impl Fanout {
    pub fn new() -> Self {
        Fanout::default()
    }

    pub fn subscribe(&mut self, depth: usize) -> tokio::sync::mpsc::Receiver<OutputEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(depth.max(1));
        self.senders.push(tx);
        rx
    }

    /// Offer an event to every output. Called from the decoder thread, so
    /// a full queue drops the event for that output rather than stalling
    /// the pipeline.
    pub fn dispatch(&mut self, event: &OutputEvent) {
        self.senders
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => true,
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => false,
            });
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Size of one packed aircraft record
pub const BINCRAFT_BYTES: usize = 108;

/**
 * Pack one aircraft into the fixed 108-byte record consumed by binary
 * clients. All values little-endian; the layout is a wire contract:
 *
 * | off | type | field |
 * |-----|------|-------|
 * | 0   | u32  | ICAO address |
 * | 4   | u8   | address type ordinal |
 * | 5   | u8   | signal, 8-bit quantised |
 * | 6   | u16  | message count, saturating |
 * | 8   | u32  | ms since last message / 100 |
 * | 12  | u32  | ms since last position / 100 |
 * | 16  | i32  | latitude ×1e6 |
 * | 20  | i32  | longitude ×1e6 |
 * | 24  | i16  | barometric altitude ÷25 ft |
 * | 26  | i16  | geometric altitude ÷25 ft |
 * | 28  | i16  | ground speed ×10 |
 * | 30  | i16  | IAS ×10 |
 * | 32  | i16  | TAS ×10 |
 * | 34  | i16  | mach ×1000 |
 * | 36  | i16  | track ×90 |
 * | 38  | i16  | track rate ×100 |
 * | 40  | i16  | roll ×100 |
 * | 42  | i16  | magnetic heading ×90 |
 * | 44  | i16  | true heading ×90 |
 * | 46  | i16  | barometric rate ÷8 |
 * | 48  | i16  | geometric rate ÷8 |
 * | 50  | u16  | squawk, hex digits |
 * | 52  | u16  | containment radius m, saturating |
 * | 54  | i16  | QNH ×10 |
 * | 56  | u16  | MCP selected altitude ÷4 |
 * | 58  | u16  | FMS selected altitude ÷4 |
 * | 60  | i16  | selected heading ×90 |
 * | 62  | u16  | wind direction ×90 |
 * | 64  | i16  | wind speed ×10 |
 * | 66  | i16  | OAT ×10 |
 * | 68  | i16  | TAT ×10 |
 * | 70  | 8×u8 | callsign, space padded |
 * | 78  | u8   | category |
 * | 79  | u8   | emergency |
 * | 80  | u8   | air/ground |
 * | 81  | u8   | nav modes: vnav, alt hold, approach |
 * | 82  | u8   | nav altitude source |
 * | 83  | u8   | ADS-B version, 255 when unseen |
 * | 84  | u8   | NIC |
 * | 85  | u8   | NACp low nibble, NACv high nibble |
 * | 86  | u8   | SIL(2) SILsup(1) GVA(2) SDA(2) |
 * | 87  | u8   | flags: NICa, NICc, NICbaro, alert, SPI, reliable, surface |
 * | 88  | u32  | validity bitmap, bit order as documented in code |
 * | 92  | u16  | position reliability odd ×10 |
 * | 94  | u16  | position reliability even ×10 |
 * | 96  | i32  | globe tile index |
 * | 100 | u32  | trace length, saturating |
 * | 104 | i16  | wind altitude ÷25 |
 * | 106 | u16  | reserved |
 */
pub fn bincraft_record(a: &Aircraft, now: u64, settings: &Settings) -> [u8; BINCRAFT_BYTES] {
    let mut b = [0u8; BINCRAFT_BYTES];

    let reliable = a.pos_reliable(settings);

    b[0..4].copy_from_slice(&a.addr.to_le_bytes());
    b[4] = a.addrtype as u8;
    b[5] = a.signal_8bit();
    b[6..8].copy_from_slice(&(a.messages.min(u16::MAX as u32) as u16).to_le_bytes());
    let seen = (now.saturating_sub(a.seen) / 100).min(u32::MAX as u64) as u32;
    b[8..12].copy_from_slice(&seen.to_le_bytes());
    let seen_pos = if a.seen_pos > 0 {
        (now.saturating_sub(a.seen_pos) / 100).min(u32::MAX as u64) as u32
    } else {
        u32::MAX
    };
    b[12..16].copy_from_slice(&seen_pos.to_le_bytes());

    if reliable {
        b[16..20].copy_from_slice(&((a.lat * 1e6) as i32).to_le_bytes());
        b[20..24].copy_from_slice(&((a.lon * 1e6) as i32).to_le_bytes());
    }

    let i16_at = |b: &mut [u8; BINCRAFT_BYTES], off: usize, v: i16| {
        b[off..off + 2].copy_from_slice(&v.to_le_bytes());
    };
    let u16_at = |b: &mut [u8; BINCRAFT_BYTES], off: usize, v: u16| {
        b[off..off + 2].copy_from_slice(&v.to_le_bytes());
    };

    i16_at(&mut b, 24, (a.baro_alt / 25).clamp(-32768, 32767) as i16);
    i16_at(&mut b, 26, (a.geom_alt / 25).clamp(-32768, 32767) as i16);
    i16_at(&mut b, 28, (a.gs * 10.0) as i16);
    i16_at(&mut b, 30, (a.ias * 10).min(i16::MAX as u32) as i16);
    i16_at(&mut b, 32, (a.tas * 10).min(i16::MAX as u32) as i16);
    i16_at(&mut b, 34, (a.mach * 1000.0) as i16);
    i16_at(&mut b, 36, (a.track * 90.0) as i16);
    i16_at(&mut b, 38, (a.track_rate * 100.0) as i16);
    i16_at(&mut b, 40, (a.roll * 100.0) as i16);
    i16_at(&mut b, 42, (a.mag_heading * 90.0) as i16);
    i16_at(&mut b, 44, (a.true_heading * 90.0) as i16);
    i16_at(&mut b, 46, ((a.baro_rate as f32) / 8.0) as i16);
    i16_at(&mut b, 48, ((a.geom_rate as f32) / 8.0) as i16);
    u16_at(&mut b, 50, a.squawk);
    u16_at(&mut b, 52, a.pos_rc.min(u16::MAX as u32) as u16);
    i16_at(&mut b, 54, (a.nav_qnh * 10.0) as i16);
    u16_at(&mut b, 56, (a.nav_altitude_mcp / 4).min(u16::MAX as u32) as u16);
    u16_at(&mut b, 58, (a.nav_altitude_fms / 4).min(u16::MAX as u32) as u16);
    i16_at(&mut b, 60, (a.nav_heading * 90.0) as i16);
    u16_at(&mut b, 62, (a.wind_direction.rem_euclid(360.0) * 90.0) as u16);
    i16_at(&mut b, 64, (a.wind_speed * 10.0) as i16);
    i16_at(&mut b, 66, (a.oat * 10.0) as i16);
    i16_at(&mut b, 68, (a.tat * 10.0) as i16);

    let callsign = a.callsign.as_bytes();
    for i in 0..8 {
        b[70 + i] = callsign.get(i).copied().unwrap_or(b' ');
    }

    b[78] = a.category;
    b[79] = a.emergency as u8;
    b[80] = match a.airground {
        AirGround::Invalid => 0,
        AirGround::Ground => 1,
        AirGround::Airborne => 2,
        AirGround::Uncertain => 3,
    };
    b[81] = (a.nav_modes.vnav as u8)
        | (a.nav_modes.alt_hold as u8) << 1
        | (a.nav_modes.approach as u8) << 2;
    b[82] = a.nav_altitude_src as u8;
    b[83] = if a.adsb_version >= 0 {
        a.adsb_version as u8
    } else {
        255
    };
    b[84] = a.pos_nic;
    b[85] = (a.nac_p & 0x0f) | (a.nac_v << 4);
    b[86] = (a.sil & 3)
        | (a.sil_type_per_sample as u8) << 2
        | (a.gva & 3) << 3
        | (a.sda & 3) << 5;
    b[87] = (a.nic_a & 1)
        | (a.nic_c & 1) << 1
        | (a.nic_baro & 1) << 2
        | (a.alert as u8) << 3
        | (a.spi as u8) << 4
        | (reliable as u8) << 5
        | (a.pos_surface as u8) << 6;

    // validity bitmap: one bit per quantised field, in record order
    let mut valid: u32 = 0;
    let flags = [
        a.position_valid.valid() && reliable,
        a.baro_alt_valid.valid(),
        a.geom_alt_valid.valid(),
        a.gs_valid.valid(),
        a.ias_valid.valid(),
        a.tas_valid.valid(),
        a.mach_valid.valid(),
        a.track_valid.valid(),
        a.track_rate_valid.valid(),
        a.roll_valid.valid(),
        a.mag_heading_valid.valid(),
        a.true_heading_valid.valid(),
        a.baro_rate_valid.valid(),
        a.geom_rate_valid.valid(),
        a.squawk_valid.valid(),
        a.nav_qnh_valid.valid(),
        a.nav_altitude_mcp_valid.valid(),
        a.nav_altitude_fms_valid.valid(),
        a.nav_heading_valid.valid(),
        now.saturating_sub(a.wind_updated) < crate::track::WIND_TIMEOUT && a.wind_updated != 0,
        now.saturating_sub(a.oat_updated) < crate::track::WIND_TIMEOUT && a.oat_updated != 0,
        a.callsign_valid.valid(),
        a.category != 0,
        a.emergency_valid.valid(),
        a.airground_valid.valid(),
        a.nav_modes_valid.valid(),
        a.nav_altitude_src_valid.valid(),
        a.nic_a_valid.valid(),
        a.nac_p_valid.valid(),
        a.sil_valid.valid(),
        a.gva_valid.valid(),
        a.sda_valid.valid(),
    ];
    for (i, &flag) in flags.iter().enumerate() {
        if flag {
            valid |= (flag as u32) << i;
        }
    }
    b[88..92].copy_from_slice(&valid.to_le_bytes());

    u16_at(&mut b, 92, (a.pos_reliable_odd * 10.0) as u16);
    u16_at(&mut b, 94, (a.pos_reliable_even * 10.0) as u16);
    b[96..100].copy_from_slice(&a.globe_index.to_le_bytes());
    b[100..104].copy_from_slice(&(a.trace.len().min(u32::MAX as usize) as u32).to_le_bytes());
    i16_at(&mut b, 104, (a.wind_altitude / 25).clamp(-32768, 32767) as i16);

    b
}

/// The whole registry as consecutive packed records, preceded by a 16-byte
/// header: magic "bCr1", record size, count, timestamp.
pub fn bincraft_snapshot(tracker: &Tracker, now: u64) -> Vec<u8> {
    let indices = tracker.registry.indices();
    let mut out = Vec::with_capacity(16 + indices.len() * BINCRAFT_BYTES);

    out.extend_from_slice(b"bCr1");
    out.extend_from_slice(&(BINCRAFT_BYTES as u16).to_le_bytes());
    out.extend_from_slice(&(indices.len().min(u16::MAX as usize) as u16).to_le_bytes());
    out.extend_from_slice(&now.to_le_bytes());

    for idx in indices {
        let a = tracker.registry.get(idx);
        out.extend_from_slice(&bincraft_record(a, now, &tracker.settings));
    }
    out
}

fn aircraft_json(a: &Aircraft, now: u64, settings: &Settings) -> Value {
    let mut o = serde_json::Map::new();
    o.insert("hex".into(), json!(format!("{:06x}", a.addr)));
    o.insert("type".into(), json!(a.addrtype));
    o.insert("messages".into(), json!(a.messages));
    o.insert(
        "seen".into(),
        json!(now.saturating_sub(a.seen) as f64 / 1000.0),
    );

    if a.callsign_valid.valid() {
        o.insert("flight".into(), json!(a.callsign));
    }
    if a.squawk_valid.valid() {
        o.insert("squawk".into(), json!(format!("{:04x}", a.squawk)));
    }
    if a.baro_alt_valid.valid() {
        o.insert("alt_baro".into(), json!(a.baro_alt));
    }
    if a.geom_alt_valid.valid() {
        o.insert("alt_geom".into(), json!(a.geom_alt));
    }
    if a.gs_valid.valid() {
        o.insert("gs".into(), json!((a.gs * 10.0).round() / 10.0));
    }
    if a.ias_valid.valid() {
        o.insert("ias".into(), json!(a.ias));
    }
    if a.tas_valid.valid() {
        o.insert("tas".into(), json!(a.tas));
    }
    if a.mach_valid.valid() {
        o.insert("mach".into(), json!((a.mach * 1000.0).round() / 1000.0));
    }
    if a.track_valid.valid() {
        o.insert("track".into(), json!((a.track * 10.0).round() / 10.0));
    }
    if a.track_rate_valid.valid() {
        o.insert("track_rate".into(), json!(a.track_rate));
    }
    if a.roll_valid.valid() {
        o.insert("roll".into(), json!(a.roll));
    }
    if a.mag_heading_valid.valid() {
        o.insert("mag_heading".into(), json!(a.mag_heading));
    }
    if a.true_heading_valid.valid() {
        o.insert("true_heading".into(), json!(a.true_heading));
    }
    if a.baro_rate_valid.valid() {
        o.insert("baro_rate".into(), json!(a.baro_rate));
    }
    if a.geom_rate_valid.valid() {
        o.insert("geom_rate".into(), json!(a.geom_rate));
    }
    if a.emergency_valid.valid() {
        o.insert("emergency".into(), json!(a.emergency));
    }
    if a.category != 0 {
        o.insert("category".into(), json!(format!("{:02X}", a.category)));
    }
    if a.nav_qnh_valid.valid() {
        o.insert("nav_qnh".into(), json!(a.nav_qnh));
    }
    if a.nav_altitude_mcp_valid.valid() {
        o.insert("nav_altitude_mcp".into(), json!(a.nav_altitude_mcp));
    }
    if a.nav_altitude_fms_valid.valid() {
        o.insert("nav_altitude_fms".into(), json!(a.nav_altitude_fms));
    }
    if a.nav_heading_valid.valid() {
        o.insert("nav_heading".into(), json!(a.nav_heading));
    }

    // a position is only exposed once both reliability counters clear the
    // configured threshold
    if a.pos_reliable(settings) {
        o.insert("lat".into(), json!(a.lat));
        o.insert("lon".into(), json!(a.lon));
        o.insert("nic".into(), json!(a.pos_nic));
        o.insert("rc".into(), json!(a.pos_rc));
        o.insert(
            "seen_pos".into(),
            json!(now.saturating_sub(a.seen_pos) as f64 / 1000.0),
        );
    }

    if a.adsb_version >= 0 {
        o.insert("version".into(), json!(a.adsb_version));
    }
    if a.nic_baro_valid.valid() {
        o.insert("nic_baro".into(), json!(a.nic_baro));
    }
    if a.nac_p_valid.valid() {
        o.insert("nac_p".into(), json!(a.nac_p));
    }
    if a.nac_v_valid.valid() {
        o.insert("nac_v".into(), json!(a.nac_v));
    }
    if a.sil_valid.valid() {
        o.insert("sil".into(), json!(a.sil));
        o.insert(
            "sil_type".into(),
            json!(if a.sil_type_per_sample {
                "persample"
            } else {
                "perhour"
            }),
        );
    }
    if a.gva_valid.valid() {
        o.insert("gva".into(), json!(a.gva));
    }
    if a.sda_valid.valid() {
        o.insert("sda".into(), json!(a.sda));
    }
    if a.alert_valid.valid() {
        o.insert("alert".into(), json!(a.alert as u8));
    }
    if a.spi_valid.valid() {
        o.insert("spi".into(), json!(a.spi as u8));
    }

    let rssi = 10.0
        * (a.signal_level.iter().sum::<f64>() / 8.0 + 1.125e-5)
            .log10();
    o.insert("rssi".into(), json!((rssi * 10.0).round() / 10.0));

    Value::Object(o)
}

/// The aircraft.json document: every live aircraft as one object.
pub fn registry_json(tracker: &Tracker, now: u64) -> Value {
    let aircraft: Vec<Value> = tracker
        .registry
        .indices()
        .into_iter()
        .map(|idx| aircraft_json(tracker.registry.get(idx), now, &tracker.settings))
        .collect();

    json!({
        "now": now as f64 / 1000.0,
        "messages": aircraft.len(),
        "aircraft": aircraft,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DataSource;
    use crate::track::Validity;

    fn aircraft_with_position() -> Aircraft {
        let mut a = Aircraft::new(0x3c6614, 1000);
        let fresh = Validity {
            updated: 1000,
            source: DataSource::Adsb,
            last_source: DataSource::Adsb,
            ..Default::default()
        };
        a.lat = 42.257;
        a.lon = -8.633;
        a.pos_nic = 8;
        a.pos_rc = 186;
        a.seen_pos = 1000;
        a.position_valid = fresh;
        a.pos_reliable_odd = 2.0;
        a.pos_reliable_even = 2.0;
        a.baro_alt = 38_000;
        a.baro_alt_valid = fresh;
        a.gs = 438.5;
        a.gs_valid = fresh;
        a.callsign = "UAL123  ".into();
        a.callsign_valid = fresh;
        a.squawk = 0x2157;
        a.squawk_valid = fresh;
        a
    }

    #[test]
    fn test_bincraft_layout() {
        let settings = Settings::default();
        let a = aircraft_with_position();
        let record = bincraft_record(&a, 2000, &settings);

        assert_eq!(record.len(), BINCRAFT_BYTES);
        assert_eq!(u32::from_le_bytes(record[0..4].try_into().unwrap()), 0x3c6614);
        assert_eq!(
            i32::from_le_bytes(record[16..20].try_into().unwrap()),
            42_257_000
        );
        assert_eq!(
            i32::from_le_bytes(record[20..24].try_into().unwrap()),
            -8_633_000
        );
        // altitude is quantised to 25 ft steps
        assert_eq!(
            i16::from_le_bytes(record[24..26].try_into().unwrap()),
            38_000 / 25
        );
        // ground speed ×10
        assert_eq!(i16::from_le_bytes(record[28..30].try_into().unwrap()), 4385);
        assert_eq!(&record[70..78], b"UAL123  ");
        assert_eq!(
            u16::from_le_bytes(record[50..52].try_into().unwrap()),
            0x2157
        );
        assert_eq!(
            u16::from_le_bytes(record[52..54].try_into().unwrap()),
            186
        );
    }

    #[test]
    fn test_bincraft_hides_unreliable_position() {
        let settings = Settings::default();
        let mut a = aircraft_with_position();
        a.pos_reliable_odd = 1.0;

        let record = bincraft_record(&a, 2000, &settings);
        assert_eq!(i32::from_le_bytes(record[16..20].try_into().unwrap()), 0);
        // the reliable flag is clear
        assert_eq!(record[87] & (1 << 5), 0);
    }

    #[test]
    fn test_json_gates_position_on_reliability() {
        let settings = Settings::default();
        let mut a = aircraft_with_position();

        let v = aircraft_json(&a, 2000, &settings);
        assert_eq!(v["lat"], json!(42.257));
        assert_eq!(v["flight"], json!("UAL123  "));

        a.pos_reliable_even = 1.0;
        let v = aircraft_json(&a, 2000, &settings);
        assert!(v.get("lat").is_none());
        // everything else is still there
        assert_eq!(v["alt_baro"], json!(38_000));
    }

    #[test]
    fn test_registry_snapshot() {
        let mut tracker = Tracker::new(Settings {
            aircraft_buckets: 1 << 4,
            ..Default::default()
        });
        let idx = tracker.registry.find_or_create(0x3c6614, 1000).unwrap();
        *tracker.registry.get_mut(idx) = aircraft_with_position();

        let blob = bincraft_snapshot(&tracker, 2000);
        assert_eq!(blob.len(), 16 + BINCRAFT_BYTES);
        assert_eq!(&blob[0..4], b"bCr1");

        let doc = registry_json(&tracker, 2000);
        assert_eq!(doc["aircraft"].as_array().unwrap().len(), 1);
    }
}
