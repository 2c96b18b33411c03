use track1090::decode::cpr::{nl, CPRFormat};
use track1090::decode::crc::{self, ErrorTables, FixBits};
use track1090::decode::commb::{self, CommB};
use track1090::decode::{decode_frame, DataSource, Decoded, Settings, TimedMessage};
use track1090::filter::IcaoFilter;
use track1090::stats::Counters;
use track1090::track::Tracker;

// recompute the trailing parity bytes: zero syndrome (DF17/18)
fn seal(frame: &mut [u8]) {
    let n = frame.len();
    frame[n - 3] = 0;
    frame[n - 2] = 0;
    frame[n - 1] = 0;
    let rem = crc::checksum(frame, n * 8);
    frame[n - 3] = (rem >> 16) as u8;
    frame[n - 2] = (rem >> 8) as u8;
    frame[n - 1] = rem as u8;
}

// overlay the address on the parity bytes (DF0/4/5/16/20/21)
fn seal_ap(frame: &mut [u8], addr: u32) {
    seal(frame);
    let n = frame.len();
    frame[n - 3] ^= (addr >> 16) as u8;
    frame[n - 2] ^= (addr >> 8) as u8;
    frame[n - 1] ^= addr as u8;
}

fn cpr_encode(lat: f64, lon: f64, fflag: CPRFormat) -> (u32, u32) {
    const CPR_MAX: f64 = 131_072.0;
    let d_lat = match fflag {
        CPRFormat::Even => 360.0 / 60.0,
        CPRFormat::Odd => 360.0 / 59.0,
    };
    let modulo = |a: f64, b: f64| {
        let r = a % b;
        if r < 0.0 {
            r + b.abs()
        } else {
            r
        }
    };
    let yz = (CPR_MAX * modulo(lat, d_lat) / d_lat + 0.5).floor();
    let rlat = d_lat * (yz / CPR_MAX + (lat / d_lat).floor());
    let ni = match fflag {
        CPRFormat::Even => nl(rlat),
        CPRFormat::Odd => nl(rlat).saturating_sub(1),
    }
    .max(1);
    let d_lon = 360.0 / ni as f64;
    let xz = (CPR_MAX * modulo(lon, d_lon) / d_lon + 0.5).floor();
    ((yz as u32) & 0x1ffff, (xz as u32) & 0x1ffff)
}

fn df17_position(addr: u32, alt_ft: u16, lat: f64, lon: f64, fflag: CPRFormat) -> [u8; 14] {
    let (lat_cpr, lon_cpr) = cpr_encode(lat, lon, fflag);
    let n = (alt_ft + 1000) / 25;
    let alt_raw: u64 = (((n as u64 & 0x7f0) << 1) | 0x10 | (n as u64 & 0xf)) & 0xfff;
    let f: u64 = match fflag {
        CPRFormat::Even => 0,
        CPRFormat::Odd => 1,
    };
    let me: u64 = (11u64 << 51)
        | (alt_raw << 36)
        | (f << 34)
        | ((lat_cpr as u64) << 17)
        | (lon_cpr as u64);

    let mut frame = [0u8; 14];
    frame[0] = 0x8d;
    frame[1] = (addr >> 16) as u8;
    frame[2] = (addr >> 8) as u8;
    frame[3] = addr as u8;
    frame[4..11].copy_from_slice(&me.to_be_bytes()[1..8]);
    seal(&mut frame);
    frame
}

fn message(decoded: Decoded, now: u64) -> TimedMessage {
    TimedMessage {
        timestamp: now * 12_000,
        system_timestamp: now,
        signal_level: 0.01,
        receiver_id: 0,
        decoded,
    }
}

fn decode(frame: &mut [u8], filter: &mut IcaoFilter, tables: &ErrorTables) -> Decoded {
    decode_frame(frame, filter, tables).expect("frame must decode")
}

fn small_settings() -> Settings {
    Settings {
        aircraft_buckets: 1 << 8,
        ..Default::default()
    }
}

#[test]
fn s1_airborne_position() {
    let mut tracker = Tracker::new(small_settings());
    let mut filter = IcaoFilter::new();
    let tables = ErrorTables::new(FixBits::One);
    let mut counters = Counters::default();
    let t0 = 1_700_000_000_000u64;

    let mut even = df17_position(0xa835af, 38_000, 42.257, -8.633, CPRFormat::Even);
    let mut odd = df17_position(0xa835af, 38_000, 42.257, -8.633, CPRFormat::Odd);

    let first = decode(&mut even, &mut filter, &tables);
    tracker.update(&message(first, t0), &mut counters);

    let second = decode(&mut odd, &mut filter, &tables);
    let update = tracker
        .update(&message(second, t0 + 1_000), &mut counters)
        .unwrap();

    let pos = update.position.expect("even/odd pair must resolve globally");
    assert!((pos.latitude - 42.257).abs() < 0.01);
    assert!((pos.longitude - -8.633).abs() < 0.01);

    let idx = tracker.registry.find(0xa835af).unwrap();
    let a = tracker.registry.get(idx);
    assert_eq!(a.pos_nic, 8);
    assert!(a.pos_rc <= 186);
    // the first successful global decode floors both counters at one
    assert_eq!(a.pos_reliable_odd.min(a.pos_reliable_even), 1.0);
}

#[test]
fn s2_crc_fix() {
    let mut filter = IcaoFilter::new();
    let tables = ErrorTables::new(FixBits::One);

    let original = df17_position(0x4ca853, 38_000, 51.0, 7.0, CPRFormat::Even);
    let mut reference = original;
    let pristine = decode(&mut reference, &mut filter, &tables);

    let mut damaged = original;
    damaged[13] ^= 0x01; // flip the last bit

    let repaired = decode(&mut damaged, &mut filter, &tables);
    assert_eq!(repaired.corrected_bits, 1);
    assert_eq!(repaired.addr, 0x4ca853);
    assert_eq!(repaired.message, pristine.message);
    assert_eq!(damaged, original);
}

#[test]
fn s3_commb_aircraft_ident() {
    let mut filter = IcaoFilter::new();
    let tables = ErrorTables::new(FixBits::One);
    let mut tracker = Tracker::new(small_settings());
    let mut counters = Counters::default();
    let t0 = 1_700_000_000_000u64;

    // the address must be known before a DF20 parity overlay resolves
    let mut announce = df17_position(0x3c6614, 30_000, 48.35, 11.78, CPRFormat::Even);
    let seen = decode(&mut announce, &mut filter, &tables);
    tracker.update(&message(seen, t0), &mut counters);

    // DF20, FS/DR/UM zero, no altitude, MB = BDS 2,0 "UAL123  "
    let mut frame = [0u8; 14];
    frame[0] = 0xa0;
    frame[4..11].copy_from_slice(&[0x20, 0x54, 0x13, 0x31, 0xCB, 0x38, 0x20]);
    seal_ap(&mut frame, 0x3c6614);

    let decoded = decode(&mut frame, &mut filter, &tables);
    assert_eq!(decoded.addr, 0x3c6614);
    let Some(CommB::AircraftIdent(ident)) = &decoded.commb else {
        panic!("expected an aircraft identification, got {:?}", decoded.commb);
    };
    assert_eq!(ident.callsign, "UAL123  ");

    tracker
        .update(&message(decoded, t0 + 500), &mut counters)
        .unwrap();
    let idx = tracker.registry.find(0x3c6614).unwrap();
    assert_eq!(tracker.registry.get(idx).callsign, "UAL123  ");
}

#[test]
fn s4_speed_check_reject() {
    let mut tracker = Tracker::new(small_settings());
    let mut filter = IcaoFilter::new();
    let tables = ErrorTables::new(FixBits::One);
    let mut counters = Counters::default();
    let t0 = 1_700_000_000_000u64;

    for (dt, fflag) in [(0, CPRFormat::Even), (500, CPRFormat::Odd)] {
        let mut frame = df17_position(0x406b90, 36_000, 50.0, 0.0, fflag);
        let decoded = decode(&mut frame, &mut filter, &tables);
        tracker.update(&message(decoded, t0 + dt), &mut counters);
    }

    let idx = tracker.registry.find(0x406b90).unwrap();
    {
        let a = tracker.registry.get_mut(idx);
        assert!((a.lat - 50.0).abs() < 0.01);
        a.gs = 450.0;
        a.gs_valid.source = DataSource::Adsb;
        a.gs_valid.last_source = DataSource::Adsb;
        a.gs_valid.updated = t0 + 500;
    }

    // two degrees north in seconds: far beyond anything flying
    let mut pos_bad = false;
    for (dt, fflag) in [(11_500, CPRFormat::Even), (11_600, CPRFormat::Odd)] {
        let mut frame = df17_position(0x406b90, 36_000, 52.0, 0.0, fflag);
        let decoded = decode(&mut frame, &mut filter, &tables);
        let update = tracker
            .update(&message(decoded, t0 + dt), &mut counters)
            .unwrap();
        pos_bad |= update.pos_bad;
        assert!(update.position.is_none());
    }
    assert!(pos_bad);

    let a = tracker.registry.get(idx);
    assert!((a.lat - 50.0).abs() < 0.01, "position must not move");
    assert!(!a.cpr_odd_valid.valid());
    assert!(!a.cpr_even_valid.valid());
}

#[test]
fn s5_commb_ambiguous() {
    let filter = IcaoFilter::new();

    // scores 56 under both the track/turn and the heading/speed readings
    let mb = [0x80, 0x1A, 0x59, 0x1F, 0x61, 0x94, 0x46];
    assert_eq!(commb::decode(&mb, &filter), CommB::Ambiguous);
}

#[test]
fn s6_stale_sweep() {
    let mut tracker = Tracker::new(small_settings());
    let mut filter = IcaoFilter::new();
    let tables = ErrorTables::new(FixBits::One);
    let mut counters = Counters::default();
    let t0 = 1_700_000_000_000u64;

    for (dt, fflag) in [(0, CPRFormat::Even), (300, CPRFormat::Odd)] {
        let mut frame = df17_position(0xabc123, 24_000, 44.0, 5.0, fflag);
        let decoded = decode(&mut frame, &mut filter, &tables);
        tracker.update(&message(decoded, t0 + dt), &mut counters);
    }

    let idx = tracker.registry.find(0xabc123).unwrap();
    assert!(tracker.registry.get(idx).position_valid.valid());
    assert!(tracker.registry.get(idx).baro_alt_valid.valid());

    // all default-expiry validities are gone after 31 seconds
    tracker.remove_stale(t0 + 31_000);
    let a = tracker.registry.get(idx);
    assert!(!a.position_valid.valid());
    assert!(!a.baro_alt_valid.valid());

    // a JAERO-sourced validity lives for half an hour
    {
        let a = tracker.registry.get_mut(idx);
        a.seen = t0;
        a.position_valid.source = DataSource::Jaero;
        a.position_valid.last_source = DataSource::Jaero;
        a.position_valid.updated = t0;
    }
    tracker.remove_stale(t0 + 32 * 60_000);
    let idx = tracker.registry.find(0xabc123).expect("still tracked");
    assert!(tracker.registry.get(idx).position_valid.valid());

    tracker.remove_stale(t0 + 34 * 60_000);
    if let Some(idx) = tracker.registry.find(0xabc123) {
        assert!(!tracker.registry.get(idx).position_valid.valid());
    }
}

#[test]
fn icao_filter_ttl_window() {
    let mut filter = IcaoFilter::new();
    let t0 = 1_700_000_000_000u64;
    filter.expire(t0);

    filter.add(0xa835af);
    for dt in [0u64, 30_000, 60_000] {
        filter.expire(t0 + dt);
        assert!(filter.test(0xa835af), "must survive t+{dt}");
    }

    filter.expire(t0 + 121_000);
    assert!(!filter.test(0xa835af), "must be forgotten by t+121s");
}

#[test]
fn data_source_lattice_order() {
    // the wire priority order of the source lattice
    use DataSource::*;
    let order = [
        Invalid, Indirect, ModeAc, Sbs, Mlat, ModeS, Jaero, ModeSChecked, Tisb, Adsr, Adsb,
        Prio,
    ];
    for pair in order.windows(2) {
        assert!(pair[0] < pair[1], "{:?} must rank below {:?}", pair[0], pair[1]);
    }
}

#[test]
fn message_roundtrips_through_serde() {
    let mut filter = IcaoFilter::new();
    let tables = ErrorTables::new(FixBits::One);
    let mut frame = df17_position(0x3944f8, 28_000, 47.4, 8.6, CPRFormat::Odd);
    let decoded = decode(&mut frame, &mut filter, &tables);

    let value = serde_json::to_value(&decoded.message).unwrap();
    assert_eq!(value["DF"], serde_json::json!("ADSB"));
    assert_eq!(value["icao24"], serde_json::json!("3944f8"));
    assert_eq!(value["altitude"], serde_json::json!(28_000));
}

#[test]
fn engine_framed_pipeline() {
    let _ = tracing_subscriber::fmt::try_init();
    let engine = track1090::engine::Engine::start(small_settings());
    let now = track1090::engine::now_ms();

    let mut even = df17_position(0x424242, 32_000, 52.3, 13.5, CPRFormat::Even);
    let mut odd = df17_position(0x424242, 32_000, 52.3, 13.5, CPRFormat::Odd);

    engine
        .submit_frame(&mut even, DataSource::Adsb, 7, 0, now, 0.02)
        .unwrap();
    engine
        .submit_frame(&mut odd, DataSource::Adsb, 7, 0, now + 700, 0.02)
        .unwrap();

    let (lat, json) = engine.with_state(|state| {
        let idx = state.tracker.registry.find(0x424242).unwrap();
        let lat = state.tracker.registry.get(idx).lat;
        let json = track1090::output::registry_json(&state.tracker, now + 800);
        (lat, json)
    });
    assert!((lat - 52.3).abs() < 0.01);
    assert_eq!(json["aircraft"].as_array().unwrap().len(), 1);

    engine.shutdown();
}
