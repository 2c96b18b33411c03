use super::*;
use crate::decode::crc;
use crate::decode::cpr::CPRFormat;
use crate::decode::{Decoded, Message};
use crate::stats::Counters;

// recompute the parity bytes so a hand-built frame carries a valid CRC
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

// airborne CPR encoder driving the position tests
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
        CPRFormat::Even => cpr::nl(rlat),
        CPRFormat::Odd => cpr::nl(rlat).saturating_sub(1),
    }
    .max(1);
    let d_lon = 360.0 / ni as f64;
    let xz = (CPR_MAX * modulo(lon, d_lon) / d_lon + 0.5).floor();

    ((yz as u32) & 0x1ffff, (xz as u32) & 0x1ffff)
}

// DF17 with an airborne position ME (typecode 11, 25 ft altitude encoding)
fn df17_position(addr: u32, alt_ft: u16, lat: f64, lon: f64, fflag: CPRFormat) -> [u8; 14] {
    let (lat_cpr, lon_cpr) = cpr_encode(lat, lon, fflag);

    let n = (alt_ft + 1000) / 25;
    let alt_raw: u64 = (((n as u64 & 0x7f0) << 1) | 0x10 | (n as u64 & 0xf)) & 0xfff;

    let tc: u64 = 11;
    let f: u64 = match fflag {
        CPRFormat::Even => 0,
        CPRFormat::Odd => 1,
    };
    let me: u64 = (tc << 51)
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

fn es_message(frame: &[u8], now: u64) -> TimedMessage {
    let message = Message::from_frame(frame).unwrap();
    let addr = message.icao24().unwrap();
    TimedMessage {
        timestamp: now * 12_000,
        system_timestamp: now,
        signal_level: 0.01,
        receiver_id: 0,
        decoded: Decoded {
            message,
            addr,
            addrtype: AddrType::AdsbIcao,
            source: DataSource::Adsb,
            corrected_bits: 0,
            iid: 0,
            commb: None,
        },
    }
}

fn small_tracker() -> Tracker {
    let settings = Settings {
        aircraft_buckets: 1 << 8,
        ..Default::default()
    };
    Tracker::new(settings)
}

#[test]
fn test_airborne_position_accepted() {
    let mut tracker = small_tracker();
    let mut counters = Counters::default();

    let even = df17_position(0xa835af, 38_000, 42.257, -8.633, CPRFormat::Even);
    let odd = df17_position(0xa835af, 38_000, 42.257, -8.633, CPRFormat::Odd);

    let update = tracker
        .update(&es_message(&even, 1_000_000), &mut counters)
        .unwrap();
    assert!(update.position.is_none());

    let update = tracker
        .update(&es_message(&odd, 1_001_000), &mut counters)
        .unwrap();
    let pos = update.position.expect("global CPR should resolve");
    assert!((pos.latitude - 42.257).abs() < 0.01, "{}", pos.latitude);
    assert!((pos.longitude - -8.633).abs() < 0.01, "{}", pos.longitude);

    let idx = tracker.registry.find(0xa835af).unwrap();
    let a = tracker.registry.get(idx);
    // typecode 11, version 0: NIC 8, Rc 186 m
    assert_eq!(a.pos_nic, 8);
    assert_eq!(a.pos_rc, 186);
    assert_eq!(a.pos_reliable_odd, 1.0);
    assert_eq!(a.pos_reliable_even, 1.0);
    assert_eq!(a.baro_alt, 38_000);
    assert_eq!(counters.cpr_global_ok, 1);
    assert_eq!(a.trace.len(), 1);
}

#[test]
fn test_speed_check_rejects_jump() {
    let mut tracker = small_tracker();
    let mut counters = Counters::default();
    let t0: u64 = 1_000_000;

    // establish a position at (50, 0)
    let even = df17_position(0x4ca853, 36_000, 50.0, 0.0, CPRFormat::Even);
    let odd = df17_position(0x4ca853, 36_000, 50.0, 0.0, CPRFormat::Odd);
    tracker.update(&es_message(&even, t0), &mut counters);
    tracker.update(&es_message(&odd, t0 + 500), &mut counters);

    let idx = tracker.registry.find(0x4ca853).unwrap();
    {
        let a = tracker.registry.get_mut(idx);
        assert!((a.lat - 50.0).abs() < 0.01);
        // a known ground speed of 450 kt
        a.gs = 450.0;
        a.gs_valid.source = DataSource::Adsb;
        a.gs_valid.last_source = DataSource::Adsb;
        a.gs_valid.updated = t0 + 500;
    }

    // (52, 0) is 222 km north; at 450 kt that needs about 16 minutes,
    // not 11 seconds. Sent outside the pairing window so the two bad
    // halves pair with each other, not with the stored ones.
    let even = df17_position(0x4ca853, 36_000, 52.0, 0.0, CPRFormat::Even);
    let odd = df17_position(0x4ca853, 36_000, 52.0, 0.0, CPRFormat::Odd);
    let first = tracker
        .update(&es_message(&even, t0 + 11_500), &mut counters)
        .unwrap();
    assert!(first.position.is_none());

    let second = tracker
        .update(&es_message(&odd, t0 + 11_600), &mut counters)
        .unwrap();
    assert!(second.pos_bad, "the jump must be flagged as bad data");
    assert!(second.position.is_none());

    let a = tracker.registry.get(idx);
    // the aircraft stays where it was, both halves are poisoned
    assert!((a.lat - 50.0).abs() < 0.01);
    assert!(!a.cpr_odd_valid.valid());
    assert!(!a.cpr_even_valid.valid());
    assert_eq!(counters.cpr_global_speed_checks, 1);
    assert_eq!(counters.cpr_global_bad, 1);
}

#[test]
fn test_speed_check_symmetry() {
    // two positions within a plausible envelope pass in either direction
    let mut a = Aircraft::new(0x123456, 10_000);
    a.seen = 10_000;
    a.lat = 50.0;
    a.lon = 8.0;
    a.pos_surface = false;
    a.pos_reliable_odd = 2.0;
    a.pos_reliable_even = 2.0;
    a.position_valid.source = DataSource::Adsb;
    a.position_valid.last_source = DataSource::Adsb;
    a.position_valid.updated = 9_000;

    let candidate = CprCandidate {
        cpr_type: CprType::Airborne,
        lat: 1,
        lon: 1,
        fflag: CPRFormat::Even,
        nic: 8,
        rc: 186,
        gs: None,
    };

    // 230 m/s for one second
    let (ok_fwd, _) = speed_check(&a, DataSource::Adsb, 50.002, 8.0, &candidate);
    assert!(ok_fwd);

    let mut b = Aircraft::new(0x123456, 10_000);
    b.seen = 10_000;
    b.lat = 50.002;
    b.lon = 8.0;
    b.pos_reliable_odd = 2.0;
    b.pos_reliable_even = 2.0;
    b.position_valid.source = DataSource::Adsb;
    b.position_valid.last_source = DataSource::Adsb;
    b.position_valid.updated = 9_000;
    let (ok_back, _) = speed_check(&b, DataSource::Adsb, 50.0, 8.0, &candidate);
    assert!(ok_back);
}

#[test]
fn test_accept_data_monotonicity() {
    // a stale high-priority value cannot hold off a fresh lower one
    let mut ctx = Ctx {
        now: 100_000,
        source: DataSource::Adsb,
        addrtype: AddrType::AdsbIcao,
        receiver_id: 0,
        is_es: true,
        reduce_interval: 1_000,
        reduce_forward: false,
        cpr_valid: false,
    };

    let mut v = Validity::default();
    assert!(accept_data(&mut v, DataSource::Adsb, &mut ctx, false));
    assert_eq!(v.source, DataSource::Adsb);

    // a lower-priority source within the stale window is refused
    ctx.now = 110_000;
    assert!(!accept_data(&mut v, DataSource::ModeS, &mut ctx, false));
    assert_eq!(v.source, DataSource::Adsb);

    // past the stale window it wins regardless of the lattice
    ctx.now = 120_001;
    assert!(accept_data(&mut v, DataSource::ModeS, &mut ctx, false));
    assert_eq!(v.source, DataSource::ModeS);
}

#[test]
fn test_accept_data_jaero_inhibition() {
    let mut ctx = Ctx {
        now: 1_000_000,
        source: DataSource::ModeS,
        addrtype: AddrType::ModeS,
        receiver_id: 0,
        is_es: false,
        reduce_interval: 1_000,
        reduce_forward: false,
        cpr_valid: false,
    };

    let mut v = Validity::default();
    assert!(accept_data(&mut v, DataSource::ModeS, &mut ctx, false));

    // JAERO may not interrupt a Mode S stream for ten minutes
    ctx.now = 1_400_000;
    assert!(!accept_data(&mut v, DataSource::Jaero, &mut ctx, false));

    ctx.now = 1_000_000 + 600_001;
    assert!(accept_data(&mut v, DataSource::Jaero, &mut ctx, false));
    assert_eq!(v.source, DataSource::Jaero);
}

#[test]
fn test_prio_collapses_to_adsb() {
    let mut ctx = Ctx {
        now: 1_000,
        source: DataSource::Prio,
        addrtype: AddrType::AdsbIcao,
        receiver_id: 0,
        is_es: true,
        reduce_interval: 1_000,
        reduce_forward: false,
        cpr_valid: false,
    };
    let mut v = Validity::default();
    assert!(accept_data(&mut v, DataSource::Prio, &mut ctx, false));
    assert_eq!(v.source, DataSource::Adsb);
}

#[test]
fn test_reliability_counter_bounds() {
    let mut tracker = small_tracker();
    let mut counters = Counters::default();
    let persist = tracker.settings.filter_persistence as f32;

    let mut now = 1_000_000;
    for round in 0..20u64 {
        let lat = 42.0 + round as f64 * 0.001;
        let even = df17_position(0xabcdef, 34_000, lat, 3.0, CPRFormat::Even);
        let odd = df17_position(0xabcdef, 34_000, lat, 3.0, CPRFormat::Odd);
        tracker.update(&es_message(&even, now), &mut counters);
        tracker.update(&es_message(&odd, now + 300), &mut counters);
        now += 1_000;

        let idx = tracker.registry.find(0xabcdef).unwrap();
        let a = tracker.registry.get(idx);
        assert!(a.pos_reliable_odd >= 0.0 && a.pos_reliable_odd <= persist);
        assert!(a.pos_reliable_even >= 0.0 && a.pos_reliable_even <= persist);
    }

    let idx = tracker.registry.find(0xabcdef).unwrap();
    let a = tracker.registry.get(idx);
    assert_eq!(a.pos_reliable_odd.max(a.pos_reliable_even), persist);
    assert!(a.pos_reliable(&tracker.settings));
}

#[test]
fn test_stale_sweep_expires_validities() {
    let mut tracker = small_tracker();
    let mut counters = Counters::default();
    let t0: u64 = 1_000_000;

    // identification plus a position pair
    let mut ident = [0u8; 14];
    ident[0] = 0x8d;
    ident[1] = 0x3c;
    ident[2] = 0x66;
    ident[3] = 0x14;
    // "DLH123  ": tc 4 ca 0, then 6-bit chars 4,12,8,49,50,51,32,32
    let me: u64 = (4u64 << 51)
        | (4u64 << 42)
        | (12u64 << 36)
        | (8u64 << 30)
        | (49u64 << 24)
        | (50u64 << 18)
        | (51u64 << 12)
        | (32u64 << 6)
        | 32u64;
    ident[4..11].copy_from_slice(&me.to_be_bytes()[1..8]);
    seal(&mut ident);

    tracker.update(&es_message(&ident, t0), &mut counters);

    let even = df17_position(0x3c6614, 30_000, 48.0, 11.0, CPRFormat::Even);
    let odd = df17_position(0x3c6614, 30_000, 48.0, 11.0, CPRFormat::Odd);
    tracker.update(&es_message(&even, t0), &mut counters);
    tracker.update(&es_message(&odd, t0 + 400), &mut counters);

    let idx = tracker.registry.find(0x3c6614).unwrap();
    assert!(tracker.registry.get(idx).callsign_valid.valid());
    assert!(tracker.registry.get(idx).position_valid.valid());

    // after 16 seconds everything is merely stale
    tracker.remove_stale(t0 + 16_000);
    let a = tracker.registry.get(idx);
    assert!(a.callsign_valid.valid());
    assert!(a.callsign_valid.stale);

    // after 31 seconds the default-expiry validities are gone
    tracker.remove_stale(t0 + 31_000);
    let a = tracker.registry.get(idx);
    assert!(!a.callsign_valid.valid());
    assert!(!a.position_valid.valid());

    // and after the display TTL the aircraft itself is reaped
    tracker.remove_stale(t0 + 31_000 + tracker.settings.track_expire + 1);
    assert!(tracker.registry.find(0x3c6614).is_none());
}

#[test]
fn test_jaero_validity_long_expiry() {
    let mut tracker = small_tracker();
    let t0: u64 = 10_000_000;

    let idx = tracker.registry.find_or_create(0x424242, t0).unwrap();
    {
        let a = tracker.registry.get_mut(idx);
        a.seen = t0;
        a.position_valid.source = DataSource::Jaero;
        a.position_valid.last_source = DataSource::Jaero;
        a.position_valid.updated = t0;
    }

    // half an hour later a JAERO position still stands
    tracker.remove_stale(t0 + 32 * 60_000);
    assert!(tracker.registry.get(idx).position_valid.valid());

    // 34 minutes exceeds the JAERO expiry
    tracker.remove_stale(t0 + 34 * 60_000);
    let idx = tracker.registry.find(0x424242);
    assert!(idx.is_none() || !tracker.registry.get(idx.unwrap()).position_valid.valid());
}

#[test]
fn test_wind_and_oat_derivation() {
    let now = 5_000_000;
    let mut a = Aircraft::new(0x400123, now);
    a.airground = AirGround::Airborne;
    a.position_valid.source = DataSource::Adsb;
    a.position_valid.updated = now;

    let fresh = Validity {
        updated: now,
        source: DataSource::Adsb,
        last_source: DataSource::Adsb,
        ..Default::default()
    };

    a.tas = 450;
    a.tas_valid = fresh;
    a.gs = 430.0;
    a.gs_valid = fresh;
    a.track = 90.0;
    a.track_valid = fresh;
    a.true_heading = 85.0;
    a.true_heading_valid = fresh;

    calc_wind(&mut a, now);
    assert_eq!(a.wind_updated, now);
    assert!(
        a.wind_speed > 40.0 && a.wind_speed < 46.0,
        "wind speed {}",
        a.wind_speed
    );
    assert!(
        a.wind_direction > 320.0 && a.wind_direction < 340.0,
        "wind direction {}",
        a.wind_direction
    );

    a.mach = 0.78;
    a.mach_valid = fresh;
    calc_temp(&mut a, now);
    assert_eq!(a.oat_updated, now);
    assert!(a.oat > -60.0 && a.oat < -48.0, "oat {}", a.oat);
    assert!(a.tat > a.oat, "tat {} oat {}", a.tat, a.oat);
}

#[test]
fn test_local_cpr_after_global() {
    let mut tracker = small_tracker();
    let mut counters = Counters::default();
    let t0: u64 = 2_000_000;

    let even = df17_position(0x394c0f, 20_000, 43.3, 1.35, CPRFormat::Even);
    let odd = df17_position(0x394c0f, 20_000, 43.3, 1.35, CPRFormat::Odd);
    tracker.update(&es_message(&even, t0), &mut counters);
    tracker.update(&es_message(&odd, t0 + 200), &mut counters);
    assert_eq!(counters.cpr_global_ok, 1);

    // a lone half a minute later: the pair window is gone, but the
    // aircraft-relative decode resolves it
    let even = df17_position(0x394c0f, 20_000, 43.35, 1.36, CPRFormat::Even);
    let update = tracker
        .update(&es_message(&even, t0 + 30_000), &mut counters)
        .unwrap();
    assert!(update.cpr_relative);
    let pos = update.position.unwrap();
    assert!((pos.latitude - 43.35).abs() < 0.01);
    assert_eq!(counters.cpr_local_ok, 1);
    assert_eq!(counters.cpr_local_aircraft_relative, 1);
}

#[test]
fn test_squawk_needs_confirmation() {
    let mut a = Aircraft::new(0x111111, 0);
    let mut ctx = Ctx {
        now: 1_000,
        source: DataSource::ModeS,
        addrtype: AddrType::ModeS,
        receiver_id: 0,
        is_es: false,
        reduce_interval: 1_000,
        reduce_forward: false,
        cpr_valid: false,
    };

    // first sighting is tentative
    assert!(!update_squawk(&mut a, 0x7700, &mut ctx));
    assert!(!a.squawk_valid.valid());

    // the second one sticks
    ctx.now = 2_000;
    assert!(update_squawk(&mut a, 0x7700, &mut ctx));
    assert!(a.squawk_valid.valid());
    assert_eq!(a.squawk, 0x7700);

    // a single damaged code does not repaint it
    ctx.now = 3_000;
    assert!(!update_squawk(&mut a, 0x1234, &mut ctx));
    assert_eq!(a.squawk, 0x7700);
}
