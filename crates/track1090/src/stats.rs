use crate::decode::DataSource;

/// Number of buckets in the receiver range histogram
pub const RANGE_BUCKET_COUNT: usize = 76;

/// Ten-second buckets covering fifteen minutes
const BUCKET_COUNT: usize = 90;
const BUCKET_MILLIS: u64 = 10_000;

/// Counters over one accumulation period.
#[derive(Debug, Clone, Copy)]
pub struct Counters {
    pub start: u64,
    pub end: u64,

    // demodulator
    pub samples_processed: u64,
    pub samples_dropped: u64,
    pub demod_preambles: u64,
    pub demod_rejected_bad: u64,
    pub demod_rejected_unknown_icao: u64,
    /// accepted frames indexed by the number of repaired bits
    pub demod_accepted: [u64; 3],
    pub signal_power_sum: f64,
    pub signal_power_count: u64,
    pub noise_power_sum: f64,
    pub noise_power_count: u64,
    pub peak_signal_power: f64,
    /// signal power above -3 dBFS
    pub strong_signal_count: u64,

    // messages by provenance
    pub messages_total: u64,
    pub remote_received: [u64; 12],
    pub unique_aircraft: u64,

    // position decoding
    pub cpr_surface: u64,
    pub cpr_airborne: u64,
    pub cpr_global_ok: u64,
    pub cpr_global_bad: u64,
    pub cpr_global_skipped: u64,
    pub cpr_global_range_checks: u64,
    pub cpr_global_speed_checks: u64,
    pub cpr_local_ok: u64,
    pub cpr_local_skipped: u64,
    pub cpr_local_range_checks: u64,
    pub cpr_local_speed_checks: u64,
    pub cpr_local_aircraft_relative: u64,
    pub cpr_local_receiver_relative: u64,
    pub pos_all: u64,

    /// altitude updates suppressed by the reliability gate
    pub suppressed_altitude_messages: u64,

    // receiver range
    pub distance_max: f64,
    pub distance_min: f64,
    pub range_histogram: [u64; RANGE_BUCKET_COUNT],
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            start: 0,
            end: 0,
            samples_processed: 0,
            samples_dropped: 0,
            demod_preambles: 0,
            demod_rejected_bad: 0,
            demod_rejected_unknown_icao: 0,
            demod_accepted: [0; 3],
            signal_power_sum: 0.0,
            signal_power_count: 0,
            noise_power_sum: 0.0,
            noise_power_count: 0,
            peak_signal_power: 0.0,
            strong_signal_count: 0,
            messages_total: 0,
            remote_received: [0; 12],
            unique_aircraft: 0,
            cpr_surface: 0,
            cpr_airborne: 0,
            cpr_global_ok: 0,
            cpr_global_bad: 0,
            cpr_global_skipped: 0,
            cpr_global_range_checks: 0,
            cpr_global_speed_checks: 0,
            cpr_local_ok: 0,
            cpr_local_skipped: 0,
            cpr_local_range_checks: 0,
            cpr_local_speed_checks: 0,
            cpr_local_aircraft_relative: 0,
            cpr_local_receiver_relative: 0,
            pos_all: 0,
            suppressed_altitude_messages: 0,
            distance_max: 0.0,
            distance_min: f64::MAX,
            range_histogram: [0; RANGE_BUCKET_COUNT],
        }
    }
}

impl Counters {
    pub fn count_source(&mut self, source: DataSource) {
        self.remote_received[source as usize] += 1;
        self.messages_total += 1;
    }

    /// Fold another period into this one.
    pub fn add(&mut self, other: &Counters) {
        if other.start != 0 && (self.start == 0 || other.start < self.start) {
            self.start = other.start;
        }
        self.end = self.end.max(other.end);

        self.samples_processed += other.samples_processed;
        self.samples_dropped += other.samples_dropped;
        self.demod_preambles += other.demod_preambles;
        self.demod_rejected_bad += other.demod_rejected_bad;
        self.demod_rejected_unknown_icao += other.demod_rejected_unknown_icao;
        for i in 0..self.demod_accepted.len() {
            self.demod_accepted[i] += other.demod_accepted[i];
        }
        self.signal_power_sum += other.signal_power_sum;
        self.signal_power_count += other.signal_power_count;
        self.noise_power_sum += other.noise_power_sum;
        self.noise_power_count += other.noise_power_count;
        self.peak_signal_power = self.peak_signal_power.max(other.peak_signal_power);
        self.strong_signal_count += other.strong_signal_count;
        self.messages_total += other.messages_total;
        for i in 0..self.remote_received.len() {
            self.remote_received[i] += other.remote_received[i];
        }
        self.unique_aircraft += other.unique_aircraft;
        self.cpr_surface += other.cpr_surface;
        self.cpr_airborne += other.cpr_airborne;
        self.cpr_global_ok += other.cpr_global_ok;
        self.cpr_global_bad += other.cpr_global_bad;
        self.cpr_global_skipped += other.cpr_global_skipped;
        self.cpr_global_range_checks += other.cpr_global_range_checks;
        self.cpr_global_speed_checks += other.cpr_global_speed_checks;
        self.cpr_local_ok += other.cpr_local_ok;
        self.cpr_local_skipped += other.cpr_local_skipped;
        self.cpr_local_range_checks += other.cpr_local_range_checks;
        self.cpr_local_speed_checks += other.cpr_local_speed_checks;
        self.cpr_local_aircraft_relative += other.cpr_local_aircraft_relative;
        self.cpr_local_receiver_relative += other.cpr_local_receiver_relative;
        self.pos_all += other.pos_all;
        self.suppressed_altitude_messages += other.suppressed_altitude_messages;
        self.distance_max = self.distance_max.max(other.distance_max);
        self.distance_min = self.distance_min.min(other.distance_min);
        for i in 0..self.range_histogram.len() {
            self.range_histogram[i] += other.range_histogram[i];
        }
    }

    /// Mean signal level over the period, dBFS
    pub fn signal_db(&self) -> Option<f64> {
        if self.signal_power_count == 0 {
            return None;
        }
        Some(10.0 * (self.signal_power_sum / self.signal_power_count as f64).log10())
    }

    /// Mean noise level over the period, dBFS
    pub fn noise_db(&self) -> Option<f64> {
        if self.noise_power_count == 0 {
            return None;
        }
        Some(10.0 * (self.noise_power_sum / self.noise_power_count as f64).log10())
    }
}

/// Range histogram and distance extremes, updated on accepted positions.
pub fn update_range_histogram(counters: &mut Counters, range: f64, max_range: f64) {
    if max_range > 0.0 && range <= max_range {
        if range > counters.distance_max {
            counters.distance_max = range;
        }
        if range < counters.distance_min {
            counters.distance_min = range;
        }
    }

    if max_range > 0.0 {
        let bucket = ((range / max_range * RANGE_BUCKET_COUNT as f64).round() as usize)
            .min(RANGE_BUCKET_COUNT - 1);
        counters.range_histogram[bucket] += 1;
    }
}

/// Rolling statistics: the live period, a 90-bucket ring covering 15
/// minutes and the all-time totals. Aggregates over 1, 5 and 15 minutes
/// are computed by summation on demand.
#[derive(Default)]
pub struct Stats {
    pub current: Counters,
    ring: Vec<Counters>,
    ring_next: usize,
    pub total: Counters,
}

impl Stats {
    pub fn new(now: u64) -> Self {
        let mut stats = Stats {
            ring: vec![Counters::default(); BUCKET_COUNT],
            ..Default::default()
        };
        stats.current.start = now;
        stats
    }

    /// Close the current 10 s period: fold it into the totals and the ring,
    /// then start a fresh one.
    pub fn rotate(&mut self, now: u64) {
        self.current.end = now;
        self.total.add(&self.current);

        self.ring[self.ring_next] = self.current;
        self.ring_next = (self.ring_next + 1) % self.ring.len();

        self.current = Counters {
            start: now,
            ..Default::default()
        };
    }

    fn sum_buckets(&self, buckets: usize) -> Counters {
        let mut sum = Counters::default();
        for i in 0..buckets.min(self.ring.len()) {
            let idx = (self.ring_next + self.ring.len() - 1 - i) % self.ring.len();
            sum.add(&self.ring[idx]);
        }
        sum
    }

    pub fn last_1min(&self) -> Counters {
        self.sum_buckets(60_000 / BUCKET_MILLIS as usize)
    }

    pub fn last_5min(&self) -> Counters {
        self.sum_buckets(300_000 / BUCKET_MILLIS as usize)
    }

    pub fn last_15min(&self) -> Counters {
        self.sum_buckets(900_000 / BUCKET_MILLIS as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_and_aggregates() {
        let mut stats = Stats::new(0);

        for i in 0..10u64 {
            stats.current.demod_preambles = 7;
            stats.current.messages_total = 3;
            stats.rotate((i + 1) * 10_000);
        }

        assert_eq!(stats.total.demod_preambles, 70);
        assert_eq!(stats.last_1min().demod_preambles, 42);
        assert_eq!(stats.last_5min().demod_preambles, 70);
        assert_eq!(stats.last_15min().messages_total, 30);
        assert_eq!(stats.current.demod_preambles, 0);
    }

    #[test]
    fn test_range_histogram_buckets() {
        let mut counters = Counters::default();
        let max_range = 400_000.0;

        update_range_histogram(&mut counters, 100_000.0, max_range);
        update_range_histogram(&mut counters, 100_000.0, max_range);
        update_range_histogram(&mut counters, 500_000.0, max_range);

        let bucket = (100_000.0 / max_range * RANGE_BUCKET_COUNT as f64).round() as usize;
        assert_eq!(counters.range_histogram[bucket], 2);
        // beyond max range lands in the last bucket and not in the extremes
        assert_eq!(counters.range_histogram[RANGE_BUCKET_COUNT - 1], 1);
        assert_eq!(counters.distance_max, 100_000.0);
    }

    #[test]
    fn test_signal_db() {
        let mut counters = Counters::default();
        assert!(counters.signal_db().is_none());
        counters.signal_power_sum = 0.1;
        counters.signal_power_count = 1;
        let db = counters.signal_db().unwrap();
        assert!((db + 10.0).abs() < 1e-9);
    }
}
