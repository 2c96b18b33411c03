use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::decode::crc::{ErrorTables, LONG_MSG_BITS, LONG_MSG_BYTES, SHORT_MSG_BYTES};
use crate::decode::{decode_frame, frame_bits, score_frame, Reject, TimedMessage};
use crate::filter::IcaoFilter;
use crate::stats::Counters;

/**
 * 2.4 MHz Mode S demodulator.
 *
 * At 2.4 MS/s there are exactly 6 samples per 5 symbols; each symbol is
 * 500 ns wide, each sample 416.7 ns. A phase offset expressed in fifths of
 * a sample distinguishes five sub-sample positions; each of the five
 * correlation functions below slices one manchester-encoded bit starting at
 * its phase. They sum to zero, so a DC offset in the input does not bias
 * the result: the sign is the symbol value, the magnitude the confidence.
 */

pub const MODES_FREQ: u64 = 1_090_000_000;
pub const SAMPLE_RATE: u64 = 2_400_000;

/// 12 MHz receive-clock ticks per sample
const CLOCK_TICKS_PER_SAMPLE: u64 = 5;

/// Samples past the nominal block end a message start may still need:
/// preamble (19 samples) plus a 112-bit frame at 12/5 samples per bit,
/// plus the reach of the widest correlation kernel.
pub const TRAILING_SAMPLES: usize = 19 + (LONG_MSG_BITS * 12).div_ceil(5) + 4;

#[inline(always)]
fn slice_phase0(m: &[u16]) -> i32 {
    5 * m[0] as i32 - 3 * m[1] as i32 - 2 * m[2] as i32
}

#[inline(always)]
fn slice_phase1(m: &[u16]) -> i32 {
    4 * m[0] as i32 - m[1] as i32 - 3 * m[2] as i32
}

#[inline(always)]
fn slice_phase2(m: &[u16]) -> i32 {
    3 * m[0] as i32 + m[1] as i32 - 4 * m[2] as i32
}

#[inline(always)]
fn slice_phase3(m: &[u16]) -> i32 {
    2 * m[0] as i32 + 3 * m[1] as i32 - 5 * m[2] as i32
}

#[inline(always)]
fn slice_phase4(m: &[u16]) -> i32 {
    m[0] as i32 + 5 * m[1] as i32 - 5 * m[2] as i32 - m[3] as i32
}

/// One block of magnitude samples with its timestamps. The data slice is
/// `length` nominal samples plus a trailing overlap so a message starting
/// near the end can be finished without waiting for the next block.
#[derive(Debug, Clone)]
pub struct MagnitudeBuffer {
    /// 12 MHz receive-clock value of the first sample
    pub sample_timestamp: u64,
    /// Wall clock at the start of the block, ms
    pub sys_timestamp: u64,
    /// Number of samples to scan for preambles
    pub length: usize,
    /// Samples lost on the input side before this block
    pub dropped: u64,
    pub mean_level: f64,
    pub mean_power: f64,
    /// length + trailing overlap samples
    pub data: Vec<u16>,
}

/// Producer/consumer ring of magnitude buffers. The reader thread fills the
/// free side, the demodulator drains the filled side; both index updates
/// happen under a short lock and the condvar wakes the consumer.
pub struct SampleRing {
    inner: Mutex<RingState>,
    wakeup: Condvar,
    capacity: usize,
}

struct RingState {
    filled: VecDeque<MagnitudeBuffer>,
    /// trailing samples of the last block, prepended to the next one
    tail: Vec<u16>,
    dropped: u64,
    closed: bool,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        SampleRing {
            inner: Mutex::new(RingState {
                filled: VecDeque::with_capacity(capacity),
                tail: Vec::new(),
                dropped: 0,
                closed: false,
            }),
            wakeup: Condvar::new(),
            capacity,
        }
    }

    /// Push one block of magnitude samples. When the consumer cannot keep
    /// up the block is dropped and counted, never blocking the reader.
    pub fn push(&self, samples: &[u16], sample_timestamp: u64, sys_timestamp: u64) {
        let mut state = self.inner.lock().unwrap();
        if state.closed {
            return;
        }
        if state.filled.len() >= self.capacity {
            state.dropped += samples.len() as u64;
            return;
        }

        let tail_len = state.tail.len();
        let mut data = Vec::with_capacity(tail_len + samples.len());
        data.extend_from_slice(&state.tail);
        data.extend_from_slice(samples);

        let length = data.len().saturating_sub(TRAILING_SAMPLES);
        state.tail = data[length..].to_vec();

        let mut sum_level = 0.0;
        let mut sum_power = 0.0;
        for &s in samples {
            let f = s as f64 / 65535.0;
            sum_level += f;
            sum_power += f * f;
        }
        let n = samples.len().max(1) as f64;

        let buf = MagnitudeBuffer {
            sample_timestamp: sample_timestamp
                .wrapping_sub(tail_len as u64 * CLOCK_TICKS_PER_SAMPLE),
            sys_timestamp,
            length,
            dropped: state.dropped,
            mean_level: sum_level / n,
            mean_power: sum_power / n,
            data,
        };
        state.dropped = 0;
        state.filled.push_back(buf);
        self.wakeup.notify_one();
    }

    /// Take the next filled buffer, waiting up to `timeout`. Returns None
    /// on timeout or once the ring is closed and drained.
    pub fn pop(&self, timeout: std::time::Duration) -> Option<MagnitudeBuffer> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if let Some(buf) = state.filled.pop_front() {
                return Some(buf);
            }
            if state.closed {
                return None;
            }
            let (next, result) = self.wakeup.wait_timeout(state, timeout).unwrap();
            state = next;
            if result.timed_out() {
                return state.filled.pop_front();
            }
        }
    }

    /// Wake all waiters and refuse further input.
    pub fn close(&self) {
        let mut state = self.inner.lock().unwrap();
        state.closed = true;
        self.wakeup.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

// Preamble peak patterns for phases 3..7. Sample indices of the pulse pairs
// and of the noise floor estimate differ per phase; the ideal sample values
// (in fifths of the pulse height, Xn marking the first data symbol):
//
// sample#: 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0
// phase 3: 2/4\0/5\1 0 0 0 0/5\1/3 3\0 0 0 0 0 0 X4
// phase 4: 1/5\0/4\2 0 0 0 0/4\2 2/4\0 0 0 0 0 0 0 X0
// phase 5: 0/5\1/3 3\0 0 0 0/3 3\1/5\0 0 0 0 0 0 0 X1
// phase 6: 0/4\2 2/4\0 0 0 0 2/4\0/5\1 0 0 0 0 0 0 X2
// phase 7: 0/3 3\1/5\0 0 0 0 1/5\0/4\2 0 0 0 0 0 0 X3
#[inline]
fn check_preamble(preamble: &[u16]) -> bool {
    // quick check: a rising edge 0->1 and a falling edge 12->13
    if !(preamble[0] < preamble[1] && preamble[12] > preamble[13]) {
        return false;
    }

    let p = |i: usize| preamble[i] as u32;

    let (high, base_signal, base_noise) = if preamble[1] > preamble[2]
        && preamble[2] < preamble[3]
        && preamble[3] > preamble[4]
        && preamble[8] < preamble[9]
        && preamble[9] > preamble[10]
        && preamble[10] < preamble[11]
    {
        // peaks at 1,3,9,11-12: phase 3
        (
            (p(1) + p(3) + p(9) + p(11) + p(12)) / 4,
            p(1) + p(3) + p(9),
            p(5) + p(6) + p(7),
        )
    } else if preamble[1] > preamble[2]
        && preamble[2] < preamble[3]
        && preamble[3] > preamble[4]
        && preamble[8] < preamble[9]
        && preamble[9] > preamble[10]
        && preamble[11] < preamble[12]
    {
        // peaks at 1,3,9,12: phase 4
        (
            (p(1) + p(3) + p(9) + p(12)) / 4,
            p(1) + p(3) + p(9) + p(12),
            p(5) + p(6) + p(7) + p(8),
        )
    } else if preamble[1] > preamble[2]
        && preamble[2] < preamble[3]
        && preamble[4] > preamble[5]
        && preamble[8] < preamble[9]
        && preamble[10] > preamble[11]
        && preamble[11] < preamble[12]
    {
        // peaks at 1,3-4,9-10,12: phase 5
        (
            (p(1) + p(3) + p(4) + p(9) + p(10) + p(12)) / 4,
            p(1) + p(12),
            p(6) + p(7),
        )
    } else if preamble[1] > preamble[2]
        && preamble[3] < preamble[4]
        && preamble[4] > preamble[5]
        && preamble[9] < preamble[10]
        && preamble[10] > preamble[11]
        && preamble[11] < preamble[12]
    {
        // peaks at 1,4,10,12: phase 6
        (
            (p(1) + p(4) + p(10) + p(12)) / 4,
            p(1) + p(4) + p(10) + p(12),
            p(5) + p(6) + p(7) + p(8),
        )
    } else if preamble[2] > preamble[3]
        && preamble[3] < preamble[4]
        && preamble[4] > preamble[5]
        && preamble[9] < preamble[10]
        && preamble[10] > preamble[11]
        && preamble[11] < preamble[12]
    {
        // peaks at 1-2,4,10,12: phase 7
        (
            (p(1) + p(2) + p(4) + p(10) + p(12)) / 4,
            p(4) + p(10) + p(12),
            p(6) + p(7) + p(8),
        )
    } else {
        // no suitable peaks
        return false;
    };

    // require about 3.5 dB SNR
    if base_signal * 2 < 3 * base_noise {
        return false;
    }

    // the nominally quiet bits have to be quiet
    let high = high.min(u16::MAX as u32) as u16;
    if preamble[5] >= high
        || preamble[6] >= high
        || preamble[7] >= high
        || preamble[8] >= high
        || preamble[14] >= high
        || preamble[15] >= high
        || preamble[16] >= high
        || preamble[17] >= high
        || preamble[18] >= high
    {
        return false;
    }

    true
}

/// Demodulate 112 bits starting 19+phase/5 samples after `start`, slicing
/// at the given sub-sample phase. Returns the number of bytes decoded (the
/// DF field cuts the message short where possible).
fn demod_bits_at_phase(m: &[u16], start: usize, try_phase: usize, msg: &mut [u8]) -> usize {
    let mut ptr = start + 19 + try_phase / 5;
    let mut phase = try_phase % 5;
    let mut bytelen = LONG_MSG_BYTES;

    let mut i = 0;
    while i < bytelen {
        let slice = &m[ptr..];
        let byte = match phase {
            0 => {
                let b = (u8::from(slice_phase0(slice) > 0) << 7)
                    | (u8::from(slice_phase2(&slice[2..]) > 0) << 6)
                    | (u8::from(slice_phase4(&slice[4..]) > 0) << 5)
                    | (u8::from(slice_phase1(&slice[7..]) > 0) << 4)
                    | (u8::from(slice_phase3(&slice[9..]) > 0) << 3)
                    | (u8::from(slice_phase0(&slice[12..]) > 0) << 2)
                    | (u8::from(slice_phase2(&slice[14..]) > 0) << 1)
                    | u8::from(slice_phase4(&slice[16..]) > 0);
                phase = 1;
                ptr += 19;
                b
            }
            1 => {
                let b = (u8::from(slice_phase1(slice) > 0) << 7)
                    | (u8::from(slice_phase3(&slice[2..]) > 0) << 6)
                    | (u8::from(slice_phase0(&slice[5..]) > 0) << 5)
                    | (u8::from(slice_phase2(&slice[7..]) > 0) << 4)
                    | (u8::from(slice_phase4(&slice[9..]) > 0) << 3)
                    | (u8::from(slice_phase1(&slice[12..]) > 0) << 2)
                    | (u8::from(slice_phase3(&slice[14..]) > 0) << 1)
                    | u8::from(slice_phase0(&slice[17..]) > 0);
                phase = 2;
                ptr += 19;
                b
            }
            2 => {
                let b = (u8::from(slice_phase2(slice) > 0) << 7)
                    | (u8::from(slice_phase4(&slice[2..]) > 0) << 6)
                    | (u8::from(slice_phase1(&slice[5..]) > 0) << 5)
                    | (u8::from(slice_phase3(&slice[7..]) > 0) << 4)
                    | (u8::from(slice_phase0(&slice[10..]) > 0) << 3)
                    | (u8::from(slice_phase2(&slice[12..]) > 0) << 2)
                    | (u8::from(slice_phase4(&slice[14..]) > 0) << 1)
                    | u8::from(slice_phase1(&slice[17..]) > 0);
                phase = 3;
                ptr += 19;
                b
            }
            3 => {
                let b = (u8::from(slice_phase3(slice) > 0) << 7)
                    | (u8::from(slice_phase0(&slice[3..]) > 0) << 6)
                    | (u8::from(slice_phase2(&slice[5..]) > 0) << 5)
                    | (u8::from(slice_phase4(&slice[7..]) > 0) << 4)
                    | (u8::from(slice_phase1(&slice[10..]) > 0) << 3)
                    | (u8::from(slice_phase3(&slice[12..]) > 0) << 2)
                    | (u8::from(slice_phase0(&slice[15..]) > 0) << 1)
                    | u8::from(slice_phase2(&slice[17..]) > 0);
                phase = 4;
                ptr += 19;
                b
            }
            _ => {
                let b = (u8::from(slice_phase4(slice) > 0) << 7)
                    | (u8::from(slice_phase1(&slice[3..]) > 0) << 6)
                    | (u8::from(slice_phase3(&slice[5..]) > 0) << 5)
                    | (u8::from(slice_phase0(&slice[8..]) > 0) << 4)
                    | (u8::from(slice_phase2(&slice[10..]) > 0) << 3)
                    | (u8::from(slice_phase4(&slice[12..]) > 0) << 2)
                    | (u8::from(slice_phase1(&slice[15..]) > 0) << 1)
                    | u8::from(slice_phase3(&slice[17..]) > 0);
                phase = 0;
                ptr += 20;
                b
            }
        };

        msg[i] = byte;
        if i == 0 {
            bytelen = match msg[0] >> 3 {
                0 | 4 | 5 | 11 => SHORT_MSG_BYTES,
                16 | 17 | 18 | 20 | 21 | 24 => LONG_MSG_BYTES,
                _ => 1, // unknown DF, give up immediately
            };
        }
        i += 1;
    }

    bytelen
}

/// Demodulate a buffer of magnitude samples into tracker-ready messages.
/// Candidates found by the preamble detector are decoded at every phase in
/// 4..=8 and the phase with the best score wins.
pub fn demodulate2400(
    mag: &MagnitudeBuffer,
    filter: &mut IcaoFilter,
    tables: &ErrorTables,
    counters: &mut Counters,
) -> Vec<TimedMessage> {
    let mut out = Vec::new();
    let m = &mag.data;

    let mut msg1 = [0u8; LONG_MSG_BYTES];
    let mut msg2 = [0u8; LONG_MSG_BYTES];
    let mut use_msg1 = true;

    let mut sum_scaled_signal_power: u64 = 0;

    counters.samples_processed += mag.length as u64;
    counters.samples_dropped += mag.dropped;

    let mut j = 0;
    while j < mag.length {
        if !check_preamble(&m[j..]) {
            j += 1;
            continue;
        }

        counters.demod_preambles += 1;

        // try all phases, keep the best scoring message
        let mut bestscore = -2;
        let mut bestphase = None;
        let mut bestlen = 0;
        for try_phase in 4..=8 {
            let msg = if use_msg1 { &mut msg1 } else { &mut msg2 };
            let bytelen = demod_bits_at_phase(m, j, try_phase, msg);
            if bytelen < SHORT_MSG_BYTES {
                continue;
            }

            let score = score_frame(&msg[..bytelen], filter, tables);
            if score > bestscore {
                bestscore = score;
                bestphase = Some(try_phase);
                bestlen = bytelen;
                // swap to the other buffer so a worse phase does not
                // clobber the winner
                use_msg1 = !use_msg1;
            }
        }

        let Some(bestphase) = bestphase else {
            counters.demod_rejected_bad += 1;
            j += 1;
            continue;
        };
        if bestscore < 0 {
            if bestscore == -1 {
                counters.demod_rejected_unknown_icao += 1;
            } else {
                counters.demod_rejected_bad += 1;
            }
            j += 1;
            continue;
        }

        // the winning buffer is the one we last swapped away from
        let bestmsg = if use_msg1 { &mut msg2 } else { &mut msg1 };
        let frame = &mut bestmsg[..bestlen];
        let msgbits = frame_bits(frame[0] >> 3);

        // report the timestamp at the end of bit 56 like the Beast does,
        // even for long frames
        let timestamp = mag
            .sample_timestamp
            .wrapping_add(j as u64 * CLOCK_TICKS_PER_SAMPLE)
            .wrapping_add((8 + 56) * 12)
            .wrapping_add(bestphase as u64);
        let system_timestamp = mag.sys_timestamp
            + timestamp.wrapping_sub(mag.sample_timestamp) / 12_000;

        let decoded = match decode_frame(frame, filter, tables) {
            Ok(decoded) => decoded,
            Err(Reject::UnknownIcao) => {
                counters.demod_rejected_unknown_icao += 1;
                j += 1;
                continue;
            }
            Err(_) => {
                counters.demod_rejected_bad += 1;
                j += 1;
                continue;
            }
        };
        counters.demod_accepted[decoded.corrected_bits.min(2) as usize] += 1;

        // measure signal power over the message body
        let signal_len = msgbits * 12 / 5;
        let mut scaled_signal_power: u64 = 0;
        for k in 0..signal_len {
            let sample = m[j + 19 + k] as u64;
            scaled_signal_power += sample * sample;
        }
        let signal_power = scaled_signal_power as f64 / 65535.0 / 65535.0;
        let signal_level = signal_power / signal_len as f64;
        sum_scaled_signal_power += scaled_signal_power;

        counters.signal_power_sum += signal_power;
        counters.signal_power_count += signal_len as u64;
        if signal_level > counters.peak_signal_power {
            counters.peak_signal_power = signal_level;
        }
        if signal_level > 0.50119 {
            // signal power above -3 dBFS
            counters.strong_signal_count += 1;
        }

        out.push(TimedMessage {
            timestamp,
            system_timestamp,
            signal_level,
            receiver_id: 0,
            decoded,
        });

        // skip to 8 bits before the end of the message: two messages that
        // almost collide can often both be decoded
        j += msgbits * 12 / 5;
        j += 1;
    }

    // whatever power was not part of a message is noise
    let sum_signal_power = sum_scaled_signal_power as f64 / 65535.0 / 65535.0;
    counters.noise_power_sum += mag.mean_power * mag.length as f64 - sum_signal_power;
    counters.noise_power_count += mag.length as u64;

    out
}

// Render a frame into 2.4 MS/s magnitude samples for the tests. The signal
// is built in fifths of a sample: the preamble leading edge sits 4/5 into
// the first sample, which puts the data bits exactly on a sample boundary
// 20 samples later and reproduces the ideal preamble shape
// 1/5\0/4\2 0 0 0 0/4\2 2/4\0 of the detector's middle pattern. Each sample
// gets the fraction of pulse energy it overlaps.
#[cfg(test)]
pub(crate) fn synthesize_for_tests(frame: &[u8]) -> Vec<u16> {
    const HIGH: i64 = 50_000;
    let t0: i64 = 4;

    // preamble pulses at 0, 1, 3.5 and 4.5 µs; one pulse is 6 fifths
    let mut pulses: Vec<(i64, i64)> = [0, 12, 42, 54]
        .iter()
        .map(|&p| (t0 + p, t0 + p + 6))
        .collect();

    let nbits = frame.len() * 8;
    for bit in 0..nbits {
        let value = (frame[bit / 8] >> (7 - (bit & 7))) & 1;
        let period = t0 + 96 + 12 * bit as i64;
        let on = if value == 1 { period } else { period + 6 };
        pulses.push((on, on + 6));
    }

    let total_fifths = t0 + 96 + 12 * nbits as i64 + 12;
    let mut block = vec![0u16; (total_fifths / 5) as usize + 2];
    for (a, b) in pulses {
        for s in (a / 5) as usize..=((b - 1) / 5) as usize {
            let s_start = 5 * s as i64;
            let overlap = (b.min(s_start + 5) - a.max(s_start)).max(0);
            block[s] = block[s].saturating_add((HIGH * overlap / 5) as u16);
        }
    }

    let mut out = vec![0u16; 50];
    out.extend_from_slice(&block);
    out.extend_from_slice(&vec![0u16; TRAILING_SAMPLES + 50]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::crc::FixBits;
    use crate::decode::DF;
    use hexlit::hex;

    #[test]
    fn test_demodulate_synthetic_frame() {
        let frame = hex!("8D406B902015A678D4D220AA4BDA");
        let samples = synthesize_for_tests(&frame);

        let ring = SampleRing::new(4);
        ring.push(&samples, 0, 0);
        let buf = ring.pop(std::time::Duration::from_millis(10)).unwrap();

        let mut filter = IcaoFilter::new();
        let tables = ErrorTables::new(FixBits::One);
        let mut counters = Counters::default();

        let messages = demodulate2400(&buf, &mut filter, &tables, &mut counters);
        assert_eq!(messages.len(), 1, "preambles: {}", counters.demod_preambles);
        let decoded = &messages[0].decoded;
        assert_eq!(decoded.addr, 0x406b90);
        assert_eq!(decoded.corrected_bits, 0);
        assert!(matches!(decoded.message.df, DF::ExtendedSquitterADSB(_)));
        assert_eq!(counters.demod_accepted[0], 1);
    }

    #[test]
    fn test_ring_overlap_carries_tail() {
        let ring = SampleRing::new(4);
        let block: Vec<u16> = (0..4096u32).map(|x| (x & 0xffff) as u16).collect();
        ring.push(&block, 0, 0);
        ring.push(&block, 4096 * 5, 0);

        let first = ring.pop(std::time::Duration::from_millis(10)).unwrap();
        let second = ring.pop(std::time::Duration::from_millis(10)).unwrap();

        assert_eq!(first.length, 4096 - TRAILING_SAMPLES);
        // the second buffer starts with the first one's trailing samples
        assert_eq!(
            second.data[..TRAILING_SAMPLES],
            first.data[first.length..first.length + TRAILING_SAMPLES]
        );
        assert_eq!(
            second.sample_timestamp,
            (4096 - TRAILING_SAMPLES as u64) * 5
        );
    }

    #[test]
    fn test_ring_drops_when_full() {
        let ring = SampleRing::new(1);
        let block = vec![0u16; 1024];
        ring.push(&block, 0, 0);
        ring.push(&block, 0, 0); // dropped
        ring.push(&block, 0, 0); // dropped

        let _ = ring.pop(std::time::Duration::from_millis(1)).unwrap();
        ring.push(&block, 0, 0);
        let next = ring.pop(std::time::Duration::from_millis(1)).unwrap();
        assert_eq!(next.dropped, 2048);
    }

    #[test]
    fn test_ring_close_wakes_consumer() {
        let ring = SampleRing::new(4);
        ring.close();
        assert!(ring.pop(std::time::Duration::from_secs(5)).is_none());
    }
}
