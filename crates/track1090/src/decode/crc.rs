use once_cell::sync::Lazy;

/**
 * Mode S CRC calculation and error correction.
 *
 * All Mode S downlink frames carry a 24-bit parity field generated by the
 * polynomial 0xfff409. Short frames are 56 bits, long frames 112 bits.
 * The syndrome of a received frame (remainder XORed against the last three
 * bytes) is zero for an undamaged DF17/18 frame and equals the transponder
 * address for the address/parity downlink formats.
 *
 * Error correction works from precomputed tables: for every 1-bit (and
 * optionally 2-bit) error pattern the resulting syndrome is tabulated, the
 * tables are sorted by syndrome and looked up by binary search. The five DF
 * bits are never corrected: a frame with a damaged DF field would be
 * reinterpreted as a different message length entirely.
 */

const GENERATOR_POLY: u32 = 0xfff409;

pub const SHORT_MSG_BITS: usize = 56;
pub const LONG_MSG_BITS: usize = 112;
pub const SHORT_MSG_BYTES: usize = SHORT_MSG_BITS / 8;
pub const LONG_MSG_BYTES: usize = LONG_MSG_BITS / 8;

/// Maximum number of bit errors the tables will ever describe
pub const MAX_BITERRORS: usize = 2;

/// CRC values for all single-byte messages, to speed up CRC calculation
static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut c = (i as u32) << 16;
        for _ in 0..8 {
            if c & 0x800000 != 0 {
                c = (c << 1) ^ GENERATOR_POLY;
            } else {
                c <<= 1;
            }
        }
        *entry = c & 0x00ff_ffff;
    }
    table
});

/// Syndrome values for all single-bit errors in a 112-bit frame
static SINGLE_BIT_SYNDROME: Lazy<[u32; LONG_MSG_BITS]> = Lazy::new(|| {
    let mut syndromes = [0u32; LONG_MSG_BITS];
    let mut msg = [0u8; LONG_MSG_BYTES];
    for (i, syndrome) in syndromes.iter_mut().enumerate() {
        msg[i / 8] ^= 1 << (7 - (i & 7));
        *syndrome = checksum(&msg, LONG_MSG_BITS);
        msg[i / 8] ^= 1 << (7 - (i & 7));
    }
    syndromes
});

/// Compute the Mode S CRC syndrome of a 56- or 112-bit frame.
///
/// Returns the remainder XORed against the trailing three bytes, so a
/// parity-correct DF17 frame yields 0 and an address/parity frame yields
/// the 24-bit transponder address.
pub fn checksum(message: &[u8], bits: usize) -> u32 {
    debug_assert!(bits % 8 == 0);
    let n = bits / 8;
    debug_assert!(n >= 3 && n <= message.len());

    let mut rem: u32 = 0;
    for &byte in &message[..n - 3] {
        rem = ((rem << 8) ^ CRC_TABLE[(byte ^ ((rem >> 16) as u8 & 0xff)) as usize])
            & 0x00ff_ffff;
    }

    rem ^ ((message[n - 3] as u32) << 16)
        ^ ((message[n - 2] as u32) << 8)
        ^ (message[n - 1] as u32)
}

/// How many bit errors the syndrome tables may repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixBits {
    /// No repair at all
    Disabled,
    /// Correct 1 bit, full coverage
    #[default]
    One,
    /// Correct up to 2 bits, refusing syndromes ambiguous with 3-4 bit errors
    Two,
}

impl FixBits {
    fn max_correct(self) -> usize {
        match self {
            FixBits::Disabled => 0,
            FixBits::One => 1,
            FixBits::Two => 2,
        }
    }

    fn max_detect(self) -> usize {
        match self {
            FixBits::Disabled => 0,
            // full coverage up to 4 bit detection, no collision flagging needed
            FixBits::One => 1,
            // detect out to 4 bit errors, reduces 2-bit coverage to about 65%
            FixBits::Two => 4,
        }
    }
}

/// A correctable error pattern: the syndrome it produces and the bit
/// positions (relative to the frame start) to flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub syndrome: u32,
    errors: i8,
    bit: [u8; MAX_BITERRORS],
}

impl ErrorInfo {
    const NO_ERRORS: ErrorInfo = ErrorInfo {
        syndrome: 0,
        errors: 0,
        bit: [0; MAX_BITERRORS],
    };

    pub fn error_count(&self) -> usize {
        self.errors.max(0) as usize
    }

    pub fn bits(&self) -> &[u8] {
        &self.bit[..self.error_count()]
    }
}

fn combinations(n: usize, k: usize) -> usize {
    if k == 0 || k == n {
        return 1;
    }
    if k > n {
        return 0;
    }
    let mut result = 1;
    let mut n = n;
    for i in 1..=k {
        result = result * n / i;
        n -= 1;
    }
    result
}

// Recursively populate `table` with the syndromes of all error patterns of
// up to `max_errors` bits within [startbit, endbit). `offset` shifts bit
// positions into the 112-bit syndrome table for short frames.
fn prepare_subtable(
    table: &mut Vec<ErrorInfo>,
    offset: usize,
    startbit: usize,
    endbit: usize,
    base_entry: ErrorInfo,
    error_bit: usize,
    max_errors: usize,
) {
    if error_bit >= max_errors {
        return;
    }

    for i in startbit..endbit {
        let mut entry = base_entry;
        entry.syndrome ^= SINGLE_BIT_SYNDROME[i + offset];
        entry.errors = (error_bit + 1) as i8;
        entry.bit[error_bit] = i as u8;
        table.push(entry);
        prepare_subtable(table, offset, i + 1, endbit, entry, error_bit + 1, max_errors);
    }
}

// Walk all error patterns of first_error..=last_error bits and flag table
// entries whose syndrome collides with one of them: those syndromes are
// ambiguous and must not be corrected.
fn flag_collisions(
    table: &mut [ErrorInfo],
    offset: usize,
    startbit: usize,
    endbit: usize,
    base_syndrome: u32,
    error_bit: usize,
    first_error: usize,
    last_error: usize,
) -> usize {
    if error_bit > last_error {
        return 0;
    }

    let mut count = 0;
    for i in startbit..endbit {
        let syndrome = base_syndrome ^ SINGLE_BIT_SYNDROME[i + offset];

        if error_bit >= first_error {
            if let Ok(idx) = table.binary_search_by_key(&syndrome, |e| e.syndrome) {
                if table[idx].errors != -1 {
                    table[idx].errors = -1;
                    count += 1;
                }
            }
        }

        count += flag_collisions(
            table,
            offset,
            i + 1,
            endbit,
            syndrome,
            error_bit + 1,
            first_error,
            last_error,
        );
    }

    count
}

fn prepare_error_table(bits: usize, max_correct: usize, max_detect: usize) -> Vec<ErrorInfo> {
    assert!(bits <= LONG_MSG_BITS);
    assert!(max_correct <= MAX_BITERRORS);
    assert!(max_detect >= max_correct);

    if max_correct == 0 {
        return Vec::new();
    }

    let maxsize: usize = (1..=max_correct).map(|i| combinations(bits - 5, i)).sum();
    let mut table = Vec::with_capacity(maxsize);

    // never consider the first 5 bits (the DF field)
    prepare_subtable(
        &mut table,
        LONG_MSG_BITS - bits,
        5,
        bits,
        ErrorInfo::NO_ERRORS,
        0,
        max_correct,
    );

    table.sort_unstable_by_key(|e| e.syndrome);

    // Drop groups of entries sharing a syndrome: more than one error pattern
    // produces it, so correcting would be a guess.
    let mut deduped: Vec<ErrorInfo> = Vec::with_capacity(table.len());
    let mut i = 0;
    while i < table.len() {
        let mut j = i + 1;
        while j < table.len() && table[j].syndrome == table[i].syndrome {
            j += 1;
        }
        if j == i + 1 {
            deduped.push(table[i]);
        }
        i = j;
    }
    let mut table = deduped;

    if max_detect > max_correct {
        let flagged = flag_collisions(
            &mut table,
            LONG_MSG_BITS - bits,
            5,
            bits,
            0,
            1,
            max_correct + 1,
            max_detect,
        );
        if flagged > 0 {
            table.retain(|e| e.errors != -1);
        }
    }

    table
}

/// Syndrome tables for 56- and 112-bit frames, prepared once at startup.
pub struct ErrorTables {
    nfix: FixBits,
    short: Vec<ErrorInfo>,
    long: Vec<ErrorInfo>,
}

impl ErrorTables {
    pub fn new(nfix: FixBits) -> Self {
        let (short, long) = match nfix {
            FixBits::Disabled => (Vec::new(), Vec::new()),
            _ => (
                prepare_error_table(SHORT_MSG_BITS, nfix.max_correct(), nfix.max_detect()),
                prepare_error_table(LONG_MSG_BITS, nfix.max_correct(), nfix.max_detect()),
            ),
        };
        ErrorTables { nfix, short, long }
    }

    pub fn nfix(&self) -> FixBits {
        self.nfix
    }

    /// Given an error syndrome and frame length, return an error-correction
    /// descriptor, or None if the syndrome is uncorrectable.
    pub fn diagnose(&self, syndrome: u32, bits: usize) -> Option<ErrorInfo> {
        if syndrome == 0 {
            return Some(ErrorInfo::NO_ERRORS);
        }

        debug_assert!(bits == SHORT_MSG_BITS || bits == LONG_MSG_BITS);
        let table = if bits == SHORT_MSG_BITS {
            &self.short
        } else {
            &self.long
        };

        table
            .binary_search_by_key(&syndrome, |e| e.syndrome)
            .ok()
            .map(|idx| table[idx])
    }
}

/// Apply an error-correction descriptor to a frame, flipping 1-2 bits in place.
pub fn apply_fix(msg: &mut [u8], info: &ErrorInfo) {
    for &bit in info.bits() {
        msg[(bit >> 3) as usize] ^= 1 << (7 - (bit & 7));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    #[test]
    fn test_checksum_df17() {
        // parity-correct extended squitter: syndrome is zero
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        assert_eq!(checksum(&bytes, LONG_MSG_BITS), 0);
    }

    #[test]
    fn test_checksum_linear_in_parity_bytes() {
        // address/parity overlays the address on the trailing bytes, so the
        // syndrome must shift by exactly the overlaid value
        let mut bytes = hex!("20001718029FCD");
        let base = checksum(&bytes, SHORT_MSG_BITS);
        bytes[4] ^= 0xa8;
        bytes[5] ^= 0x35;
        bytes[6] ^= 0xaf;
        assert_eq!(checksum(&bytes, SHORT_MSG_BITS), base ^ 0xa835af);
    }

    #[test]
    fn test_single_bit_fix_roundtrip() {
        let tables = ErrorTables::new(FixBits::One);
        let good = hex!("8D406B902015A678D4D220AA4BDA");

        for bit in 5..LONG_MSG_BITS {
            let mut damaged = good;
            damaged[bit / 8] ^= 1 << (7 - (bit & 7));

            let syndrome = checksum(&damaged, LONG_MSG_BITS);
            let info = tables.diagnose(syndrome, LONG_MSG_BITS).unwrap();
            assert_eq!(info.error_count(), 1);

            apply_fix(&mut damaged, &info);
            assert_eq!(damaged, good, "bit {bit} not repaired");
        }
    }

    #[test]
    fn test_two_bit_fix_roundtrip() {
        let tables = ErrorTables::new(FixBits::Two);
        let good = hex!("8D406B902015A678D4D220AA4BDA");

        let mut repaired = 0;
        let mut total = 0;
        for b1 in (5..LONG_MSG_BITS).step_by(7) {
            for b2 in (b1 + 1..LONG_MSG_BITS).step_by(5) {
                total += 1;
                let mut damaged = good;
                damaged[b1 / 8] ^= 1 << (7 - (b1 & 7));
                damaged[b2 / 8] ^= 1 << (7 - (b2 & 7));

                let syndrome = checksum(&damaged, LONG_MSG_BITS);
                let Some(info) = tables.diagnose(syndrome, LONG_MSG_BITS) else {
                    // ambiguous with a 3-4 bit error, correctly refused
                    continue;
                };
                apply_fix(&mut damaged, &info);
                assert_eq!(damaged, good, "bits {b1},{b2} misrepaired");
                repaired += 1;
            }
        }
        // about 65% coverage at two bits
        assert!(repaired * 2 > total, "coverage too low: {repaired}/{total}");
    }

    #[test]
    fn test_df_field_never_corrected() {
        let tables = ErrorTables::new(FixBits::Two);
        let good = hex!("8D406B902015A678D4D220AA4BDA");

        for bit in 0..5 {
            let mut damaged = good;
            damaged[0] ^= 1 << (7 - bit);
            let syndrome = checksum(&damaged, LONG_MSG_BITS);
            if let Some(info) = tables.diagnose(syndrome, LONG_MSG_BITS) {
                // a fix may exist but it must not claim the DF bits
                assert!(info.bits().iter().all(|&b| b >= 5));
            }
        }
    }

    #[test]
    fn test_disabled_tables_never_fix() {
        let tables = ErrorTables::new(FixBits::Disabled);
        let good = hex!("8D406B902015A678D4D220AA4BDA");
        let mut damaged = good;
        damaged[10] ^= 0x40;
        let syndrome = checksum(&damaged, LONG_MSG_BITS);
        assert!(tables.diagnose(syndrome, LONG_MSG_BITS).is_none());
    }
}
