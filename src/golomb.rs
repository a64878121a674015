//! Golomb coding for sorted `u64` sequences.
//!
//! The duplicate detector ships long sorted runs of hash values; their deltas
//! are geometrically distributed, which is the textbook case for Golomb
//! codes. For `n` values drawn from a universe of span `U` the parameter is
//! `b = max(1, round(U * ln 2 / n))`. A packet is self-contained:
//!
//! ```text
//! count: u64 | b: u64 | first value: u64 | (count-1) Golomb-coded deltas
//! ```

use byteorder::{ByteOrder, LittleEndian};

/// Optimal Golomb parameter for `n` values spanning `span`.
pub fn golomb_param(n: usize, span: u64) -> u64 {
    if n == 0 {
        return 1;
    }
    let b = (span as f64 * std::f64::consts::LN_2 / n as f64).round();
    // Clamp so the truncated-binary remainder always fits in 63 bits.
    (b as u64).clamp(1, 1 << 63)
}

#[derive(Debug, Default)]
struct BitWriter {
    bytes: Vec<u8>,
    /// Bits already used in the last byte.
    used: u32,
}

impl BitWriter {
    fn push_bit(&mut self, bit: bool) {
        if self.used == 0 {
            self.bytes.push(0);
        }
        if bit {
            *self.bytes.last_mut().unwrap() |= 1 << self.used;
        }
        self.used = (self.used + 1) % 8;
    }

    /// Low-order `count` bits of `value`, least significant first.
    fn push_bits(&mut self, value: u64, count: u32) {
        for i in 0..count {
            self.push_bit((value >> i) & 1 == 1);
        }
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, pos: 0 }
    }

    fn read_bit(&mut self) -> bool {
        let byte = self.bytes[self.pos / 8];
        let bit = (byte >> (self.pos % 8)) & 1 == 1;
        self.pos += 1;
        bit
    }

    fn read_bits(&mut self, count: u32) -> u64 {
        let mut value = 0;
        for i in 0..count {
            value |= (self.read_bit() as u64) << i;
        }
        value
    }
}

fn ceil_log2(b: u64) -> u32 {
    64 - (b - 1).leading_zeros().min(64)
}

fn write_golomb(writer: &mut BitWriter, value: u64, b: u64) {
    let quotient = value / b;
    let remainder = value % b;
    for _ in 0..quotient {
        writer.push_bit(true);
    }
    writer.push_bit(false);

    // Truncated binary remainder.
    let k = ceil_log2(b);
    if k > 0 {
        let threshold = (1u64 << k) - b;
        if remainder < threshold {
            writer.push_bits(remainder, k - 1);
        } else {
            writer.push_bits(remainder + threshold, k);
        }
    }
}

fn read_golomb(reader: &mut BitReader, b: u64) -> u64 {
    let mut quotient = 0u64;
    while reader.read_bit() {
        quotient += 1;
    }

    let k = ceil_log2(b);
    let remainder = if k == 0 {
        0
    } else {
        let threshold = (1u64 << k) - b;
        let mut r = reader.read_bits(k - 1);
        if r >= threshold {
            r = (r << 1 | reader.read_bit() as u64) - threshold;
        }
        r
    };
    quotient * b + remainder
}

/// Encodes a sorted run of values into one packet. `span` is the width of
/// the interval the values were drawn from and only steers the parameter
/// choice; decoding does not need it.
pub fn encode_sorted(values: &[u64], span: u64) -> Vec<u8> {
    debug_assert!(values.windows(2).all(|w| w[0] <= w[1]), "input not sorted");

    let b = golomb_param(values.len().saturating_sub(1).max(1), span);
    let mut packet = vec![0u8; 16];
    LittleEndian::write_u64(&mut packet[0..8], values.len() as u64);
    LittleEndian::write_u64(&mut packet[8..16], b);
    let Some((&first, rest)) = values.split_first() else {
        return packet;
    };

    let mut word = [0u8; 8];
    LittleEndian::write_u64(&mut word, first);
    packet.extend_from_slice(&word);

    let mut writer = BitWriter::default();
    let mut prev = first;
    for &value in rest {
        write_golomb(&mut writer, value - prev, b);
        prev = value;
    }
    packet.extend_from_slice(&writer.bytes);
    packet
}

/// Inverse of [`encode_sorted`].
pub fn decode_sorted(packet: &[u8]) -> Vec<u64> {
    assert!(packet.len() >= 16, "golomb packet shorter than its header");
    let count = LittleEndian::read_u64(&packet[0..8]) as usize;
    let b = LittleEndian::read_u64(&packet[8..16]);
    if count == 0 {
        return Vec::new();
    }

    let mut values = Vec::with_capacity(count);
    let mut prev = LittleEndian::read_u64(&packet[16..24]);
    values.push(prev);

    let mut reader = BitReader::new(&packet[24..]);
    for _ in 1..count {
        prev += read_golomb(&mut reader, b);
        values.push(prev);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_param() {
        // 2^10 universe, 1024 * ln2 ≈ 710.
        assert_eq!(golomb_param(1, 1 << 10), 710);
        assert_eq!(golomb_param(0, 1 << 10), 1);
        // Dense runs clamp to 1.
        assert_eq!(golomb_param(1 << 20, 16), 1);
    }

    #[test]
    fn test_empty_and_singleton() {
        assert!(decode_sorted(&encode_sorted(&[], u64::MAX)).is_empty());
        assert_eq!(decode_sorted(&encode_sorted(&[42], u64::MAX)), vec![42]);
        assert_eq!(
            decode_sorted(&encode_sorted(&[u64::MAX], u64::MAX)),
            vec![u64::MAX]
        );
    }

    #[test]
    fn test_runs_with_duplicates() {
        let values = vec![5, 5, 5, 9, 9, 1000, 1000];
        assert_eq!(decode_sorted(&encode_sorted(&values, 1 << 16)), values);
    }

    #[test]
    fn test_small_parameters() {
        // b == 1 degenerates to pure unary deltas.
        let values = vec![0u64, 1, 2, 3, 10];
        for b in [1u64, 2, 3, 5, 7, 8] {
            let mut writer = BitWriter::default();
            for w in values.windows(2) {
                write_golomb(&mut writer, w[1] - w[0], b);
            }
            let mut reader = BitReader::new(&writer.bytes);
            let mut decoded = vec![values[0]];
            for _ in 1..values.len() {
                decoded.push(decoded.last().unwrap() + read_golomb(&mut reader, b));
            }
            assert_eq!(decoded, values, "b={b}");
        }
    }

    #[test]
    fn test_uniform_u64_roundtrip() {
        // 10_000 sorted values drawn uniformly from the full u64 range.
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let mut values: Vec<u64> = (0..10_000).map(|_| rng.gen()).collect();
        values.sort_unstable();

        let packet = encode_sorted(&values, u64::MAX);
        assert_eq!(decode_sorted(&packet), values);

        // The coded stream should be far below the raw 8 bytes per value.
        assert!(packet.len() < 8 * values.len() / 2);
    }
}
