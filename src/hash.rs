//! 64-bit string-prefix hashing for the duplicate detector.
//!
//! Two interchangeable hashers, selected at runtime: SipHash-2-4 and xxHash64.
//! Both offer a one-shot prefix hash and an incremental form that folds the
//! hash of a new block into a prior value with XOR, so doubling the probe
//! depth only hashes the newly covered bytes. The filter "size" is the full
//! `u64` range; hash-space intervals are partitioned linearly across
//! receivers.

use std::hash::Hasher;

use siphasher::sip::SipHasher24;
use xxhash_rust::xxh64::xxh64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgo {
    Sip,
    #[default]
    Xx,
}

impl HashAlgo {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sip => "siphash",
            HashAlgo::Xx => "xxhash",
        }
    }

    fn hash_bytes(self, bytes: &[u8]) -> u64 {
        match self {
            HashAlgo::Sip => {
                let mut hasher = SipHasher24::new_with_keys(0, 0);
                hasher.write(bytes);
                hasher.finish()
            }
            HashAlgo::Xx => xxh64(bytes, 0),
        }
    }

    /// Hash of the first `depth` bytes of `bytes`. The caller guarantees
    /// `depth <= bytes.len()`; probing past the end of a string is handled
    /// upstream (EOS candidates).
    pub fn hash_prefix(self, bytes: &[u8], depth: usize) -> u64 {
        self.hash_bytes(&bytes[..depth])
    }

    /// Folds the hash of `block` into `prior`. With `prior == 0` this is the
    /// plain block hash, so chaining blocks `[0..d), [d..2d), …` yields a
    /// consistent prefix hash as long as every string follows the same depth
    /// schedule.
    pub fn hash_block(self, block: &[u8], prior: u64) -> u64 {
        prior ^ self.hash_bytes(block)
    }
}
