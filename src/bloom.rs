//! Probabilistic membership test used by [`crate::sstable::SSTable`] to short-circuit
//! point lookups for keys that are definitely not present.
//!
//! The filter is sized from an expected element count `n` and a target false-positive
//! rate `p` at construction time and never resized afterwards: `m = ceil(-n * ln(p) /
//! ln(2)^2)` bits, `k = ceil((m / n) * ln(2))` hash functions. Membership probes use
//! double hashing: the `i`-th probe bit is `(h1 + i * h2) mod m`, where `h1` and `h2`
//! come from two independent hash passes over the key bytes (SipHash via
//! [`std::collections::hash_map::DefaultHasher`] for `h1`, FNV-1a for `h2`). Using two
//! unrelated constructions keeps the probe sequence free of the correlation a single
//! seeded hash would introduce.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

/// Domain-separation constant mixed into `h1` so that a bloom filter built over the
/// same keys as some unrelated hash table does not happen to reuse its bit pattern.
const H1_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// FNV-1a constants (64-bit).
const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Outcome of a membership probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// The key is guaranteed not to be in the underlying set.
    DefinitelyAbsent,
    /// The key may be in the underlying set; a follow-up exact check is required.
    PossiblyPresent,
}

impl Membership {
    pub fn is_definitely_absent(self) -> bool {
        matches!(self, Membership::DefinitelyAbsent)
    }

    pub fn is_possibly_present(self) -> bool {
        matches!(self, Membership::PossiblyPresent)
    }
}

/// Snapshot of a filter's effectiveness, useful for `STATS` reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomStats {
    pub bits: usize,
    pub hash_functions: usize,
    pub inserted: usize,
    pub bits_set: usize,
    pub fill_ratio: f64,
    /// Theoretical false-positive rate given the current fill: `(1 - e^(-kn/m))^k`.
    pub theoretical_fpr: f64,
}

/// A fixed-size bloom filter over byte-hashable keys.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<bool>,
    num_hashes: usize,
    inserted: usize,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_elements` entries at `target_fpr` false
    /// positives. `expected_elements` is bumped to 1 if zero is passed, since a
    /// zero-sized filter has no valid bit count.
    pub fn new(expected_elements: usize, target_fpr: f64) -> Self {
        let n = expected_elements.max(1);
        debug_assert!(
            target_fpr > 0.0 && target_fpr < 1.0,
            "target false-positive rate must be in (0, 1)"
        );

        let m = Self::calculate_num_bits(n, target_fpr);
        let k = Self::calculate_num_hashes(m, n);

        tracing::trace!(n, m, k, target_fpr, "bloom filter sized");

        BloomFilter {
            bits: vec![false; m],
            num_hashes: k.max(1),
            inserted: 0,
        }
    }

    fn calculate_num_bits(n: usize, fpr: f64) -> usize {
        let m = (-(n as f64) * fpr.ln() / (std::f64::consts::LN_2.powi(2))).ceil();
        (m as usize).max(8)
    }

    fn calculate_num_hashes(m: usize, n: usize) -> usize {
        let k = ((m as f64 / n as f64) * std::f64::consts::LN_2).ceil();
        (k as usize).max(1)
    }

    /// Marks `key` as present. Idempotent.
    pub fn add<T: Hash + ?Sized>(&mut self, key: &T) {
        let (h1, h2) = self.hash_pair(key);
        let m = self.bits.len() as u64;
        for i in 0..self.num_hashes as u64 {
            let idx = h1.wrapping_add(i.wrapping_mul(h2)) % m;
            self.bits[idx as usize] = true;
        }
        self.inserted += 1;
    }

    /// Probes for `key`. Never false-negative for a key that was previously `add`ed to
    /// this exact filter instance.
    pub fn contains<T: Hash + ?Sized>(&self, key: &T) -> Membership {
        let (h1, h2) = self.hash_pair(key);
        let m = self.bits.len() as u64;
        for i in 0..self.num_hashes as u64 {
            let idx = h1.wrapping_add(i.wrapping_mul(h2)) % m;
            if !self.bits[idx as usize] {
                return Membership::DefinitelyAbsent;
            }
        }
        Membership::PossiblyPresent
    }

    fn hash_pair<T: Hash + ?Sized>(&self, key: &T) -> (u64, u64) {
        let mut sip = DefaultHasher::new();
        H1_SEED.hash(&mut sip);
        key.hash(&mut sip);
        let h1 = sip.finish();

        let h2 = fnv1a_hash(key);

        (h1, h2)
    }

    pub fn len_bits(&self) -> usize {
        self.bits.len()
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    pub fn stats(&self) -> BloomStats {
        let bits_set = self.bits.iter().filter(|b| **b).count();
        let m = self.bits.len() as f64;
        let fill_ratio = bits_set as f64 / m;
        let k = self.num_hashes as f64;
        let n = self.inserted.max(1) as f64;
        let theoretical_fpr = (1.0 - (-k * n / m).exp()).powf(k);

        BloomStats {
            bits: self.bits.len(),
            hash_functions: self.num_hashes,
            inserted: self.inserted,
            bits_set,
            fill_ratio,
            theoretical_fpr,
        }
    }
}

/// FNV-1a over the byte representation `Hash` feeds into a throwaway hasher. FNV is a
/// distinct family from SipHash, giving the double-hashing scheme two statistically
/// independent probe streams.
fn fnv1a_hash<T: Hash + ?Sized>(key: &T) -> u64 {
    struct FnvHasher(u64);

    impl Hasher for FnvHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut hash = self.0;
            for byte in bytes {
                hash ^= *byte as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            self.0 = hash;
        }
    }

    let mut hasher = FnvHasher(FNV_OFFSET_BASIS);
    key.hash(&mut hasher);
    hasher.finish()
}
