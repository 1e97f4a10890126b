//! Counting Bloom filter over salted keys.
//!
//! Salted keys are already uniformly distributed SHA-256 digests, so bucket
//! indices come straight from double hashing over two words of the digest.
//!
//! Sizing for capacity `n` and false-positive rate `fp`:
//!
//! - Buckets: `m = -n × ln(fp) / (ln2)²`
//! - Hash functions: `k = (m / n) × ln2`

use crate::keys::SaltedKey;

/// Bloom filter with 8-bit counters so wanted keys can be removed again.
///
/// A counter that saturates at 255 is never decremented afterwards; it may
/// then over-report membership but can never cause a false negative.
#[derive(Clone)]
pub struct CountingBloomFilter {
    counters: Vec<u8>,
    num_hashes: u32,
    count: usize,
}

impl CountingBloomFilter {
    /// Size a filter for `capacity` keys at the given false-positive rate.
    ///
    /// Out-of-range arguments are clamped: capacity to at least 1 and the
    /// rate into `[0.0001, 0.5]`.
    pub fn with_capacity(capacity: usize, fp_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let fp_rate = if fp_rate.is_finite() { fp_rate.clamp(0.0001, 0.5) } else { 0.01 };
        let num_buckets = optimal_num_buckets(capacity, fp_rate);
        let num_hashes = optimal_num_hashes(num_buckets, capacity);
        Self {
            counters: vec![0u8; num_buckets],
            num_hashes,
            count: 0,
        }
    }

    fn indices(&self, key: &SaltedKey) -> impl Iterator<Item = usize> {
        let (h1, h2) = key.hash_pair();
        let m = self.counters.len() as u64;
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    pub fn insert(&mut self, key: &SaltedKey) {
        let indices: Vec<usize> = self.indices(key).collect();
        for idx in indices {
            self.counters[idx] = self.counters[idx].saturating_add(1);
        }
        self.count += 1;
    }

    /// Remove a key previously inserted. Removing a key that was never
    /// inserted corrupts the filter, so callers must track membership.
    pub fn remove(&mut self, key: &SaltedKey) {
        let indices: Vec<usize> = self.indices(key).collect();
        for idx in indices {
            let c = self.counters[idx];
            if c != 0 && c != u8::MAX {
                self.counters[idx] = c - 1;
            }
        }
        self.count = self.count.saturating_sub(1);
    }

    pub fn contains(&self, key: &SaltedKey) -> bool {
        self.indices(key).all(|idx| self.counters[idx] > 0)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn num_buckets(&self) -> usize {
        self.counters.len()
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn clear(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
        self.count = 0;
    }
}

impl std::fmt::Debug for CountingBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingBloomFilter")
            .field("num_buckets", &self.counters.len())
            .field("num_hashes", &self.num_hashes)
            .field("count", &self.count)
            .finish()
    }
}

fn optimal_num_buckets(capacity: usize, fp_rate: f64) -> usize {
    let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
    let m = -(capacity as f64 * fp_rate.ln()) / ln2_sq;
    (m.ceil() as usize).max(8)
}

fn optimal_num_hashes(num_buckets: usize, capacity: usize) -> u32 {
    let k = (num_buckets as f64 / capacity as f64) * std::f64::consts::LN_2;
    (k.round() as u32).clamp(1, 16)
}
