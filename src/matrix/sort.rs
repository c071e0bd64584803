//! Stable counting sort and the two-pass radix sort built from it
//!
//! Sorting triples by a global index in `0..n` with a general comparison sort
//! costs O(nz log nz). Keying a counting sort first on `i mod radix` and then
//! on `i div radix` gives a complete stable sort in O(nz + sqrt(n)) time and
//! memory when `radix * radix >= n`.

use crate::utils::{ceil_div, exclusive_scan};

/// How an index is mapped to a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Bucket is `i / radix`
    Div,
    /// Bucket is `i % radix`
    Mod,
}

impl KeyMode {
    /// Bucket of index `i`
    #[inline]
    pub fn key(self, i: usize, radix: usize) -> usize {
        key(i, radix, self)
    }

    /// Number of buckets needed for indices in `0..n`
    pub fn bucket_count(self, n: usize, radix: usize) -> usize {
        match self {
            KeyMode::Div => ceil_div(n, radix),
            KeyMode::Mod => radix,
        }
    }
}

/// Bucket of index `i` for the given radix and mode; `radix >= 1`
#[inline]
pub fn key(i: usize, radix: usize, mode: KeyMode) -> usize {
    match mode {
        KeyMode::Div => i / radix,
        KeyMode::Mod => i % radix,
    }
}

/// Smallest power of two whose square is at least `n`
///
/// Division and remainder by a power of two are cheap, and a radix near
/// `sqrt(n)` minimises the bucket arrays of both passes. The search stops if
/// squaring would overflow, since the square then exceeds any `n`.
pub fn choose_radix(n: usize) -> usize {
    let mut radix: usize = 1;
    while radix.checked_mul(radix).map_or(false, |sq| sq < n) {
        radix *= 2;
    }
    radix
}

/// Stable counting sort of parallel arrays by the bucket of `keys`
///
/// Records are reordered so that their bucket is non-decreasing; records in
/// the same bucket keep their input order.
///
/// # Arguments
///
/// * `n` - Global dimension; every key must be `< n`
/// * `keys` - Indices that determine the order
/// * `other` - Indices carried along
/// * `values` - Values carried along
/// * `radix` - Radix, at least 1
/// * `mode` - Whether to key on quotient or remainder
///
/// # Panics
///
/// Panics if `radix == 0` or the arrays differ in length.
pub fn stable_bucket_sort<T: Copy>(
    n: usize,
    keys: &mut [usize],
    other: &mut [usize],
    values: &mut [T],
    radix: usize,
    mode: KeyMode,
) {
    assert!(radix >= 1, "radix must be at least 1");
    assert_eq!(keys.len(), other.len(), "keys.len() must equal other.len()");
    assert_eq!(keys.len(), values.len(), "keys.len() must equal values.len()");

    let nz = keys.len();
    if nz == 0 {
        return;
    }

    // Count the elements in each bucket
    let n_buckets = mode.bucket_count(n, radix);
    let mut lengths = vec![0usize; n_buckets];
    for &k in keys.iter() {
        lengths[mode.key(k, radix)] += 1;
    }

    // Starting positions; the trailing total is not needed
    let mut starts = exclusive_scan(&lengths);
    starts.pop();

    // Scatter into the buckets of temporary arrays
    let mut keys1 = vec![0usize; nz];
    let mut other1 = vec![0usize; nz];
    let mut values1 = Vec::with_capacity(nz);
    values1.extend_from_slice(values);

    for k in 0..nz {
        let r = mode.key(keys[k], radix);
        let newk = starts[r];
        keys1[newk] = keys[k];
        other1[newk] = other[k];
        values1[newk] = values[k];
        starts[r] += 1;
    }

    keys.copy_from_slice(&keys1);
    other.copy_from_slice(&other1);
    values.copy_from_slice(&values1);
}

/// Complete stable sort by `keys` using a remainder pass then a quotient pass
///
/// Requires `radix * radix >= n` for the result to be fully ordered.
pub fn radix_sort<T: Copy>(
    n: usize,
    keys: &mut [usize],
    other: &mut [usize],
    values: &mut [T],
    radix: usize,
) {
    stable_bucket_sort(n, keys, other, values, radix, KeyMode::Mod);
    stable_bucket_sort(n, keys, other, values, radix, KeyMode::Div);
}
