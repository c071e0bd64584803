//! Flat word encoding of message contents
//!
//! Backends that only move plain buffers, such as MPI, carry every message
//! as `u64` words. Each [`Payload`] type occupies a fixed number of words, so
//! a buffer of `k * WORDS` words always holds exactly `k` values.

use crate::error::{Result, SetupError};

/// A value that can travel between processes
pub trait Payload: Send + 'static {
    /// Number of words per value, at least 1
    const WORDS: usize;

    /// Appends the words of `self` to `out`
    fn encode(&self, out: &mut Vec<u64>);

    /// Rebuilds a value from exactly `WORDS` words
    fn decode(words: &[u64]) -> Self;
}

macro_rules! unsigned_payload {
    ($($t:ty),*) => {
        $(
            impl Payload for $t {
                const WORDS: usize = 1;

                #[inline]
                fn encode(&self, out: &mut Vec<u64>) {
                    out.push(*self as u64);
                }

                #[inline]
                fn decode(words: &[u64]) -> Self {
                    words[0] as $t
                }
            }
        )*
    };
}

unsigned_payload!(u8, u32, u64, usize);

impl Payload for f64 {
    const WORDS: usize = 1;

    #[inline]
    fn encode(&self, out: &mut Vec<u64>) {
        out.push(self.to_bits());
    }

    #[inline]
    fn decode(words: &[u64]) -> Self {
        f64::from_bits(words[0])
    }
}

impl<A: Payload, B: Payload> Payload for (A, B) {
    const WORDS: usize = A::WORDS + B::WORDS;

    fn encode(&self, out: &mut Vec<u64>) {
        self.0.encode(out);
        self.1.encode(out);
    }

    fn decode(words: &[u64]) -> Self {
        let (a, b) = words.split_at(A::WORDS);
        (A::decode(a), B::decode(b))
    }
}

impl<A: Payload, B: Payload, C: Payload> Payload for (A, B, C) {
    const WORDS: usize = A::WORDS + B::WORDS + C::WORDS;

    fn encode(&self, out: &mut Vec<u64>) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
    }

    fn decode(words: &[u64]) -> Self {
        let (a, rest) = words.split_at(A::WORDS);
        let (b, c) = rest.split_at(B::WORDS);
        (A::decode(a), B::decode(b), C::decode(c))
    }
}

/// Encodes a buffer of values
pub fn encode_all<T: Payload>(items: &[T]) -> Vec<u64> {
    let mut words = Vec::with_capacity(items.len() * T::WORDS);
    for item in items {
        item.encode(&mut words);
    }
    words
}

/// Decodes a buffer of values; `None` if the length is not a multiple of `T::WORDS`
pub fn decode_all<T: Payload>(words: &[u64]) -> Option<Vec<T>> {
    if T::WORDS == 0 || words.len() % T::WORDS != 0 {
        return None;
    }
    Some(words.chunks_exact(T::WORDS).map(T::decode).collect())
}

/// Converts per-process word counts to the `i32` counts and displacements MPI expects
pub fn counts_and_displacements(lengths: impl IntoIterator<Item = usize>) -> Result<(Vec<i32>, Vec<i32>)> {
    let mut counts = Vec::new();
    let mut displs = Vec::new();
    let mut offset: i32 = 0;

    for len in lengths {
        let count = i32::try_from(len)
            .map_err(|_| SetupError::InvalidConfig(format!("message of {} words exceeds the MPI count range", len)))?;
        displs.push(offset);
        counts.push(count);
        offset = offset
            .checked_add(count)
            .ok_or_else(|| SetupError::InvalidConfig("exchange exceeds the MPI count range".to_string()))?;
    }

    Ok((counts, displs))
}
