//! Injectable randomness for user-agent rotation, pause jitter and the
//! review shuffle.
//!
//! Sources only hand out raw 64-bit words. All sampling goes through `rand`
//! via [`SourceRng`], so scripted sources in tests see the same algorithms
//! as production.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Shared source of random words.
pub trait RandomSource: Send + Sync {
    fn next_u64(&self) -> u64;
}

/// Production source: an entropy-seeded `StdRng`.
pub struct ThreadRandom {
    rng: Mutex<StdRng>,
}

impl ThreadRandom {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic source, for reproducible shuffles.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for ThreadRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for ThreadRandom {
    fn next_u64(&self) -> u64 {
        self.rng.lock().unwrap_or_else(|p| p.into_inner()).next_u64()
    }
}

/// Borrowed `RngCore` view over a shared [`RandomSource`].
///
/// `next_u32` takes the high half of a word, so a source's words read as
/// fractions of the full range at both widths.
pub struct SourceRng<'a>(&'a dyn RandomSource);

impl<'a> SourceRng<'a> {
    pub fn new(source: &'a dyn RandomSource) -> Self {
        Self(source)
    }
}

impl RngCore for SourceRng<'_> {
    fn next_u32(&mut self) -> u32 {
        (self.0.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let word = self.0.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Pick one element uniformly.
pub fn choose<'a, T>(rng: &dyn RandomSource, items: &'a [T]) -> Option<&'a T> {
    items.choose(&mut SourceRng::new(rng))
}

/// A duration uniformly drawn from `[min, max]` at millisecond resolution.
pub fn jitter(rng: &dyn RandomSource, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    Duration::from_millis(SourceRng::new(rng).gen_range(lo..=hi))
}
