//! Probabilistic admission.

use std::fmt::Debug;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides whether a non-forced call proceeds, given a sampling rate.
///
/// A draw `u` in `[0, 1)` admits iff `u <= rate`, so `rate >= 1.0` always
/// admits and `rate < 0.0` never does.
pub trait Sampler: Send + Sync + Debug {
    fn draw(&self) -> f64;

    fn admit(&self, rate: f64) -> bool {
        if rate >= 1.0 {
            return true;
        }
        self.draw() <= rate
    }
}

/// Thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn draw(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler {
    draw: f64,
}

impl FixedSampler {
    pub fn new(draw: f64) -> Self {
        Self { draw }
    }

    /// Admits every rate above zero.
    pub fn always() -> Self {
        Self::new(0.0)
    }

    /// Rejects every rate below one.
    pub fn never() -> Self {
        Self::new(f64::MAX)
    }
}

impl Sampler for FixedSampler {
    fn draw(&self) -> f64 {
        self.draw
    }
}

/// Reproducible draws from a seeded RNG.
#[derive(Debug)]
pub struct SeededSampler {
    rng: Mutex<StdRng>,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Sampler for SeededSampler {
    fn draw(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_rate_always_admits() {
        assert!(FixedSampler::never().admit(1.0));
        assert!(RandomSampler.admit(1.0));
    }

    #[test]
    fn test_comparison_is_inclusive() {
        let sampler = FixedSampler::new(0.5);
        assert!(sampler.admit(0.5));
        assert!(!sampler.admit(0.49));
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let a = SeededSampler::new(7);
        let b = SeededSampler::new(7);
        let draws_a: Vec<f64> = (0..5).map(|_| a.draw()).collect();
        let draws_b: Vec<f64> = (0..5).map(|_| b.draw()).collect();
        assert_eq!(draws_a, draws_b);
        assert!(draws_a.iter().all(|d| (0.0..1.0).contains(d)));
    }

    #[test]
    fn test_random_rate_roughly_matches_admission_share() {
        let sampler = SeededSampler::new(42);
        let admitted = (0..10_000).filter(|_| sampler.admit(0.8)).count();
        assert!((7_600..8_400).contains(&admitted), "admitted {admitted}");
    }
}
