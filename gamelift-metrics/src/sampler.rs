// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission policies deciding whether an observation is recorded at all.
//!
//! Sampling exists to keep observation cost below observation value when the
//! record rate is high. Unsampled observations leave the metric's current
//! value untouched and enqueue nothing.

use std::sync::Mutex;

use rand::{Rng, SeedableRng, rngs::SmallRng};

/// Decides whether a single observation is admitted.
pub trait Sampler: Send + Sync {
    /// Returns true when the observation should be recorded.
    fn should_sample(&self) -> bool;

    /// The admission rate in `[0.0, 1.0]`, carried on every emitted message
    /// so downstream aggregation can upweight sampled data.
    fn sample_rate(&self) -> f64 {
        1.0
    }
}

/// Admits every observation. The default for all builders.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSample;

impl Sampler for AlwaysSample {
    fn should_sample(&self) -> bool {
        true
    }
}

/// Admits nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSample;

impl Sampler for NeverSample {
    fn should_sample(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> f64 {
        0.0
    }
}

/// Admits a fixed fraction of observations at random.
///
/// The rate is clamped to `[0.0, 1.0]` at construction. Rates of exactly 0
/// and 1 short-circuit without touching the generator, so `FractionSampler`
/// at the extremes behaves identically to [`NeverSample`] / [`AlwaysSample`].
pub struct FractionSampler {
    rate: f64,
    rng: Mutex<SmallRng>,
}

impl FractionSampler {
    /// Create a sampler admitting roughly `rate` of observations.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self {
            rate,
            rng: Mutex::new(SmallRng::from_os_rng()),
        }
    }
}

impl Sampler for FractionSampler {
    fn should_sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap();
        rng.random::<f64>() < self.rate
    }

    fn sample_rate(&self) -> f64 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_and_never() {
        assert!(AlwaysSample.should_sample());
        assert_eq!(AlwaysSample.sample_rate(), 1.0);
        assert!(!NeverSample.should_sample());
        assert_eq!(NeverSample.sample_rate(), 0.0);
    }

    #[test]
    fn fraction_extremes_are_deterministic() {
        let all = FractionSampler::new(1.0);
        let none = FractionSampler::new(0.0);
        for _ in 0..100 {
            assert!(all.should_sample());
            assert!(!none.should_sample());
        }
    }

    #[test]
    fn fraction_clamps_out_of_range_rates() {
        assert_eq!(FractionSampler::new(7.5).sample_rate(), 1.0);
        assert_eq!(FractionSampler::new(-1.0).sample_rate(), 0.0);
        assert_eq!(FractionSampler::new(f64::NAN).sample_rate(), 0.0);
    }

    #[test]
    fn fraction_mid_rate_admits_roughly_the_rate() {
        let half = FractionSampler::new(0.5);
        let admitted = (0..10_000).filter(|_| half.should_sample()).count();
        // Loose bounds; a binomial with n=10000, p=0.5 stays inside easily.
        assert!((4_000..6_000).contains(&admitted), "admitted {admitted}");
    }
}
