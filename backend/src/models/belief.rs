//! Conjugate Bayesian belief channels
//!
//! Banks maintain private posteriors updated from observables each tick:
//! a Beta-Bernoulli distribution per neighbour (default probability) and
//! three Normal-Normal channels (liquidity stress, expected margin call,
//! market volatility).

use serde::{Deserialize, Serialize};

/// Beta-Bernoulli belief over a neighbour's default.
///
/// The prior Beta(1, 9) gives a mean default probability of 0.1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaBelief {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaBelief {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// The standard neighbour prior Beta(1, 9).
    pub fn prior() -> Self {
        Self::new(1.0, 9.0)
    }

    /// Conjugate update with a distress signal in [0, 1]:
    /// `alpha += s`, `beta += 1 - s`.
    pub fn observe(&mut self, signal: f64) {
        let s = signal.clamp(0.0, 1.0);
        self.alpha += s;
        self.beta += 1.0 - s;
    }

    /// One-sided shift toward default, used when defaults are observed in
    /// the public stream.
    pub fn nudge(&mut self, delta: f64) {
        self.alpha += delta.max(0.0);
    }

    /// Posterior mean.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

impl Default for BetaBelief {
    fn default() -> Self {
        Self::prior()
    }
}

/// Normal-Normal conjugate belief with known observation precision.
///
/// `tau` is the posterior precision; each observation with precision `p`
/// moves the mean to the precision-weighted average and adds `p` to `tau`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalBelief {
    pub mu: f64,
    pub tau: f64,
}

impl NormalBelief {
    pub fn new(mu: f64, tau: f64) -> Self {
        assert!(tau > 0.0, "prior precision must be positive");
        Self { mu, tau }
    }

    /// Conjugate update with observation `x` at precision `precision`.
    pub fn observe(&mut self, x: f64, precision: f64) {
        let p = precision.max(0.0);
        if p == 0.0 {
            return;
        }
        self.mu = (self.tau * self.mu + p * x) / (self.tau + p);
        self.tau += p;
    }

    /// Posterior mean.
    pub fn mean(&self) -> f64 {
        self.mu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beta_prior_mean() {
        assert!((BetaBelief::prior().mean() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_beta_observe_healthy_lowers_mean() {
        let mut b = BetaBelief::prior();
        b.observe(0.0);
        assert!(b.mean() < 0.1);
        assert_eq!(b.alpha, 1.0);
        assert_eq!(b.beta, 10.0);
    }

    #[test]
    fn test_beta_observe_distress_raises_mean() {
        let mut b = BetaBelief::prior();
        b.observe(1.0);
        assert_eq!(b.alpha, 2.0);
        assert_eq!(b.beta, 9.0);
        assert!(b.mean() > 0.1);
    }

    #[test]
    fn test_beta_partial_signal_splits_mass() {
        let mut b = BetaBelief::prior();
        b.observe(0.7);
        assert!((b.alpha - 1.7).abs() < 1e-12);
        assert!((b.beta - 9.3).abs() < 1e-12);
    }

    #[test]
    fn test_beta_nudge_only_adds_alpha() {
        let mut b = BetaBelief::prior();
        b.nudge(0.3);
        assert!((b.alpha - 1.3).abs() < 1e-12);
        assert_eq!(b.beta, 9.0);
    }

    #[test]
    fn test_normal_update_moves_toward_observation() {
        let mut n = NormalBelief::new(0.2, 1.0);
        n.observe(1.0, 2.0);
        // (1.0*0.2 + 2.0*1.0) / 3.0
        assert!((n.mu - 0.7333333333333333).abs() < 1e-12);
        assert!((n.tau - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_normal_precision_accumulates() {
        let mut n = NormalBelief::new(0.0, 1.0);
        for _ in 0..10 {
            n.observe(0.5, 2.0);
        }
        assert!((n.tau - 21.0).abs() < 1e-12);
        // repeated identical observations converge toward the observation
        assert!((n.mu - 0.5).abs() < 0.03);
    }

    #[test]
    #[should_panic(expected = "prior precision must be positive")]
    fn test_normal_zero_precision_prior_panics() {
        NormalBelief::new(0.0, 0.0);
    }
}
