//! xorshift64* random number generator
//!
//! Fast, high-quality PRNG that is deterministic and suitable for
//! simulation purposes.
//!
//! # Determinism
//!
//! Same seed → same sequence of random numbers. This is CRITICAL for:
//! - Debugging (reproduce exact simulation)
//! - Testing (verify behavior)
//! - Research (validate results)
//!
//! A single `RngManager` drives every random choice in a run: the interbank
//! graph, initial balance sheets, the exchange's volatility noise, shock
//! targeting, and all bank-level counterparty picks.

use serde::{Deserialize, Serialize};

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use interbank_network_core_rs::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let value = rng.next();
/// let liquidity = rng.uniform(50.0, 150.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (64-bit)
    state: u64,
    /// Spare Gaussian draw from the last Box-Muller pair
    cached_normal: Option<f64>,
}

impl RngManager {
    /// Create a new RNG with given seed
    ///
    /// A zero seed is mapped to 1 (xorshift requirement).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 1 } else { seed };
        Self {
            state,
            cached_normal: None,
        }
    }

    /// Generate next random u64 value
    pub fn next(&mut self) -> u64 {
        // xorshift64* algorithm
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Generate random value in range [min, max)
    ///
    /// # Panics
    /// Panics if min >= max
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");

        let value = self.next();
        let range_size = (max - min) as u64;
        min + (value % range_size) as i64
    }

    /// Generate random f64 in range [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        let value = self.next();
        // Convert to [0.0, 1.0) using the top 53 bits
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Generate random f64 in range [lo, hi)
    ///
    /// # Panics
    /// Panics if lo > hi
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        assert!(lo <= hi, "lo must not exceed hi");
        lo + (hi - lo) * self.next_f64()
    }

    /// Draw from a normal distribution with the given mean and standard
    /// deviation (Box-Muller transform; the spare draw is cached).
    pub fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        let z = match self.cached_normal.take() {
            Some(z) => z,
            None => {
                // u1 must be strictly positive for the log
                let mut u1 = self.next_f64();
                while u1 <= f64::EPSILON {
                    u1 = self.next_f64();
                }
                let u2 = self.next_f64();
                let r = (-2.0 * u1.ln()).sqrt();
                let theta = 2.0 * std::f64::consts::PI * u2;
                self.cached_normal = Some(r * theta.sin());
                r * theta.cos()
            }
        };
        mean + std_dev * z
    }

    /// Bernoulli draw: true with probability `p`
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick an index in [0, len)
    ///
    /// # Panics
    /// Panics if len == 0
    pub fn choice(&mut self, len: usize) -> usize {
        assert!(len > 0, "cannot choose from an empty collection");
        (self.next() % len as u64) as usize
    }

    /// Get current RNG state (for checkpointing/replay)
    pub fn get_state(&self) -> u64 {
        self.state
    }
}
