//! Market data snapshot

use serde::{Deserialize, Serialize};

/// Latest market signal published by the exchange.
///
/// Field names match the `update_market_data` payload so the snapshot can be
/// mirrored verbatim at `market:latest`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub new_volatility: f64,
    pub price_change_signal: f64,
}

impl Default for MarketSnapshot {
    /// The fallback banks assume before the exchange has published anything.
    fn default() -> Self {
        Self {
            new_volatility: 0.2,
            price_change_signal: 0.0,
        }
    }
}
