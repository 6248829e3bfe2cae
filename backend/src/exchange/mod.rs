//! Exchange
//!
//! Publishes a volatility and price-change signal each tick, and prices
//! executed sales with persistent multi-tick market impact.
//!
//! # Pricing
//!
//! For a sale of `q` units of asset `a` at tick `t` with prevailing
//! volatility `v` and market depth `D`:
//!
//! 1. Base discount `min(0.45, 0.10 + 0.4v)` for fire sales, else
//!    `min(0.20, 0.05 + 0.3v)`; base price = 1 − discount.
//! 2. Read cumulative volume `C` for (t, a).
//! 3. Read recent pressure `R` over the 3-tick lookback t−2..=t.
//! 4. Instantaneous impact `k_i · √((C + q)/D)`, persistent impact
//!    `k_p · √(R/(3D))`; fire sales use (0.15, 0.05), standard (0.08, 0.02).
//! 5. Total impact capped at 0.50; unit price floored at 0.05.
//! 6. Atomically add `q` to the (t, a) volume, causally after the read, so
//!    a second sale in the same tick observes the first.

use log::debug;

use crate::fabric::{FabricError, StateFabric};
use crate::models::intent::{Intent, Payload, UpdateMarketDataPayload};
use crate::models::market::MarketSnapshot;
use crate::rng::RngManager;

/// Agent id the exchange publishes under.
pub const EXCHANGE_ID: &str = "exchange_main";

const VOL_NOISE_STD: f64 = 0.02;
const VOL_MIN: f64 = 0.05;
const VOL_MAX: f64 = 0.80;
const VOL_SHOCK: f64 = 0.25;
const VOL_MEAN_REVERSION: f64 = 0.3;

const SIGNAL_MEAN: f64 = -0.01;
const SIGNAL_STD: f64 = 0.03;
const SIGNAL_CLAMP: f64 = 0.15;

const FIRE_SALE_IMPACT: (f64, f64) = (0.15, 0.05);
const STANDARD_IMPACT: (f64, f64) = (0.08, 0.02);
const IMPACT_CAP: f64 = 0.50;
const PRICE_FLOOR: f64 = 0.05;

/// The exchange's own state: the volatility process.
#[derive(Debug, Clone)]
pub struct Exchange {
    base_volatility: f64,
    current_volatility: f64,
    vol_shock_step: Option<u64>,
}

impl Exchange {
    pub fn new(base_volatility: f64, vol_shock_step: Option<u64>) -> Self {
        Self {
            base_volatility,
            current_volatility: base_volatility.clamp(VOL_MIN, VOL_MAX),
            vol_shock_step,
        }
    }

    /// Current volatility level.
    pub fn volatility(&self) -> f64 {
        self.current_volatility
    }

    /// Advance the volatility process one tick and publish market data:
    /// a public `update_market_data` intent plus the `market:latest` mirror.
    pub fn step(
        &mut self,
        tick: u64,
        rng: &mut RngManager,
        fabric: &mut StateFabric,
    ) -> Result<MarketSnapshot, FabricError> {
        let noise = rng.normal(0.0, VOL_NOISE_STD);
        let mut vol = self.current_volatility
            + VOL_MEAN_REVERSION * (self.base_volatility - self.current_volatility)
            + noise;
        if self.vol_shock_step == Some(tick) {
            vol += VOL_SHOCK;
        }
        self.current_volatility = vol.clamp(VOL_MIN, VOL_MAX);

        let signal = rng
            .normal(SIGNAL_MEAN, SIGNAL_STD)
            .clamp(-SIGNAL_CLAMP, SIGNAL_CLAMP);

        let snapshot = MarketSnapshot {
            new_volatility: self.current_volatility,
            price_change_signal: signal,
        };

        let intent = Intent::new(
            tick,
            EXCHANGE_ID,
            Payload::UpdateMarketData(UpdateMarketDataPayload {
                new_volatility: snapshot.new_volatility,
                price_change_signal: snapshot.price_change_signal,
            }),
        );
        fabric.publish_intent(&intent)?;
        fabric.publish_market_data(&snapshot)?;

        debug!(
            "exchange tick {}: volatility {:.4}, signal {:.4}",
            tick, snapshot.new_volatility, snapshot.price_change_signal
        );
        Ok(snapshot)
    }
}

/// Outcome of one priced sale.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleExecution {
    /// Effective unit price after impact
    pub unit_price: f64,
    /// Pre-impact price implied by the discount curve
    pub base_price: f64,
    /// Combined instantaneous + persistent impact applied
    pub total_impact: f64,
    /// Cumulative same-tick volume observed before this sale
    pub cumulative_before: f64,
    /// `quantity · unit_price`
    pub proceeds: f64,
}

/// Price and record a sale.
///
/// The volume increment happens causally after the cumulative-volume read,
/// so sales within a tick are strictly serialized.
pub fn execute_sale(
    fabric: &mut StateFabric,
    tick: u64,
    asset: &str,
    quantity: f64,
    fire_sale: bool,
    volatility: f64,
    depth: f64,
) -> Result<SaleExecution, FabricError> {
    let base_discount = if fire_sale {
        (0.10 + 0.4 * volatility).min(0.45)
    } else {
        (0.05 + 0.3 * volatility).min(0.20)
    };
    let base_price = 1.0 - base_discount;

    let cumulative_before = fabric.cumulative_sales(tick, asset)?;
    if quantity <= 0.0 {
        return Ok(SaleExecution {
            unit_price: base_price,
            base_price,
            total_impact: 0.0,
            cumulative_before,
            proceeds: 0.0,
        });
    }

    let pressure = fabric.recent_sale_pressure(tick, asset)?;
    let depth = depth.max(1.0);
    let (k_i, k_p) = if fire_sale {
        FIRE_SALE_IMPACT
    } else {
        STANDARD_IMPACT
    };
    let instantaneous = k_i * ((cumulative_before + quantity) / depth).sqrt();
    let persistent = k_p * (pressure / (3.0 * depth)).sqrt();
    let total_impact = (instantaneous + persistent).min(IMPACT_CAP);
    let unit_price = (base_price * (1.0 - total_impact)).max(PRICE_FLOOR);

    fabric.record_sale(tick, asset, quantity)?;

    debug!(
        "sale tick {} {} x{:.2} (fire={}): base {:.4}, impact {:.4}, unit {:.4}",
        tick, asset, quantity, fire_sale, base_price, total_impact, unit_price
    );

    Ok(SaleExecution {
        unit_price,
        base_price,
        total_impact,
        cumulative_before,
        proceeds: quantity * unit_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_discount_curve() {
        let mut fabric = StateFabric::in_memory();
        let sale = execute_sale(&mut fabric, 1, "liquid_bond", 10.0, false, 0.2, 100.0).unwrap();
        // discount = 0.05 + 0.3 * 0.2 = 0.11
        assert!((sale.base_price - 0.89).abs() < 1e-12);
        // impact = 0.08 * sqrt(10 / 100)
        let expected_impact = 0.08 * (10.0f64 / 100.0).sqrt();
        assert!((sale.total_impact - expected_impact).abs() < 1e-12);
        assert!((sale.unit_price - 0.89 * (1.0 - expected_impact)).abs() < 1e-12);
    }

    #[test]
    fn test_fire_sale_discount_is_steeper() {
        let mut fabric = StateFabric::in_memory();
        let standard = execute_sale(&mut fabric, 1, "a", 10.0, false, 0.5, 100.0).unwrap();
        let fire = execute_sale(&mut fabric, 2, "a", 10.0, true, 0.5, 100.0).unwrap();
        // standard: min(0.20, 0.05 + 0.15) = 0.20; fire: min(0.45, 0.10 + 0.20) = 0.30
        assert!((standard.base_price - 0.80).abs() < 1e-12);
        assert!((fire.base_price - 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_same_tick_sales_are_serialized() {
        let mut fabric = StateFabric::in_memory();
        let first = execute_sale(&mut fabric, 5, "x", 8.0, true, 0.3, 50.0).unwrap();
        let second = execute_sale(&mut fabric, 5, "x", 8.0, true, 0.3, 50.0).unwrap();

        assert_eq!(first.cumulative_before, 0.0);
        assert!((second.cumulative_before - 8.0).abs() < 1e-12);
        assert!(second.cumulative_before > first.cumulative_before);
        // deeper into the book, the second sale prices worse
        assert!(second.unit_price < first.unit_price);
    }

    #[test]
    fn test_persistent_pressure_from_prior_ticks() {
        let mut fabric = StateFabric::in_memory();
        execute_sale(&mut fabric, 3, "x", 20.0, true, 0.3, 50.0).unwrap();
        execute_sale(&mut fabric, 4, "x", 20.0, true, 0.3, 50.0).unwrap();

        let calm = execute_sale(&mut fabric, 40, "x", 5.0, true, 0.3, 50.0).unwrap();
        let pressured = execute_sale(&mut fabric, 5, "x", 5.0, true, 0.3, 50.0).unwrap();
        assert!(pressured.unit_price < calm.unit_price);
    }

    #[test]
    fn test_impact_is_capped_and_price_floored() {
        let mut fabric = StateFabric::in_memory();
        let sale = execute_sale(&mut fabric, 1, "x", 1e7, true, 0.8, 50.0).unwrap();
        assert!((sale.total_impact - IMPACT_CAP).abs() < 1e-12);
        assert!(sale.unit_price >= PRICE_FLOOR);
        // capped impact on a 0.55 base gives half price, well below 0.5 base
        assert!(sale.unit_price < 0.5 * sale.base_price + 1e-12);
    }

    #[test]
    fn test_zero_quantity_records_nothing() {
        let mut fabric = StateFabric::in_memory();
        let sale = execute_sale(&mut fabric, 1, "x", 0.0, false, 0.2, 100.0).unwrap();
        assert_eq!(sale.proceeds, 0.0);
        assert_eq!(fabric.cumulative_sales(1, "x").unwrap(), 0.0);
    }

    #[test]
    fn test_volatility_stays_clamped() {
        let mut rng = RngManager::new(11);
        let mut fabric = StateFabric::in_memory();
        let mut exchange = Exchange::new(0.9, None);
        for tick in 1..=50 {
            let snap = exchange.step(tick, &mut rng, &mut fabric).unwrap();
            assert!(snap.new_volatility >= VOL_MIN && snap.new_volatility <= VOL_MAX);
            assert!(snap.price_change_signal.abs() <= SIGNAL_CLAMP);
        }
    }

    #[test]
    fn test_volatility_shock_applies_at_configured_tick() {
        let mut fabric = StateFabric::in_memory();

        // mid-range base keeps both paths away from the clamps
        let mut calm = Exchange::new(0.3, None);
        let mut shocked = Exchange::new(0.3, Some(5));
        let mut rng_calm = RngManager::new(7);
        let mut rng_shocked = RngManager::new(7);

        for tick in 1..=5 {
            let a = calm.step(tick, &mut rng_calm, &mut fabric).unwrap();
            let b = shocked.step(tick, &mut rng_shocked, &mut fabric).unwrap();
            if tick < 5 {
                assert!((a.new_volatility - b.new_volatility).abs() < 1e-12);
            } else {
                assert!((b.new_volatility - (a.new_volatility + VOL_SHOCK)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_step_publishes_market_data() {
        let mut rng = RngManager::new(3);
        let mut fabric = StateFabric::in_memory();
        let mut exchange = Exchange::new(0.12, None);

        let snap = exchange.step(1, &mut rng, &mut fabric).unwrap();

        let mirrored = fabric.get_market_data().unwrap();
        assert_eq!(mirrored, snap);

        let broadcast = fabric.public_stream(1).unwrap();
        assert_eq!(broadcast.len(), 1);
        assert_eq!(broadcast[0].agent_id, EXCHANGE_ID);
    }
}
