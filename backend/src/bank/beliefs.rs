//! Belief update phase
//!
//! Conjugate updates on the four private channels, driven entirely by
//! fabric observations (snapshots and the previous tick's public stream).

use crate::bank::Observations;
use crate::models::bank::Bank;

/// Precision of the per-tick stressed-fraction observation.
const STRESS_PRECISION: f64 = 2.0;
/// Precision of the public-sell-volume stress observation.
const SELL_VOLUME_PRECISION: f64 = 1.5;
/// Precision of a margin observation backed by pending calls.
const MARGIN_DUE_PRECISION: f64 = 3.0;
/// Precision of the exposure-based margin estimate.
const MARGIN_ESTIMATE_PRECISION: f64 = 1.0;
/// Precision of the published-volatility observation.
const VOLATILITY_PRECISION: f64 = 2.0;
/// Precision of the fire-sale volatility bump.
const FIRE_SALE_PRECISION: f64 = 1.5;

/// Phase 2: update all four channels from this tick's observations.
pub fn update(bank: &mut Bank, obs: &Observations) {
    update_neighbor_beliefs(bank, obs);
    update_stress_belief(bank, obs);
    update_margin_belief(bank, obs);
    update_volatility_belief(bank, obs);
}

/// Beta-Bernoulli per neighbour: map the observable snapshot to a distress
/// signal in [0, 1], strongest condition first.
fn update_neighbor_beliefs(bank: &mut Bank, obs: &Observations) {
    let neighbors: Vec<usize> = bank.beliefs.neighbor_default.keys().copied().collect();
    for neighbor in neighbors {
        let Some(view) = obs.snapshot.banks.get(&neighbor) else {
            continue;
        };
        let signal = if view.defaulted {
            1.0
        } else if view.stressed {
            0.7
        } else if view.missed_payment {
            0.5
        } else if view.liquidity < 40.0 {
            0.2
        } else {
            0.0
        };
        if let Some(belief) = bank.beliefs.neighbor_default.get_mut(&neighbor) {
            belief.observe(signal);
        }
    }

    if obs.observed_defaults > 0 {
        let nudge = (0.15 * obs.observed_defaults as f64).min(0.3);
        for belief in bank.beliefs.neighbor_default.values_mut() {
            belief.nudge(nudge);
        }
    }
}

/// Normal-Normal network liquidity stress.
fn update_stress_belief(bank: &mut Bank, obs: &Observations) {
    let active = obs.snapshot.n_banks.saturating_sub(obs.snapshot.n_defaulted);
    let stressed_fraction = obs.snapshot.n_stressed as f64 / active.max(1) as f64;
    bank.beliefs
        .liquidity_stress
        .observe(stressed_fraction, STRESS_PRECISION);

    if obs.observed_sell_volume > 0.0 {
        let pressure = (obs.observed_sell_volume / obs.depth.max(1.0)).min(1.0);
        bank.beliefs
            .liquidity_stress
            .observe(pressure, SELL_VOLUME_PRECISION);
    }
}

/// Normal-Normal expected margin call magnitude.
fn update_margin_belief(bank: &mut Bank, obs: &Observations) {
    let pending_due = bank.total_margin_due();
    if pending_due > 0.0 {
        bank.beliefs
            .margin_call
            .observe(pending_due, MARGIN_DUE_PRECISION);
    } else {
        let estimate = bank.total_exposure() * obs.snapshot.margin_rate;
        bank.beliefs
            .margin_call
            .observe(estimate, MARGIN_ESTIMATE_PRECISION);
    }
}

/// Normal-Normal market volatility.
fn update_volatility_belief(bank: &mut Bank, obs: &Observations) {
    bank.beliefs
        .volatility
        .observe(obs.market.new_volatility, VOLATILITY_PRECISION);

    if obs.observed_fire_sales > 0 {
        let bumped = obs.market.new_volatility
            + (0.05 * obs.observed_fire_sales as f64).min(0.30);
        bank.beliefs.volatility.observe(bumped, FIRE_SALE_PRECISION);
    }
}
