//! Central counterparty
//!
//! The CCP is a strategic singleton sitting between all banks: it maintains
//! the mutualised default fund, adjusts the margin rate with volatility,
//! issues margin calls, and runs the default waterfall when a member fails.
//!
//! # Information asymmetry
//!
//! The CCP observes the registry directly (total exposure, per-bank risk
//! scores, the default fund are private to it); banks see only the margin
//! rate it publishes to the fabric. Banks' Bayesian beliefs are invisible to
//! the CCP.
//!
//! # Per-tick cycle
//!
//! 1. Observe (private info gathering)
//! 2. Margin rate update (base + volatility · sensitivity, 1.5× in panic,
//!    clamped to [0.02, 0.30])
//! 3. Panic check (total exposure vs. default fund · safe multiplier, with
//!    threshold tightening / relaxation on the edges)
//! 4. Per-bank risk scores
//! 5. Margin calls
//! 6. Publish margin rate
//! 7. Utility

use std::collections::BTreeMap;

use log::{info, warn};
use serde::Serialize;

use crate::fabric::{FabricError, StateFabric};
use crate::models::bank::{bank_id, Bank};
use crate::models::intent::{Intent, IssueMarginCallPayload, Payload};
use crate::orchestrator::SimulationConfig;

/// Agent id the CCP publishes under.
pub const CCP_ID: &str = "ccp_01";

const MARGIN_RATE_MIN: f64 = 0.02;
const MARGIN_RATE_MAX: f64 = 0.30;
const PANIC_SURCHARGE: f64 = 1.5;
/// Margin-call threshold floor when panic tightens it.
const THRESHOLD_FLOOR: f64 = 0.2;

/// One default-waterfall activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbsorptionEvent {
    pub tick: u64,
    pub bank_index: usize,
    /// LGD-weighted loss creditors carried into the waterfall
    pub uncovered: f64,
    /// Portion the default fund absorbed
    pub absorbed: f64,
    /// Residual spread equally across survivors
    pub mutualised: f64,
}

/// Components of the CCP objective for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilityBreakdown {
    /// w1 leg: 1 − I(panic)
    pub stability: f64,
    /// w2 leg: min(1, fund / safe_limit)
    pub fund_ratio: f64,
    /// w3 leg: defaults this tick / banks
    pub default_pressure: f64,
    /// w4 leg: min(1, fire-sale volume / total liquidity)
    pub fire_sale_pressure: f64,
    pub net: f64,
}

/// Time series the CCP records each tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CcpHistory {
    pub utility: Vec<UtilityBreakdown>,
    pub margin_rate: Vec<f64>,
    pub panic_mode: Vec<bool>,
    pub default_fund: Vec<f64>,
    pub fire_sale_volume: Vec<f64>,
}

/// The central counterparty.
#[derive(Debug, Clone)]
pub struct Ccp {
    pub agent_id: String,

    /// Mutualised loss-absorbing pool
    pub default_fund: f64,
    pub base_margin: f64,
    pub margin_sensitivity: f64,
    /// Published each tick
    pub current_margin_rate: f64,

    pub panic_mode: bool,
    pub safe_multiplier: f64,

    /// Utility weights (stability, fund preservation, cascade prevention,
    /// market stress), summing to one
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
    pub w4: f64,

    /// CCP-private observations
    pub total_exposure: f64,
    pub member_risk_scores: BTreeMap<usize, f64>,
    /// Fire-sale quantity observed from the previous tick's broadcast
    pub fire_sale_volume: f64,
    /// Newly defaulted banks since the last observation
    pub defaults_this_tick: usize,
    prev_defaulted_count: usize,

    pub margin_call_threshold: f64,
    baseline_threshold: f64,
    stress_threshold: f64,

    /// Fund accounting for the invariant
    /// `fund(t) = fund(0) + Σ deposits − Σ absorptions`
    pub initial_fund: f64,
    pub deposits_total: f64,
    pub absorptions_total: f64,
    pub absorption_events: Vec<AbsorptionEvent>,

    pub margin_calls_issued: u64,
    pub fire_sale_total: f64,
    pub history: CcpHistory,
}

impl Ccp {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            agent_id: CCP_ID.to_string(),
            default_fund: config.ccp_initial_default_fund,
            base_margin: config.ccp_base_margin,
            margin_sensitivity: config.ccp_margin_sensitivity,
            current_margin_rate: config.ccp_base_margin,
            panic_mode: false,
            safe_multiplier: config.ccp_safe_multiplier,
            w1: config.ccp_w1,
            w2: config.ccp_w2,
            w3: config.ccp_w3,
            w4: config.ccp_w4,
            total_exposure: 0.0,
            member_risk_scores: BTreeMap::new(),
            fire_sale_volume: 0.0,
            defaults_this_tick: 0,
            prev_defaulted_count: 0,
            margin_call_threshold: config.margin_call_threshold,
            baseline_threshold: config.margin_call_threshold,
            stress_threshold: config.stress_threshold,
            initial_fund: config.ccp_initial_default_fund,
            deposits_total: 0.0,
            absorptions_total: 0.0,
            absorption_events: Vec::new(),
            margin_calls_issued: 0,
            fire_sale_total: 0.0,
            history: CcpHistory::default(),
        }
    }

    /// Maximum acceptable total exposure.
    pub fn safe_limit(&self) -> f64 {
        self.default_fund * self.safe_multiplier
    }

    /// Full decision cycle for one tick. Returns the number of margin calls
    /// issued.
    pub fn step(
        &mut self,
        tick: u64,
        banks: &[Bank],
        fabric: &mut StateFabric,
    ) -> Result<usize, FabricError> {
        self.observe(tick, banks, fabric)?;

        let volatility = fabric.get_market_data()?.new_volatility;
        self.update_margin_rate(volatility);
        self.check_panic();
        self.compute_risk_scores(banks);

        let calls = self.issue_margin_calls(tick, banks, fabric)?;

        fabric.publish_system_value("margin_rate", round4(self.current_margin_rate))?;

        let utility = self.compute_utility(banks);
        self.history.utility.push(utility);
        self.history.margin_rate.push(self.current_margin_rate);
        self.history.panic_mode.push(self.panic_mode);
        self.history.default_fund.push(self.default_fund);
        self.history.fire_sale_volume.push(self.fire_sale_volume);

        Ok(calls)
    }

    /// Step 1: private information gathering.
    fn observe(
        &mut self,
        tick: u64,
        banks: &[Bank],
        fabric: &mut StateFabric,
    ) -> Result<(), FabricError> {
        self.total_exposure = banks
            .iter()
            .filter(|b| b.is_live())
            .map(|b| b.total_exposure())
            .sum();

        self.fire_sale_volume = 0.0;
        if tick > 1 {
            for intent in fabric.public_stream(tick - 1)? {
                if let Payload::FireSaleAsset(p) = &intent.payload {
                    self.fire_sale_volume += p.quantity;
                }
            }
        }
        self.fire_sale_total += self.fire_sale_volume;

        let defaulted_now = banks.iter().filter(|b| b.defaulted).count();
        self.defaults_this_tick = defaulted_now.saturating_sub(self.prev_defaulted_count);
        self.prev_defaulted_count = defaulted_now;
        Ok(())
    }

    /// Step 2: `rate = base + volatility · sensitivity`, panic surcharge,
    /// clamp.
    fn update_margin_rate(&mut self, volatility: f64) {
        let mut rate = self.base_margin + volatility * self.margin_sensitivity;
        if self.panic_mode {
            rate *= PANIC_SURCHARGE;
        }
        self.current_margin_rate = rate.clamp(MARGIN_RATE_MIN, MARGIN_RATE_MAX);
    }

    /// Step 3: panic when total exposure breaches the safe limit; tighten the
    /// margin-call threshold on the rising edge, relax toward the baseline on
    /// the falling edge.
    fn check_panic(&mut self) {
        let was_panic = self.panic_mode;
        self.panic_mode = self.total_exposure > self.safe_limit();

        if self.panic_mode && !was_panic {
            self.margin_call_threshold = (self.margin_call_threshold * 0.6).max(THRESHOLD_FLOOR);
            warn!(
                "CCP entering panic mode (exposure {:.1} > safe limit {:.1})",
                self.total_exposure,
                self.safe_limit()
            );
        } else if !self.panic_mode && was_panic {
            self.margin_call_threshold =
                (self.margin_call_threshold * 1.2).min(self.baseline_threshold);
            info!("CCP exiting panic mode");
        }
    }

    /// Step 4: per-bank risk scores (private; banks never see their own).
    fn compute_risk_scores(&mut self, banks: &[Bank]) {
        for bank in banks {
            if bank.defaulted {
                self.member_risk_scores.insert(bank.index, 1.0);
                continue;
            }
            let exposure_ratio = bank.total_exposure() / bank.capital.max(1.0);
            let liquidity_score =
                (1.0 - bank.liquidity.max(0.0) / self.stress_threshold.max(1.0)).max(0.0);
            let stress_flag = if bank.stressed { 1.0 } else { 0.0 };

            let score = 0.5 * exposure_ratio.min(3.0) / 3.0
                + 0.3 * liquidity_score
                + 0.2 * stress_flag;
            self.member_risk_scores
                .insert(bank.index, round4(score.min(1.0)));
        }
    }

    /// Step 5: margin calls for banks whose exposure/capital ratio breaches
    /// the threshold; riskier members get larger, risk-weighted calls.
    fn issue_margin_calls(
        &mut self,
        tick: u64,
        banks: &[Bank],
        fabric: &mut StateFabric,
    ) -> Result<usize, FabricError> {
        let mut issued = 0;
        for bank in banks {
            if bank.defaulted {
                continue;
            }
            let total_exposure = bank.total_exposure();
            let ratio = total_exposure / bank.capital.max(1.0);
            if ratio <= self.margin_call_threshold {
                continue;
            }

            let risk_score = self
                .member_risk_scores
                .get(&bank.index)
                .copied()
                .unwrap_or(0.5);
            let margin_amount =
                total_exposure * self.current_margin_rate * (1.0 + 0.5 * risk_score);

            let deadline_tick = tick + if self.panic_mode { 1 } else { 2 };
            let reason = if self.panic_mode {
                "panic_mode_breach"
            } else {
                "exposure_ratio_breach"
            };

            let call = Intent::new(
                tick,
                CCP_ID,
                Payload::IssueMarginCall(IssueMarginCallPayload {
                    target_agent_id: bank_id(bank.index),
                    margin_amount: round2(margin_amount),
                    deadline_tick,
                    reason: reason.to_string(),
                }),
            );
            fabric.publish_margin_call(bank.index, &call)?;
            self.margin_calls_issued += 1;
            issued += 1;
        }
        Ok(issued)
    }

    /// Step 7: the CCP objective
    /// `U = w1·(1 − panic) + w2·min(1, fund/safe_limit)
    ///    − w3·(defaults_this_tick/banks) − w4·min(1, fire_sales/liquidity)`.
    fn compute_utility(&self, banks: &[Bank]) -> UtilityBreakdown {
        let stability = if self.panic_mode { 0.0 } else { 1.0 };
        let fund_ratio = (self.default_fund / self.safe_limit().max(1.0)).min(1.0);
        let default_pressure = self.defaults_this_tick as f64 / banks.len().max(1) as f64;

        let total_liquidity: f64 = banks
            .iter()
            .filter(|b| b.is_live())
            .map(|b| b.liquidity)
            .sum();
        let fire_sale_pressure = (self.fire_sale_volume / total_liquidity.max(1.0)).min(1.0);

        let net = self.w1 * stability + self.w2 * fund_ratio
            - self.w3 * default_pressure
            - self.w4 * fire_sale_pressure;

        UtilityBreakdown {
            stability,
            fund_ratio,
            default_pressure,
            fire_sale_pressure,
            net: round4(net),
        }
    }

    /// Default waterfall for one failing member.
    ///
    /// Computes the LGD-weighted uncovered loss held by surviving creditors,
    /// absorbs what the fund can, and mutualises the remainder equally
    /// across survivors (half capital, half liquidity). Direct bilateral
    /// contagion is applied by the bank-side default subroutine before this
    /// runs.
    pub fn handle_default(&mut self, banks: &mut [Bank], defaulter: usize, tick: u64) {
        let uncovered: f64 = banks
            .iter()
            .filter(|b| b.index != defaulter && b.is_live())
            .map(|b| {
                crate::bank::decision::LGD * b.exposure.get(&defaulter).copied().unwrap_or(0.0)
            })
            .sum();

        let absorbed = self.default_fund.min(uncovered);
        self.default_fund -= absorbed;
        self.absorptions_total += absorbed;
        let remainder = uncovered - absorbed;

        let survivors: Vec<usize> = banks
            .iter()
            .filter(|b| b.index != defaulter && b.is_live())
            .map(|b| b.index)
            .collect();

        if remainder > 0.0 && !survivors.is_empty() {
            let per_bank = remainder / survivors.len() as f64;
            for &index in &survivors {
                banks[index].capital -= 0.5 * per_bank;
                banks[index].liquidity -= 0.5 * per_bank;
            }
        }

        info!(
            "tick {}: waterfall for {} — uncovered {:.2}, fund absorbed {:.2}, mutualised {:.2}",
            tick,
            bank_id(defaulter),
            uncovered,
            absorbed,
            remainder
        );
        self.absorption_events.push(AbsorptionEvent {
            tick,
            bank_index: defaulter,
            uncovered,
            absorbed,
            mutualised: remainder,
        });
    }

    /// Accept a `DEPOSIT_DEFAULT_FUND` contribution.
    pub fn accept_deposit(&mut self, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        self.default_fund += amount;
        self.deposits_total += amount;
    }

    /// The fund-accounting invariant, checked by tests:
    /// `fund == initial + deposits − absorptions`.
    pub fn fund_accounting_holds(&self) -> bool {
        let expected = self.initial_fund + self.deposits_total - self.absorptions_total;
        (self.default_fund - expected).abs() < 1e-6
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
