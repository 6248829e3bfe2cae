//! Bank balance-sheet record
//!
//! The passive state of one bank: balance sheet, loan books, private
//! beliefs, and status flags. All behaviour (belief updates, decisions,
//! execution) lives in the `bank` engine module; banks are resolved through
//! the simulation's registry by integer index, never by back pointers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::belief::{BetaBelief, NormalBelief};
use crate::models::intent::{BeliefSnapshot, Intent};
use crate::models::loan::{InterbankLoan, OtcLoan};

/// Standard asset identifiers.
pub const LIQUID_BOND: &str = "liquid_bond";
pub const ILLIQUID_ASSET: &str = "illiquid_asset";

/// Stable string identifier for a bank index: `bank_NN`.
pub fn bank_id(index: usize) -> String {
    format!("bank_{:02}", index)
}

/// Parse a `bank_NN` identifier back to its index.
pub fn bank_index_from_id(id: &str) -> Option<usize> {
    id.strip_prefix("bank_")?.parse().ok()
}

/// The four private Bayesian belief channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    /// Per-neighbour default beliefs, Beta(1, 9) prior
    pub neighbor_default: BTreeMap<usize, BetaBelief>,
    /// Network liquidity stress (fraction of stressed banks)
    pub liquidity_stress: NormalBelief,
    /// Expected margin-call magnitude
    pub margin_call: NormalBelief,
    /// Market volatility
    pub volatility: NormalBelief,
}

impl BeliefState {
    pub fn new() -> Self {
        Self {
            neighbor_default: BTreeMap::new(),
            liquidity_stress: NormalBelief::new(0.2, 1.0),
            margin_call: NormalBelief::new(5.0, 0.5),
            volatility: NormalBelief::new(0.2, 1.0),
        }
    }

    /// Posterior mean default probability for a neighbour (prior mean when
    /// the neighbour is unknown).
    pub fn default_prob(&self, neighbor: usize) -> f64 {
        self.neighbor_default
            .get(&neighbor)
            .map(|b| b.mean())
            .unwrap_or_else(|| BetaBelief::prior().mean())
    }

    /// Average default belief across known neighbours.
    pub fn avg_default_prob(&self) -> f64 {
        if self.neighbor_default.is_empty() {
            return BetaBelief::prior().mean();
        }
        let sum: f64 = self.neighbor_default.values().map(|b| b.mean()).sum();
        sum / self.neighbor_default.len() as f64
    }

    /// Summary attached to emitted intents.
    pub fn snapshot(&self) -> BeliefSnapshot {
        BeliefSnapshot {
            avg_neighbor_default_prob: self.avg_default_prob(),
            liquidity_stress_mu: self.liquidity_stress.mean(),
            expected_margin_call_mu: self.margin_call.mean(),
            market_volatility_mu: self.volatility.mean(),
        }
    }
}

impl Default for BeliefState {
    fn default() -> Self {
        Self::new()
    }
}

/// A bank participating in the interbank network.
#[derive(Debug, Clone)]
pub struct Bank {
    /// Stable identifier `bank_NN`
    pub id: String,
    /// Registry index (graph node)
    pub index: usize,

    /// Cash; may transiently go negative, default when ≤ 0
    pub liquidity: f64,
    /// Loss-absorbing capital; default when ≤ 0
    pub capital: f64,
    /// Asset holdings by identifier, quantities non-negative
    pub assets: BTreeMap<String, f64>,
    /// Outstanding lent amount per neighbour index
    pub exposure: BTreeMap<usize, f64>,

    /// Margin calls drained from the inbox and not yet acknowledged
    pub pending_margin_calls: Vec<Intent>,
    /// OTC loans this bank has extended
    pub otc_loans_given: Vec<OtcLoan>,
    /// Interbank loans this bank has extended
    pub interbank_given: Vec<InterbankLoan>,
    /// Interbank loans this bank has received
    pub interbank_received: Vec<InterbankLoan>,
    /// Cumulative amount deposited into the CCP default fund
    pub default_fund_contribution: f64,

    /// Private Bayesian beliefs
    pub beliefs: BeliefState,

    pub defaulted: bool,
    pub stressed: bool,
    pub missed_payment: bool,

    /// The most recent intent this bank emitted
    pub last_intent: Option<Intent>,
    /// Count of intents emitted over the run
    pub intents_emitted: u64,
    /// Count of private-stream messages consumed over the run
    pub private_intents_seen: u64,
    /// Count of margin-call messages drained over the run
    pub margin_calls_processed: u64,
}

impl Bank {
    /// Create a bank with an opening balance sheet.
    pub fn new(index: usize, liquidity: f64, capital: f64, liquid_bond: f64, illiquid: f64) -> Self {
        let mut assets = BTreeMap::new();
        assets.insert(LIQUID_BOND.to_string(), liquid_bond);
        assets.insert(ILLIQUID_ASSET.to_string(), illiquid);
        Self {
            id: bank_id(index),
            index,
            liquidity,
            capital,
            assets,
            exposure: BTreeMap::new(),
            pending_margin_calls: Vec::new(),
            otc_loans_given: Vec::new(),
            interbank_given: Vec::new(),
            interbank_received: Vec::new(),
            default_fund_contribution: 0.0,
            beliefs: BeliefState::new(),
            defaulted: false,
            stressed: false,
            missed_payment: false,
            last_intent: None,
            intents_emitted: 0,
            private_intents_seen: 0,
            margin_calls_processed: 0,
        }
    }

    /// Non-defaulted.
    pub fn is_live(&self) -> bool {
        !self.defaulted
    }

    /// Sum of bilateral exposures.
    pub fn total_exposure(&self) -> f64 {
        self.exposure.values().sum()
    }

    /// Sum of asset holdings (quantities).
    pub fn total_assets(&self) -> f64 {
        self.assets.values().sum()
    }

    /// Holding of one asset (zero when absent).
    pub fn holding(&self, asset: &str) -> f64 {
        self.assets.get(asset).copied().unwrap_or(0.0)
    }

    /// Add to the bilateral exposure toward a neighbour.
    pub fn add_exposure(&mut self, neighbor: usize, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        *self.exposure.entry(neighbor).or_insert(0.0) += amount;
    }

    /// Total margin amount currently due across pending calls.
    pub fn total_margin_due(&self) -> f64 {
        self.pending_margin_calls
            .iter()
            .filter_map(|call| match &call.payload {
                crate::models::intent::Payload::IssueMarginCall(p) => Some(p.margin_amount),
                _ => None,
            })
            .sum()
    }

    /// Received interbank loans already at or past maturity.
    pub fn loans_due(&self, tick: u64) -> Vec<&InterbankLoan> {
        self.interbank_received
            .iter()
            .filter(|l| l.is_due(tick))
            .collect()
    }

    /// Total repayment due on matured received loans.
    pub fn total_repayment_due(&self, tick: u64) -> f64 {
        self.loans_due(tick).iter().map(|l| l.repayment_due()).sum()
    }

    /// Observable state snapshot published to the fabric each tick.
    ///
    /// This is all the information other banks may see about this bank.
    pub fn observable_state(&self) -> Vec<(String, String)> {
        vec![
            ("liquidity".to_string(), self.liquidity.to_string()),
            ("capital".to_string(), self.capital.to_string()),
            ("total_exposure".to_string(), self.total_exposure().to_string()),
            ("stressed".to_string(), u8::from(self.stressed).to_string()),
            ("defaulted".to_string(), u8::from(self.defaulted).to_string()),
            (
                "missed_payment".to_string(),
                u8::from(self.missed_payment).to_string(),
            ),
        ]
    }

    /// Terminal-state wipe applied when the bank defaults: balance sheet and
    /// exposures zeroed, OTC book cleared. Received interbank loans are left
    /// intact so lenders take the loss through contagion.
    pub fn zero_out(&mut self) {
        self.liquidity = 0.0;
        self.capital = 0.0;
        self.assets.values_mut().for_each(|q| *q = 0.0);
        self.exposure.clear();
        self.otc_loans_given.clear();
        self.pending_margin_calls.clear();
    }
}
