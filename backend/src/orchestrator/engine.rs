//! Simulation engine
//!
//! `Simulation` owns all agents and the fabric and drives the per-tick
//! phase order:
//!
//! ```text
//! For each tick t in 1..=steps:
//! 1. Apply the exogenous shock if t == shock_step
//! 2. Publish bank and system state to the fabric
//! 3. Exchange step (volatility + price signal)
//! 4. CCP step (margin calls + public margin rate)
//! 5. Bank steps, in fixed index order
//! 6. Record tick metrics
//! ```
//!
//! # Determinism
//!
//! All randomness flows through one seeded xorshift64* generator. Same seed
//! + same config = identical per-tick action histograms (deterministic
//! replay).

use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::bank;
use crate::ccp::Ccp;
use crate::exchange::Exchange;
use crate::fabric::{FabricError, StateFabric};
use crate::models::bank::Bank;
use crate::models::belief::BetaBelief;
use crate::network::{InterbankGraph, NetworkTopology};
use crate::orchestrator::metrics::{MetricsRecorder, RunSummary, TickMetrics};
use crate::orchestrator::sink::{CompletedRun, RunSink};
use crate::rng::RngManager;

/// Simulation error surface.
///
/// Per-tick agent failures are logged and the tick advances; only fabric
/// unavailability (after its one retry) aborts the run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Fabric(#[from] FabricError),
}

/// Complete simulation configuration.
///
/// Every field has a default; a JSON config file may set any subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Population size
    pub n_banks: usize,
    /// `erdos_renyi` | `scale_free` | `small_world`
    pub network_type: NetworkTopology,
    /// Edge probability for Erdős–Rényi
    pub er_prob: f64,
    /// Tick count
    pub steps: u64,

    pub init_liquidity_lo: f64,
    pub init_liquidity_hi: f64,
    pub init_capital_lo: f64,
    pub init_capital_hi: f64,
    pub init_liquid_bond_lo: f64,
    pub init_liquid_bond_hi: f64,
    pub init_illiquid_lo: f64,
    pub init_illiquid_hi: f64,

    /// Liquidity below this flags a bank as stressed
    pub stress_threshold: f64,
    /// Liquidity target used by the risk engine
    pub min_liquidity: f64,
    /// Per-tick running cost charged to every live bank
    pub step_operating_cost: f64,

    /// Exposure/capital ratio above which the CCP issues margin calls
    pub margin_call_threshold: f64,
    /// Fraction of liquidity a flush bank offers the default fund
    pub default_fund_rate: f64,

    pub ccp_initial_default_fund: f64,
    pub ccp_base_margin: f64,
    pub ccp_margin_sensitivity: f64,
    pub ccp_safe_multiplier: f64,
    pub ccp_w1: f64,
    pub ccp_w2: f64,
    pub ccp_w3: f64,
    pub ccp_w4: f64,

    pub base_volatility: f64,
    /// Tick at which the exchange adds a one-off volatility shock
    pub vol_shock_step: Option<u64>,
    pub market_depth: f64,

    /// Tick at which the exogenous liquidity shock hits
    pub shock_step: Option<u64>,
    /// Fraction of a hit bank's liquidity that drains
    pub shock_intensity: f64,
    /// Probability that each live bank is hit
    pub shock_fraction: f64,

    /// Seed for the network, volatility noise, price signal, and all
    /// bank-level random choices
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_banks: 10,
            network_type: NetworkTopology::ErdosRenyi,
            er_prob: 0.35,
            steps: 40,
            init_liquidity_lo: 50.0,
            init_liquidity_hi: 140.0,
            init_capital_lo: 60.0,
            init_capital_hi: 180.0,
            init_liquid_bond_lo: 100.0,
            init_liquid_bond_hi: 300.0,
            init_illiquid_lo: 50.0,
            init_illiquid_hi: 150.0,
            stress_threshold: 30.0,
            min_liquidity: 25.0,
            step_operating_cost: 2.0,
            margin_call_threshold: 0.5,
            default_fund_rate: 0.05,
            ccp_initial_default_fund: 100.0,
            ccp_base_margin: 0.05,
            ccp_margin_sensitivity: 0.25,
            ccp_safe_multiplier: 10.0,
            ccp_w1: 0.4,
            ccp_w2: 0.3,
            ccp_w3: 0.2,
            ccp_w4: 0.1,
            base_volatility: 0.12,
            vol_shock_step: None,
            market_depth: 100.0,
            shock_step: None,
            shock_intensity: 0.3,
            shock_fraction: 0.6,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.n_banks == 0 {
            return Err(SimulationError::InvalidConfig(
                "n_banks must be > 0".to_string(),
            ));
        }
        if self.steps == 0 {
            return Err(SimulationError::InvalidConfig(
                "steps must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.er_prob) {
            return Err(SimulationError::InvalidConfig(
                "er_prob must be in [0, 1]".to_string(),
            ));
        }
        if self.market_depth <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "market_depth must be positive".to_string(),
            ));
        }
        let ranges = [
            ("init_liquidity", self.init_liquidity_lo, self.init_liquidity_hi),
            ("init_capital", self.init_capital_lo, self.init_capital_hi),
            (
                "init_liquid_bond",
                self.init_liquid_bond_lo,
                self.init_liquid_bond_hi,
            ),
            ("init_illiquid", self.init_illiquid_lo, self.init_illiquid_hi),
        ];
        for (name, lo, hi) in ranges {
            if lo > hi {
                return Err(SimulationError::InvalidConfig(format!(
                    "{}_lo must not exceed {}_hi",
                    name, name
                )));
            }
        }
        let weight_sum = self.ccp_w1 + self.ccp_w2 + self.ccp_w3 + self.ccp_w4;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(SimulationError::InvalidConfig(format!(
                "CCP utility weights must sum to 1, got {}",
                weight_sum
            )));
        }
        Ok(())
    }
}

/// Compute a deterministic SHA256 hash of a serializable config.
///
/// Canonicalizes by sorting object keys so the hash is independent of field
/// ordering. Used to fingerprint runs for replay comparison.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let value = serde_json::to_value(config)
        .map_err(|e| SimulationError::InvalidConfig(format!("unhashable config: {}", e)))?;
    let json = serde_json::to_string(&canonicalize(value))
        .map_err(|e| SimulationError::InvalidConfig(format!("unhashable config: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// The whole simulation: fabric, graph, bank registry, CCP, exchange.
///
/// All functions take this record explicitly; there is no process-wide
/// mutable state.
pub struct Simulation {
    config: SimulationConfig,
    config_hash: String,
    fabric: StateFabric,
    rng: RngManager,
    graph: InterbankGraph,
    banks: Vec<Bank>,
    ccp: Ccp,
    exchange: Exchange,
    metrics: MetricsRecorder,
    sink: Option<Box<dyn RunSink>>,
    run_id: u64,
    current_tick: u64,
}

impl Simulation {
    /// Build a simulation over a fresh in-memory fabric.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        Self::with_fabric(config, StateFabric::in_memory())
    }

    /// Build a simulation over an existing fabric (a shared store keeps run
    /// ids monotonic across runs).
    pub fn with_fabric(
        config: SimulationConfig,
        mut fabric: StateFabric,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let config_hash = compute_config_hash(&config)?;

        // claim a run id, then start from a clean keyspace
        let run_id = fabric.next_run_id()?;
        fabric.flush()?;
        fabric.publish_system_value("run_id", run_id as f64)?;

        let mut rng = RngManager::new(config.seed);
        let graph =
            InterbankGraph::generate(config.network_type, config.n_banks, config.er_prob, &mut rng);

        let mut banks: Vec<Bank> = (0..config.n_banks)
            .map(|i| {
                Bank::new(
                    i,
                    rng.uniform(config.init_liquidity_lo, config.init_liquidity_hi),
                    rng.uniform(config.init_capital_lo, config.init_capital_hi),
                    rng.uniform(config.init_liquid_bond_lo, config.init_liquid_bond_hi),
                    rng.uniform(config.init_illiquid_lo, config.init_illiquid_hi),
                )
            })
            .collect();

        // neighbour priors and random initial bilateral exposures, now that
        // every bank sits on the graph
        for index in 0..config.n_banks {
            for &neighbor in graph.neighbors(index) {
                banks[index]
                    .beliefs
                    .neighbor_default
                    .insert(neighbor, BetaBelief::prior());
                let exposure = rng.uniform(5.0, 30.0);
                banks[index].add_exposure(neighbor, exposure);
            }
        }

        fabric.set_market_depth(config.market_depth)?;
        fabric.publish_system_value("n_banks", config.n_banks as f64)?;

        let exchange = Exchange::new(config.base_volatility, config.vol_shock_step);
        let ccp = Ccp::new(&config);

        info!(
            "run {}: {} banks on a {:?} graph ({} edges), seed {}",
            run_id,
            config.n_banks,
            config.network_type,
            graph.edge_count(),
            config.seed
        );

        Ok(Self {
            config,
            config_hash,
            fabric,
            rng,
            graph,
            banks,
            ccp,
            exchange,
            metrics: MetricsRecorder::new(),
            sink: None,
            run_id,
            current_tick: 0,
        })
    }

    /// Attach an external run sink.
    pub fn set_sink(&mut self, sink: Box<dyn RunSink>) {
        self.sink = Some(sink);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    /// Direct registry access. Bypasses scheduler invariants; intended for
    /// scenario setup in tests.
    pub fn banks_mut(&mut self) -> &mut [Bank] {
        &mut self.banks
    }

    pub fn ccp(&self) -> &Ccp {
        &self.ccp
    }

    pub fn graph(&self) -> &InterbankGraph {
        &self.graph
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Direct fabric access, for analytics and tests.
    pub fn fabric_mut(&mut self) -> &mut StateFabric {
        &mut self.fabric
    }

    // ========================================================================
    // Tick loop
    // ========================================================================

    /// Execute one simulation tick.
    pub fn tick(&mut self) -> Result<TickMetrics, SimulationError> {
        self.current_tick += 1;
        let tick = self.current_tick;

        // Phase 1: exogenous shock
        if self.config.shock_step == Some(tick) {
            self.apply_shock(tick);
        }

        // Phase 2: publish bank and system state
        self.publish_states(tick)?;

        // Phase 3: exchange
        self.exchange.step(tick, &mut self.rng, &mut self.fabric)?;

        // Phase 4: CCP
        let calls = self.ccp.step(tick, &self.banks, &mut self.fabric)?;
        if calls > 0 {
            info!("tick {}: CCP issued {} margin calls", tick, calls);
        }

        // Phase 5: banks, in fixed index order
        let mut action_counts: BTreeMap<String, u64> = BTreeMap::new();
        for index in 0..self.banks.len() {
            let emitted = bank::step(
                index,
                &mut self.banks,
                &mut self.ccp,
                &mut self.fabric,
                &mut self.rng,
                &self.config,
                tick,
            )?;
            if let Some(action) = emitted {
                *action_counts.entry(action.wire_name().to_string()).or_insert(0) += 1;
            }
        }

        // Phase 6: record metrics
        let tick_metrics = TickMetrics::collect(tick, &self.banks, &self.ccp, action_counts);
        self.metrics.record(tick_metrics.clone());
        Ok(tick_metrics)
    }

    /// Exogenous liquidity shock: each live bank is hit with probability
    /// `shock_fraction`, draining `shock_intensity` of its liquidity and
    /// 0.8× that from capital, and marking it stressed.
    fn apply_shock(&mut self, tick: u64) {
        let mut hit = 0;
        for bank in self.banks.iter_mut().filter(|b| b.is_live()) {
            if !self.rng.chance(self.config.shock_fraction) {
                continue;
            }
            let drain = bank.liquidity * self.config.shock_intensity;
            bank.liquidity -= drain;
            bank.capital -= 0.8 * drain;
            bank.stressed = true;
            hit += 1;
        }
        warn!("tick {}: exogenous shock hit {} banks", tick, hit);
    }

    /// Write every bank's observable snapshot and the global aggregates.
    fn publish_states(&mut self, tick: u64) -> Result<(), FabricError> {
        for bank in &self.banks {
            self.fabric
                .publish_bank_state(bank.index, &bank.observable_state())?;
        }

        let live: Vec<&Bank> = self.banks.iter().filter(|b| b.is_live()).collect();
        let n_defaulted = self.banks.len() - live.len();
        let n_stressed = live.iter().filter(|b| b.stressed).count();
        let aggregate_liq: f64 = live.iter().map(|b| b.liquidity).sum();
        let aggregate_exp: f64 = live.iter().map(|b| b.total_exposure()).sum();

        self.fabric.publish_system_value("step", tick as f64)?;
        self.fabric
            .publish_system_value("n_banks", self.banks.len() as f64)?;
        self.fabric
            .publish_system_value("aggregate_liq", aggregate_liq)?;
        self.fabric
            .publish_system_value("aggregate_exp", aggregate_exp)?;
        self.fabric
            .publish_system_value("n_stressed", n_stressed as f64)?;
        self.fabric
            .publish_system_value("n_defaulted", n_defaulted as f64)?;
        Ok(())
    }

    /// Run all configured ticks and finalize.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        for _ in 0..self.config.steps {
            self.tick()?;
        }
        self.finalize()
    }

    /// Build the end-of-run summary, hand the run to the sink if one is
    /// attached, and flush the fabric.
    pub fn finalize(&mut self) -> Result<RunSummary, SimulationError> {
        let summary = self.summary();
        info!("run {} finished: {} defaults", self.run_id, summary.final_defaults);

        if let Some(sink) = self.sink.as_mut() {
            let run = CompletedRun {
                run_id: self.run_id,
                config_hash: &self.config_hash,
                ticks: self.metrics.ticks(),
                summary: &summary,
            };
            // sink failures never fail the run
            if let Err(err) = sink.persist_run(&run) {
                warn!("run sink rejected run {}: {}", self.run_id, err);
            }
        }

        self.fabric.flush()?;
        Ok(summary)
    }

    /// Snapshot the run summary from current state.
    pub fn summary(&self) -> RunSummary {
        let n_defaulted = self.banks.iter().filter(|b| b.defaulted).count();
        let live: Vec<&Bank> = self.banks.iter().filter(|b| b.is_live()).collect();
        RunSummary {
            run_id: self.run_id,
            config_hash: self.config_hash.clone(),
            steps_run: self.current_tick,
            n_banks: self.banks.len(),
            final_defaults: n_defaulted,
            final_active: live.len(),
            freeze_events: self.metrics.freeze_events(),
            final_liquidity: live.iter().map(|b| b.liquidity).sum(),
            final_exposure: live.iter().map(|b| b.total_exposure()).sum(),
            final_margin_rate: self.ccp.current_margin_rate,
            ccp_final_utility: self
                .ccp
                .history
                .utility
                .last()
                .map(|u| u.net)
                .unwrap_or(0.0),
            margin_calls_issued: self.ccp.margin_calls_issued,
            default_fund_final: self.ccp.default_fund,
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("run_id", &self.run_id)
            .field("current_tick", &self.current_tick)
            .field("n_banks", &self.banks.len())
            .field("seed", &self.config.seed)
            .finish()
    }
}
