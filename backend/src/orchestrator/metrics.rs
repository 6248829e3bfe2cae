//! Per-tick metrics and the end-of-run summary

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ccp::Ccp;
use crate::models::bank::Bank;

/// CCP state mirrored into the tick record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CcpTickView {
    pub utility: f64,
    pub margin_rate: f64,
    pub panic_mode: bool,
    pub default_fund: f64,
    pub fire_sale_volume: f64,
}

/// Everything the scheduler records at the end of one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickMetrics {
    pub tick: u64,
    pub n_defaulted: usize,
    pub n_active: usize,
    pub n_stressed: usize,
    pub total_liquidity: f64,
    pub total_exposure: f64,
    /// More than half of active banks stressed
    pub freeze: bool,
    pub avg_default_belief: f64,
    pub avg_stress_belief: f64,
    pub avg_volatility_belief: f64,
    /// Action-type histogram for this tick (wire names)
    pub action_counts: BTreeMap<String, u64>,
    pub ccp: CcpTickView,
}

impl TickMetrics {
    /// Collect the tick record from terminal agent state.
    pub fn collect(
        tick: u64,
        banks: &[Bank],
        ccp: &Ccp,
        action_counts: BTreeMap<String, u64>,
    ) -> Self {
        let n_defaulted = banks.iter().filter(|b| b.defaulted).count();
        let n_active = banks.len() - n_defaulted;
        let n_stressed = banks.iter().filter(|b| b.stressed && b.is_live()).count();
        let freeze = n_active > 0 && (n_stressed as f64 / n_active as f64) > 0.5;

        let live: Vec<&Bank> = banks.iter().filter(|b| b.is_live()).collect();
        let live_count = live.len().max(1) as f64;
        let avg_default_belief =
            live.iter().map(|b| b.beliefs.avg_default_prob()).sum::<f64>() / live_count;
        let avg_stress_belief =
            live.iter().map(|b| b.beliefs.liquidity_stress.mean()).sum::<f64>() / live_count;
        let avg_volatility_belief =
            live.iter().map(|b| b.beliefs.volatility.mean()).sum::<f64>() / live_count;

        Self {
            tick,
            n_defaulted,
            n_active,
            n_stressed,
            total_liquidity: live.iter().map(|b| b.liquidity).sum(),
            total_exposure: live.iter().map(|b| b.total_exposure()).sum(),
            freeze,
            avg_default_belief,
            avg_stress_belief,
            avg_volatility_belief,
            action_counts,
            ccp: CcpTickView {
                utility: ccp.history.utility.last().map(|u| u.net).unwrap_or(0.0),
                margin_rate: ccp.current_margin_rate,
                panic_mode: ccp.panic_mode,
                default_fund: ccp.default_fund,
                fire_sale_volume: ccp.fire_sale_volume,
            },
        }
    }
}

/// Time-series store for a run.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    ticks: Vec<TickMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, metrics: TickMetrics) {
        self.ticks.push(metrics);
    }

    pub fn ticks(&self) -> &[TickMetrics] {
        &self.ticks
    }

    /// Metrics for one tick (1-based).
    pub fn at_tick(&self, tick: u64) -> Option<&TickMetrics> {
        self.ticks.iter().find(|m| m.tick == tick)
    }

    /// Number of ticks in which the network froze.
    pub fn freeze_events(&self) -> usize {
        self.ticks.iter().filter(|m| m.freeze).count()
    }

    /// Per-tick action-type histograms, for replay comparison.
    pub fn action_histograms(&self) -> Vec<&BTreeMap<String, u64>> {
        self.ticks.iter().map(|m| &m.action_counts).collect()
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub config_hash: String,
    pub steps_run: u64,
    pub n_banks: usize,
    pub final_defaults: usize,
    pub final_active: usize,
    pub freeze_events: usize,
    pub final_liquidity: f64,
    pub final_exposure: f64,
    pub final_margin_rate: f64,
    pub ccp_final_utility: f64,
    pub margin_calls_issued: u64,
    pub default_fund_final: f64,
}

impl RunSummary {
    /// Human-readable report block.
    pub fn text_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&"=".repeat(60));
        out.push_str("\n  SIMULATION SUMMARY\n");
        out.push_str(&"=".repeat(60));
        out.push('\n');
        out.push_str(&format!("  Run id            : {}\n", self.run_id));
        out.push_str(&format!("  Banks             : {}\n", self.n_banks));
        out.push_str(&format!("  Timesteps         : {}\n", self.steps_run));
        out.push_str(&format!("  Final defaults    : {}\n", self.final_defaults));
        out.push_str(&format!("  Final active      : {}\n", self.final_active));
        out.push_str(&format!("  Freeze events     : {}\n", self.freeze_events));
        out.push_str(&format!("  Final liquidity   : {:.1}\n", self.final_liquidity));
        out.push_str(&format!("  Final exposure    : {:.1}\n", self.final_exposure));
        out.push_str(&format!(
            "  Final margin rate : {:.2}%\n",
            self.final_margin_rate * 100.0
        ));
        out.push_str(&format!("  Margin calls      : {}\n", self.margin_calls_issued));
        out.push_str(&format!(
            "  Default fund      : {:.1}\n",
            self.default_fund_final
        ));
        out.push_str(&"=".repeat(60));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SimulationConfig;

    #[test]
    fn test_freeze_flag_requires_majority_stressed() {
        let config = SimulationConfig::default();
        let ccp = Ccp::new(&config);

        let mut banks: Vec<Bank> = (0..4).map(|i| Bank::new(i, 100.0, 100.0, 0.0, 0.0)).collect();
        banks[0].stressed = true;
        banks[1].stressed = true;
        let half = TickMetrics::collect(1, &banks, &ccp, BTreeMap::new());
        assert!(!half.freeze, "exactly half is not a freeze");

        banks[2].stressed = true;
        let majority = TickMetrics::collect(2, &banks, &ccp, BTreeMap::new());
        assert!(majority.freeze);
    }

    #[test]
    fn test_defaulted_banks_excluded_from_aggregates() {
        let config = SimulationConfig::default();
        let ccp = Ccp::new(&config);
        let mut banks: Vec<Bank> = (0..3).map(|i| Bank::new(i, 50.0, 100.0, 0.0, 0.0)).collect();
        banks[2].defaulted = true;
        banks[2].liquidity = 0.0;

        let metrics = TickMetrics::collect(1, &banks, &ccp, BTreeMap::new());
        assert_eq!(metrics.n_defaulted, 1);
        assert_eq!(metrics.n_active, 2);
        assert!((metrics.total_liquidity - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_freeze_event_counting() {
        let config = SimulationConfig::default();
        let ccp = Ccp::new(&config);
        let mut recorder = MetricsRecorder::new();

        let mut banks: Vec<Bank> = (0..2).map(|i| Bank::new(i, 100.0, 100.0, 0.0, 0.0)).collect();
        recorder.record(TickMetrics::collect(1, &banks, &ccp, BTreeMap::new()));
        banks[0].stressed = true;
        banks[1].stressed = true;
        recorder.record(TickMetrics::collect(2, &banks, &ccp, BTreeMap::new()));

        assert_eq!(recorder.freeze_events(), 1);
        assert!(recorder.at_tick(2).unwrap().freeze);
    }
}
