//! End-to-end runs: baseline, shock, replay determinism

use interbank_network_core_rs::{Simulation, SimulationConfig};

fn baseline_config() -> SimulationConfig {
    SimulationConfig {
        n_banks: 10,
        steps: 50,
        seed: 99,
        base_volatility: 0.12,
        shock_step: None,
        ..SimulationConfig::default()
    }
}

#[test]
fn test_baseline_run_completes() {
    let mut sim = Simulation::new(baseline_config()).unwrap();
    for _ in 0..50 {
        sim.tick().unwrap();
    }
    let summary = sim.summary();

    assert_eq!(summary.steps_run, 50);
    assert_eq!(sim.metrics().ticks().len(), 50);
    assert_eq!(summary.final_active + summary.final_defaults, 10);
    assert!(summary.final_active > 0, "the whole system collapsed");
    // bilateral exposure decays multiplicatively and is replenished by OTC
    // lending; it never reaches zero while anyone is alive
    assert!(summary.final_exposure > 0.0);
    assert!(sim.ccp().fund_accounting_holds());
    assert!((0.02..=0.30).contains(&summary.final_margin_rate));
}

#[test]
fn test_exogenous_shock_drains_liquidity() {
    let config = SimulationConfig {
        n_banks: 10,
        steps: 15,
        seed: 7,
        init_liquidity_lo: 100.0,
        init_liquidity_hi: 150.0,
        shock_step: Some(10),
        shock_intensity: 0.5,
        shock_fraction: 0.6,
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    for _ in 0..15 {
        sim.tick().unwrap();
    }

    let before = sim.metrics().at_tick(9).unwrap().total_liquidity;
    let after = sim.metrics().at_tick(10).unwrap().total_liquidity;
    assert!(
        after < before,
        "shock tick should drain aggregate liquidity ({} -> {})",
        before,
        after
    );
}

#[test]
fn test_replay_determinism() {
    // I5: with a fixed seed and identical config, the per-tick sequence of
    // action types is identical across runs
    let config = SimulationConfig {
        n_banks: 8,
        steps: 12,
        seed: 2024,
        shock_step: Some(5),
        shock_intensity: 0.4,
        ..SimulationConfig::default()
    };

    let mut a = Simulation::new(config.clone()).unwrap();
    let mut b = Simulation::new(config).unwrap();
    for _ in 0..12 {
        let tick_a = a.tick().unwrap();
        let tick_b = b.tick().unwrap();
        assert_eq!(
            tick_a.action_counts, tick_b.action_counts,
            "histograms diverged at tick {}",
            tick_a.tick
        );
    }

    assert_eq!(a.config_hash(), b.config_hash());
    let summary_a = serde_json::to_value(a.summary()).unwrap();
    let summary_b = serde_json::to_value(b.summary()).unwrap();
    assert_eq!(summary_a, summary_b);
}

#[test]
fn test_different_seeds_produce_different_runs() {
    let mut histograms = Vec::new();
    for seed in [1u64, 2, 3] {
        let config = SimulationConfig {
            n_banks: 8,
            steps: 10,
            seed,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        for _ in 0..10 {
            sim.tick().unwrap();
        }
        let trace: Vec<String> = sim
            .metrics()
            .ticks()
            .iter()
            .map(|t| format!("{:?}", t.action_counts))
            .collect();
        histograms.push(trace);
    }
    // at least one pair differs: the seed reaches the decision layer
    assert!(histograms[0] != histograms[1] || histograms[1] != histograms[2]);
}

#[test]
fn test_run_finalizes_and_flushes() {
    let config = SimulationConfig {
        n_banks: 5,
        steps: 6,
        seed: 44,
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    let summary = sim.run().unwrap();

    assert_eq!(summary.steps_run, 6);
    assert!(summary.run_id >= 1);
    assert!(!summary.config_hash.is_empty());
    // the fabric was flushed at run end
    assert_eq!(sim.fabric_mut().get_system_value("step").unwrap(), None);
    // the text report renders
    assert!(summary.text_report().contains("SIMULATION SUMMARY"));
}

/// The analytics queue records every emitted intent during a run.
#[test]
fn test_intent_log_accumulates() {
    let config = SimulationConfig {
        n_banks: 4,
        steps: 3,
        seed: 12,
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    let mut expected_minimum = 0;
    for _ in 0..3 {
        let metrics = sim.tick().unwrap();
        // one exchange intent plus one per live bank, plus any margin calls
        expected_minimum += 1 + metrics.action_counts.values().sum::<u64>() as usize;
        let logged = sim.fabric_mut().all_intents().unwrap().len();
        assert!(logged >= expected_minimum);
    }
}
