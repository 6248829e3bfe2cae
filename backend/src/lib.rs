//! Interbank Network Core - Rust Engine
//!
//! CCP-coordinated interbank financial network simulator with deterministic
//! execution. A fixed population of banks act as Bayesian decision-makers, a
//! central counterparty manages margins and mutualises default losses, an
//! exchange prices sales with persistent market impact, and a shared state
//! fabric mediates every inter-agent observation.
//!
//! # Architecture
//!
//! - **models**: Domain types (Bank, Intent, Beliefs, Loans, Market)
//! - **fabric**: Keyed store with smart intent routing
//! - **network**: Seeded interbank graph generators
//! - **exchange**: Volatility process and market-impact pricing
//! - **bank**: Per-tick bank engine (ingest → beliefs → risk → act)
//! - **ccp**: Margining, panic mode, default waterfall
//! - **orchestrator**: Tick scheduler and metrics
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. All randomness is deterministic (one seeded RNG per run)
//! 2. Defaults are terminal; balance sheets zero in the same tick
//! 3. The fabric is the only shared resource; streams deliver exactly-once
//!    to private addressees and broadcast publicly with one tick of latency

// Module declarations
pub mod bank;
pub mod ccp;
pub mod exchange;
pub mod fabric;
pub mod models;
pub mod network;
pub mod orchestrator;
pub mod rng;

// Re-exports for convenience
pub use ccp::{Ccp, CCP_ID};
pub use exchange::{Exchange, EXCHANGE_ID};
pub use fabric::{FabricError, StateFabric, SystemSnapshot};
pub use models::{
    ActionType, Bank, BetaBelief, Intent, InterbankLoan, MarketSnapshot, NormalBelief, OtcLoan,
    Payload, Visibility,
};
pub use network::{InterbankGraph, NetworkTopology};
pub use orchestrator::{
    MetricsRecorder, RunSummary, Simulation, SimulationConfig, SimulationError, TickMetrics,
};
pub use rng::RngManager;
