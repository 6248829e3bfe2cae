//! Tick scheduler
//!
//! Owns the fabric, the interbank graph, the bank registry, the CCP and the
//! exchange; drives the per-tick phase order and records metrics.

pub mod engine;
pub mod metrics;
pub mod sink;

pub use engine::{compute_config_hash, Simulation, SimulationConfig, SimulationError};
pub use metrics::{MetricsRecorder, RunSummary, TickMetrics};
pub use sink::{CompletedRun, RunSink, SinkError};
