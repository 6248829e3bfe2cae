//! Optional run sink
//!
//! A completed run can be handed to an external persistence layer (the
//! reference deployment is a graph database with node labels `SimRun`,
//! `Bank`, `CCP`, `Tick`, `Intent` and relationships `HAS_BANK`, `HAS_CCP`,
//! `HAS_TICK`, `STATE_AT`, `EMITTED`, `DEFAULTED_AT`, `MARGIN_CALL`,
//! `CONNECTED_TO`, `AT_TICK`, with uniqueness on `SimRun.run_id`,
//! `Intent.intent_id` and `(Bank.bank_id, Bank.run_id)`).
//!
//! The core ships no database client; sink failures are logged and the
//! simulation result is unaffected.

use thiserror::Error;

use crate::orchestrator::metrics::{RunSummary, TickMetrics};

/// Sink failure surface.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink already holds an intent with this id; the record is
    /// rejected and the simulation continues.
    #[error("duplicate intent id: {0}")]
    DuplicateIntent(String),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A finished run, as handed to the sink once at run end.
#[derive(Debug)]
pub struct CompletedRun<'a> {
    pub run_id: u64,
    pub config_hash: &'a str,
    pub ticks: &'a [TickMetrics],
    pub summary: &'a RunSummary,
}

/// External persistence for finished runs.
pub trait RunSink {
    fn persist_run(&mut self, run: &CompletedRun<'_>) -> Result<(), SinkError>;
}
