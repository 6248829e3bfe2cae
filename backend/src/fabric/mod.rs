//! State fabric
//!
//! The shared keyed store mediating all inter-agent observation: per-bank
//! snapshots, global aggregates, the market snapshot, per-bank margin-call
//! inboxes, per-tick public broadcast streams, per-agent private delivery
//! streams, the global intent log, and per-(tick, asset) cumulative sale
//! volume.
//!
//! # Delivery contracts
//!
//! - Queue reads are in insertion order.
//! - `margin_calls:bank:{i}` and `stream:private:{agent}` are drained on
//!   read: exactly-once delivery to the addressee.
//! - `stream:public:{t}` is read non-destructively (broadcast fan-out) and
//!   carries a 10 minute TTL.
//! - The increment on `sales:{t}:{asset}` is atomic so two sellers in the
//!   same tick see monotonically growing cumulative volumes.
//!
//! # Smart routing
//!
//! Publishing an intent always appends to `intents:queue` (analytics
//! side-channel). Public intents additionally go to `stream:public:{tick}`.
//! Private intents resolve their target from payload keys in priority
//! `target`, `target_agent_id`, `borrower_bank_id`, `final_destination` and
//! go to `stream:private:{target}`, plus a sender record in the emitter's
//! own stream when the target differs.
//!
//! # Failure model
//!
//! Every call is retried once; a second failure surfaces to the scheduler,
//! which aborts the run (fabric unavailability is the only fatal error).

pub mod store;

use std::collections::BTreeMap;
use std::time::Duration;

use log::warn;
use serde_json::Value;
use thiserror::Error;

use crate::models::intent::Intent;
use crate::models::market::MarketSnapshot;

pub use store::{FabricBackend, MemoryStore};

/// TTL on per-tick public broadcast streams.
const PUBLIC_STREAM_TTL: Duration = Duration::from_secs(600);
/// TTL on per-(tick, asset) sale-volume keys.
const SALE_KEY_TTL: Duration = Duration::from_secs(300);

/// Payload keys consulted, in priority order, to route a private intent.
const TARGET_KEYS: [&str; 4] = [
    "target",
    "target_agent_id",
    "borrower_bank_id",
    "final_destination",
];

/// Fabric failure surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FabricError {
    /// The keyed store could not be reached within the bounded timeout.
    #[error("state fabric unavailable: {0}")]
    Unavailable(String),
}

/// Shared state fabric over a pluggable keyed store.
pub struct StateFabric {
    backend: Box<dyn FabricBackend>,
}

impl std::fmt::Debug for StateFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFabric").finish_non_exhaustive()
    }
}

impl StateFabric {
    /// Fabric over the in-memory store.
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryStore::new()))
    }

    /// Fabric over any keyed-store backend.
    pub fn with_backend(backend: Box<dyn FabricBackend>) -> Self {
        Self { backend }
    }

    /// Run a store operation, retrying once on unavailability.
    fn retrying<T>(
        &mut self,
        mut op: impl FnMut(&mut dyn FabricBackend) -> Result<T, FabricError>,
    ) -> Result<T, FabricError> {
        match op(self.backend.as_mut()) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!("state fabric call failed, retrying once: {}", err);
                op(self.backend.as_mut())
            }
        }
    }

    // ========================================================================
    // Bank and system snapshots
    // ========================================================================

    /// Write one bank's observable state.
    pub fn publish_bank_state(
        &mut self,
        bank_index: usize,
        state: &[(String, String)],
    ) -> Result<(), FabricError> {
        let key = format!("bank:{}:state", bank_index);
        self.retrying(|b| b.hset(&key, state))
    }

    /// Read one bank's latest snapshot as numeric fields.
    pub fn get_bank_state(
        &mut self,
        bank_index: usize,
    ) -> Result<BTreeMap<String, f64>, FabricError> {
        let key = format!("bank:{}:state", bank_index);
        let raw = self.retrying(|b| b.hgetall(&key))?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| v.parse::<f64>().ok().map(|f| (k, f)))
            .collect())
    }

    /// Write a single global scalar under `system:{field}`.
    pub fn publish_system_value(&mut self, field: &str, value: f64) -> Result<(), FabricError> {
        let key = format!("system:{}", field);
        let rendered = value.to_string();
        self.retrying(|b| b.set(&key, &rendered))
    }

    /// Read a single global scalar.
    pub fn get_system_value(&mut self, field: &str) -> Result<Option<f64>, FabricError> {
        let key = format!("system:{}", field);
        let raw = self.retrying(|b| b.get(&key))?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    /// The complete snapshot a bank pulls during observation.
    pub fn full_snapshot(&mut self) -> Result<SystemSnapshot, FabricError> {
        let mut snap = SystemSnapshot::default();
        snap.step = self.get_system_value("step")?.unwrap_or(0.0) as u64;
        snap.n_banks = self.get_system_value("n_banks")?.unwrap_or(0.0) as usize;
        snap.aggregate_liq = self.get_system_value("aggregate_liq")?.unwrap_or(0.0);
        snap.aggregate_exp = self.get_system_value("aggregate_exp")?.unwrap_or(0.0);
        snap.n_stressed = self.get_system_value("n_stressed")?.unwrap_or(0.0) as usize;
        snap.n_defaulted = self.get_system_value("n_defaulted")?.unwrap_or(0.0) as usize;
        snap.margin_rate = self.get_system_value("margin_rate")?.unwrap_or(0.0);

        for index in 0..snap.n_banks {
            let fields = self.get_bank_state(index)?;
            if fields.is_empty() {
                continue;
            }
            snap.banks.insert(index, BankStateView::from_fields(&fields));
        }
        Ok(snap)
    }

    // ========================================================================
    // Market data
    // ========================================================================

    /// Mirror the latest market snapshot at `market:latest`.
    pub fn publish_market_data(&mut self, snapshot: &MarketSnapshot) -> Result<(), FabricError> {
        let json = serde_json::to_string(snapshot)
            .expect("market snapshot serialization cannot fail");
        self.retrying(|b| b.set("market:latest", &json))
    }

    /// Read the latest market snapshot, falling back to the default before
    /// the exchange has published anything.
    pub fn get_market_data(&mut self) -> Result<MarketSnapshot, FabricError> {
        let raw = self.retrying(|b| b.get("market:latest"))?;
        Ok(raw
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default())
    }

    /// Write the market depth parameter at setup.
    pub fn set_market_depth(&mut self, depth: f64) -> Result<(), FabricError> {
        let rendered = depth.to_string();
        self.retrying(|b| b.set("market:depth", &rendered))
    }

    /// Read the market depth parameter.
    pub fn market_depth(&mut self) -> Result<f64, FabricError> {
        let raw = self.retrying(|b| b.get("market:depth"))?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(100.0))
    }

    // ========================================================================
    // Intent routing
    // ========================================================================

    /// Publish an intent with smart routing.
    pub fn publish_intent(&mut self, intent: &Intent) -> Result<(), FabricError> {
        let json = serde_json::to_string(intent).expect("intent serialization cannot fail");
        self.retrying(|b| b.rpush("intents:queue", &json))?;

        match intent.visibility {
            crate::models::intent::Visibility::Public => {
                let key = format!("stream:public:{}", intent.tick);
                self.retrying(|b| b.rpush(&key, &json))?;
                self.retrying(|b| b.expire(&key, PUBLIC_STREAM_TTL))?;
            }
            crate::models::intent::Visibility::Private => {
                let payload_value = intent
                    .payload
                    .to_value()
                    .expect("payload serialization cannot fail");
                match resolve_target(&payload_value) {
                    Some(target) => {
                        let key = format!("stream:private:{}", target);
                        self.retrying(|b| b.rpush(&key, &json))?;
                        if target != intent.agent_id {
                            let sender_key = format!("stream:private:{}", intent.agent_id);
                            self.retrying(|b| b.rpush(&sender_key, &json))?;
                        }
                    }
                    None => {
                        // self-directed action with no target key
                        let key = format!("stream:private:{}", intent.agent_id);
                        self.retrying(|b| b.rpush(&key, &json))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Push a margin call into a bank's inbox (and the analytics queue).
    pub fn publish_margin_call(
        &mut self,
        bank_index: usize,
        call: &Intent,
    ) -> Result<(), FabricError> {
        let json = serde_json::to_string(call).expect("intent serialization cannot fail");
        self.retrying(|b| b.rpush("intents:queue", &json))?;
        let key = format!("margin_calls:bank:{}", bank_index);
        self.retrying(|b| b.rpush(&key, &json))
    }

    /// Drain a bank's margin-call inbox (at-most-once delivery).
    pub fn drain_margin_calls(&mut self, bank_index: usize) -> Result<Vec<Intent>, FabricError> {
        let key = format!("margin_calls:bank:{}", bank_index);
        let raw = self.retrying(|b| b.lrange(&key))?;
        self.retrying(|b| b.del(&key))?;
        Ok(decode_intents(&raw))
    }

    /// Read a tick's public broadcast stream (non-destructive).
    pub fn public_stream(&mut self, tick: u64) -> Result<Vec<Intent>, FabricError> {
        let key = format!("stream:public:{}", tick);
        let raw = self.retrying(|b| b.lrange(&key))?;
        Ok(decode_intents(&raw))
    }

    /// Drain an agent's private delivery stream (exactly-once).
    pub fn drain_private_stream(&mut self, agent_id: &str) -> Result<Vec<Intent>, FabricError> {
        let key = format!("stream:private:{}", agent_id);
        let raw = self.retrying(|b| b.lrange(&key))?;
        self.retrying(|b| b.del(&key))?;
        Ok(decode_intents(&raw))
    }

    /// Read the global intent log (analytics only).
    pub fn all_intents(&mut self) -> Result<Vec<Intent>, FabricError> {
        let raw = self.retrying(|b| b.lrange("intents:queue"))?;
        Ok(decode_intents(&raw))
    }

    // ========================================================================
    // Sale accounting
    // ========================================================================

    /// Atomically add a sale to the cumulative volume for (tick, asset).
    /// Returns the new cumulative volume.
    pub fn record_sale(
        &mut self,
        tick: u64,
        asset: &str,
        quantity: f64,
    ) -> Result<f64, FabricError> {
        let key = format!("sales:{}:{}", tick, asset);
        let total = self.retrying(|b| b.incr_by_float(&key, quantity))?;
        self.retrying(|b| b.expire(&key, SALE_KEY_TTL))?;
        Ok(total)
    }

    /// Cumulative volume recorded for (tick, asset).
    pub fn cumulative_sales(&mut self, tick: u64, asset: &str) -> Result<f64, FabricError> {
        let key = format!("sales:{}:{}", tick, asset);
        let raw = self.retrying(|b| b.get(&key))?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0.0))
    }

    /// Sale pressure over the lookback window t−2..=t.
    pub fn recent_sale_pressure(&mut self, tick: u64, asset: &str) -> Result<f64, FabricError> {
        let mut total = 0.0;
        for t in tick.saturating_sub(2)..=tick {
            total += self.cumulative_sales(t, asset)?;
        }
        Ok(total)
    }

    // ========================================================================
    // Run bookkeeping
    // ========================================================================

    /// Monotonically numbered run identifier.
    pub fn next_run_id(&mut self) -> Result<u64, FabricError> {
        let id = self.retrying(|b| b.incr_by_float("system:run_id", 1.0))?;
        Ok(id as u64)
    }

    /// Clear every key.
    pub fn flush(&mut self) -> Result<(), FabricError> {
        self.retrying(|b| b.flush())
    }
}

/// Resolve a private intent's delivery target from its payload.
fn resolve_target(payload: &Value) -> Option<String> {
    let obj = payload.as_object()?;
    for key in TARGET_KEYS {
        if let Some(Value::String(target)) = obj.get(key) {
            return Some(target.clone());
        }
    }
    None
}

/// Decode a list of serialized intents, logging and skipping malformed
/// entries (the receiving agent ignores them).
fn decode_intents(raw: &[String]) -> Vec<Intent> {
    raw.iter()
        .filter_map(|json| match serde_json::from_str::<Intent>(json) {
            Ok(intent) => Some(intent),
            Err(err) => {
                warn!("ignoring malformed intent on fabric: {}", err);
                None
            }
        })
        .collect()
}

/// One bank's observable state as other banks see it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BankStateView {
    pub liquidity: f64,
    pub capital: f64,
    pub total_exposure: f64,
    pub stressed: bool,
    pub defaulted: bool,
    pub missed_payment: bool,
}

impl BankStateView {
    fn from_fields(fields: &BTreeMap<String, f64>) -> Self {
        let flag = |name: &str| fields.get(name).copied().unwrap_or(0.0) != 0.0;
        Self {
            liquidity: fields.get("liquidity").copied().unwrap_or(0.0),
            capital: fields.get("capital").copied().unwrap_or(0.0),
            total_exposure: fields.get("total_exposure").copied().unwrap_or(0.0),
            stressed: flag("stressed"),
            defaulted: flag("defaulted"),
            missed_payment: flag("missed_payment"),
        }
    }
}

/// The global snapshot a bank pulls each tick.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub step: u64,
    pub n_banks: usize,
    pub aggregate_liq: f64,
    pub aggregate_exp: f64,
    pub n_stressed: usize,
    pub n_defaulted: usize,
    pub margin_rate: f64,
    pub banks: BTreeMap<usize, BankStateView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::intent::{
        BorrowPayload, HoardLiquidityPayload, Payload, ProvideInterbankCreditPayload,
    };

    fn borrow_intent(tick: u64, emitter: &str, target: &str) -> Intent {
        Intent::new(
            tick,
            emitter,
            Payload::Borrow(BorrowPayload {
                amount: 10.0,
                target_agent_id: target.to_string(),
            }),
        )
    }

    #[test]
    fn test_private_intent_routed_to_target_and_sender() {
        let mut fabric = StateFabric::in_memory();
        let intent = borrow_intent(3, "bank_00", "bank_01");
        fabric.publish_intent(&intent).unwrap();

        let to_target = fabric.drain_private_stream("bank_01").unwrap();
        assert_eq!(to_target.len(), 1);
        assert_eq!(to_target[0].intent_id, intent.intent_id);

        // sender record
        let to_sender = fabric.drain_private_stream("bank_00").unwrap();
        assert_eq!(to_sender.len(), 1);

        // nobody else sees it
        assert!(fabric.drain_private_stream("bank_02").unwrap().is_empty());
        assert!(fabric.public_stream(3).unwrap().is_empty());
    }

    #[test]
    fn test_untargeted_private_intent_stays_with_emitter() {
        let mut fabric = StateFabric::in_memory();
        let intent = Intent::new(
            2,
            "bank_04",
            Payload::HoardLiquidity(HoardLiquidityPayload {
                estimated_recovery: 1.5,
            }),
        );
        fabric.publish_intent(&intent).unwrap();
        assert_eq!(fabric.drain_private_stream("bank_04").unwrap().len(), 1);
    }

    #[test]
    fn test_borrower_key_resolves_target() {
        let mut fabric = StateFabric::in_memory();
        let intent = Intent::new(
            5,
            "bank_00",
            Payload::ProvideInterbankCredit(ProvideInterbankCreditPayload {
                borrower_bank_id: "bank_02".to_string(),
                principal: 15.0,
                interest_rate: 0.04,
                maturity_tick: 10,
            }),
        );
        fabric.publish_intent(&intent).unwrap();
        assert_eq!(fabric.drain_private_stream("bank_02").unwrap().len(), 1);
    }

    #[test]
    fn test_public_stream_is_non_destructive() {
        let mut fabric = StateFabric::in_memory();
        let intent = Intent::new(
            7,
            "bank_00",
            Payload::DeclareDefault(crate::models::intent::DeclareDefaultPayload {
                reason: "test".to_string(),
            }),
        );
        fabric.publish_intent(&intent).unwrap();

        assert_eq!(fabric.public_stream(7).unwrap().len(), 1);
        assert_eq!(fabric.public_stream(7).unwrap().len(), 1);
        // wrong tick sees nothing
        assert!(fabric.public_stream(8).unwrap().is_empty());
    }

    #[test]
    fn test_margin_call_inbox_drains_once() {
        let mut fabric = StateFabric::in_memory();
        let call = Intent::new(
            1,
            "ccp_01",
            Payload::IssueMarginCall(crate::models::intent::IssueMarginCallPayload {
                target_agent_id: "bank_03".to_string(),
                margin_amount: 4.0,
                deadline_tick: 3,
                reason: "exposure_ratio_breach".to_string(),
            }),
        );
        fabric.publish_margin_call(3, &call).unwrap();

        assert_eq!(fabric.drain_margin_calls(3).unwrap().len(), 1);
        assert!(fabric.drain_margin_calls(3).unwrap().is_empty());
    }

    #[test]
    fn test_every_publish_lands_in_analytics_queue() {
        let mut fabric = StateFabric::in_memory();
        fabric
            .publish_intent(&borrow_intent(1, "bank_00", "bank_01"))
            .unwrap();
        fabric
            .publish_intent(&borrow_intent(2, "bank_01", "bank_00"))
            .unwrap();
        assert_eq!(fabric.all_intents().unwrap().len(), 2);
    }

    #[test]
    fn test_sale_accounting_is_cumulative() {
        let mut fabric = StateFabric::in_memory();
        assert_eq!(fabric.cumulative_sales(4, "liquid_bond").unwrap(), 0.0);

        let after_first = fabric.record_sale(4, "liquid_bond", 10.0).unwrap();
        let after_second = fabric.record_sale(4, "liquid_bond", 5.0).unwrap();
        assert!((after_first - 10.0).abs() < 1e-12);
        assert!((after_second - 15.0).abs() < 1e-12);
        assert!(after_second > after_first);
    }

    #[test]
    fn test_recent_sale_pressure_window() {
        let mut fabric = StateFabric::in_memory();
        fabric.record_sale(1, "x", 4.0).unwrap();
        fabric.record_sale(2, "x", 3.0).unwrap();
        fabric.record_sale(3, "x", 2.0).unwrap();
        fabric.record_sale(4, "x", 1.0).unwrap();

        // window 2..=4
        assert!((fabric.recent_sale_pressure(4, "x").unwrap() - 6.0).abs() < 1e-12);
        // window 0..=2 (saturating at zero)
        assert!((fabric.recent_sale_pressure(2, "x").unwrap() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_run_ids_are_monotone() {
        let mut fabric = StateFabric::in_memory();
        let first = fabric.next_run_id().unwrap();
        let second = fabric.next_run_id().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let mut fabric = StateFabric::in_memory();
        fabric
            .retrying(|b| b.rpush("stream:private:bank_00", "{not json"))
            .unwrap();
        fabric
            .publish_intent(&Intent::new(
                1,
                "bank_00",
                Payload::HoardLiquidity(HoardLiquidityPayload {
                    estimated_recovery: 0.0,
                }),
            ))
            .unwrap();
        let seen = fabric.drain_private_stream("bank_00").unwrap();
        assert_eq!(seen.len(), 1);
    }
}
