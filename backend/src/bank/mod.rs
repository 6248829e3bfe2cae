//! Bank agent engine
//!
//! Drives one bank through its per-tick phases, in this fixed order:
//!
//! 1. **Ingest** — drain the margin-call inbox, read the previous tick's
//!    public broadcast (non-destructive), drain the private inbox, read the
//!    market snapshot and the global snapshot.
//! 2. **Belief update** — conjugate updates on the four private channels.
//! 3. **Risk compute** — expected loss, liquidity shortfall, urgencies.
//! 4. **Action selection** — expected-utility argmax over the eleven bank
//!    actions, ties broken by enumeration order.
//! 5. **Emit + self-execute** — route the intent via the fabric, then apply
//!    its balance-sheet effect to self and counterparty.
//! 6. **Loan aging** — OTC tenor countdown, interbank grace enforcement.
//! 7. **Default check** — liquidity ≤ 0 or capital ≤ 0 triggers default.
//!
//! Banks observe each other only through fabric snapshots, never through
//! live registry state; the bank registry is touched mutably only to apply
//! execution effects.

pub mod beliefs;
pub mod decision;
pub mod execution;

use log::debug;

use crate::ccp::Ccp;
use crate::fabric::{FabricError, StateFabric, SystemSnapshot};
use crate::models::bank::Bank;
use crate::models::intent::{ActionType, Intent, Payload};
use crate::models::market::MarketSnapshot;
use crate::orchestrator::SimulationConfig;
use crate::rng::RngManager;

/// Everything a bank ingested at the top of its step.
#[derive(Debug, Clone)]
pub struct Observations {
    /// Global snapshot written by the scheduler this tick
    pub snapshot: SystemSnapshot,
    /// Latest market data
    pub market: MarketSnapshot,
    /// Market depth parameter
    pub depth: f64,
    /// `DECLARE_DEFAULT` intents seen in last tick's public stream
    pub observed_defaults: usize,
    /// Public sale volume (standard + fire) seen in last tick's stream
    pub observed_sell_volume: f64,
    /// `FIRE_SALE_ASSET` intents seen in last tick's stream
    pub observed_fire_sales: usize,
}

/// Run one bank's full step. Returns the emitted action type, or `None`
/// for a defaulted bank (dead banks do nothing).
pub fn step(
    index: usize,
    banks: &mut [Bank],
    ccp: &mut Ccp,
    fabric: &mut StateFabric,
    rng: &mut RngManager,
    config: &SimulationConfig,
    tick: u64,
) -> Result<Option<ActionType>, FabricError> {
    if banks[index].defaulted {
        return Ok(None);
    }

    // Phase 1: ingest
    let obs = ingest(index, banks, fabric, tick)?;

    // Phase 2: belief update
    beliefs::update(&mut banks[index], &obs);

    // Phase 3: risk compute
    let risk = decision::RiskMetrics::compute(&banks[index], tick, config);

    // Phase 4: action selection
    let action = decision::choose_action(&banks[index], &obs, &risk, tick);
    let payload = decision::build_payload(action, &banks[index], &obs, &risk, config, rng, tick);

    // Phase 5: emit + self-execute
    let intent = Intent::new(tick, banks[index].id.clone(), payload)
        .with_beliefs(banks[index].beliefs.snapshot());
    debug!(
        "tick {}: {} chose {} (liq {:.1}, cap {:.1})",
        tick,
        banks[index].id,
        action.wire_name(),
        banks[index].liquidity,
        banks[index].capital
    );
    banks[index].last_intent = Some(intent.clone());
    banks[index].intents_emitted += 1;
    fabric.publish_intent(&intent)?;
    execution::execute(index, banks, ccp, fabric, tick, config, &obs, &intent.payload)?;

    // Phase 6: loan aging
    execution::age_loans(index, banks, tick);

    // Stress flag refresh after the tick's cash movements
    {
        let bank = &mut banks[index];
        bank.stressed = bank.liquidity < config.stress_threshold;
    }

    // Phase 7: default check
    if !banks[index].defaulted
        && (banks[index].liquidity <= 0.0 || banks[index].capital <= 0.0)
    {
        execution::default_bank(index, banks, ccp, tick);
    }

    Ok(Some(action))
}

/// Phase 1: pull everything the bank is allowed to see.
fn ingest(
    index: usize,
    banks: &mut [Bank],
    fabric: &mut StateFabric,
    tick: u64,
) -> Result<Observations, FabricError> {
    // Margin-call inbox: destructive drain, at-most-once
    let calls = fabric.drain_margin_calls(index)?;
    banks[index].margin_calls_processed += calls.len() as u64;
    banks[index].pending_margin_calls.extend(calls);

    // Previous tick's public broadcast (non-destructive fan-out)
    let broadcast = if tick > 1 {
        fabric.public_stream(tick - 1)?
    } else {
        Vec::new()
    };
    let mut observed_defaults = 0;
    let mut observed_sell_volume = 0.0;
    let mut observed_fire_sales = 0;
    for intent in &broadcast {
        match &intent.payload {
            Payload::DeclareDefault(_) => observed_defaults += 1,
            Payload::SellAssetStandard(p) => observed_sell_volume += p.amount,
            Payload::FireSaleAsset(p) => {
                observed_fire_sales += 1;
                observed_sell_volume += p.quantity;
            }
            _ => {}
        }
    }

    // Private inbox: destructive drain, exactly-once. The counterparty has
    // already applied effects (self-execution is authoritative), so these
    // are consumed as observations.
    let private = fabric.drain_private_stream(&banks[index].id)?;
    banks[index].private_intents_seen += private.len() as u64;

    let market = fabric.get_market_data()?;
    let snapshot = fabric.full_snapshot()?;
    let depth = fabric.market_depth()?;

    Ok(Observations {
        snapshot,
        market,
        depth,
        observed_defaults,
        observed_sell_volume,
        observed_fire_sales,
    })
}
