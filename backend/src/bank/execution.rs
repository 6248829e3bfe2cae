//! Intent execution
//!
//! Applies an emitted intent's balance-sheet effect to the emitter and its
//! counterparty (self-execution is authoritative), ages loan books, and runs
//! the bank-side default subroutine.
//!
//! Hazardous transfers resolve to an explicit outcome sum type; only a
//! `Partial` or `Rejected` outcome on a borrow or repayment sets the
//! `missed_payment` flag.

use log::{debug, info};
use uuid::Uuid;

use crate::bank::Observations;
use crate::ccp::Ccp;
use crate::exchange;
use crate::fabric::{FabricError, StateFabric};
use crate::models::bank::{bank_index_from_id, Bank};
use crate::models::intent::Payload;
use crate::models::loan::{InterbankLoan, OtcLoan};
use crate::orchestrator::SimulationConfig;

/// Grace window (ticks past maturity) before a received interbank loan is
/// force-settled.
const REPAYMENT_GRACE_TICKS: u64 = 2;

/// Outcome of a hazardous transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Full amount moved
    Settled(f64),
    /// Only part of the obligation could be met
    Partial { paid: f64, shortfall: f64 },
    /// Nothing moved
    Rejected(&'static str),
}

/// Mutable references to two distinct banks in the registry.
fn pair_mut(banks: &mut [Bank], a: usize, b: usize) -> (&mut Bank, &mut Bank) {
    assert!(a != b, "pair_mut requires distinct indices");
    if a < b {
        let (left, right) = banks.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = banks.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// Resolve a counterparty id to a registry index distinct from `me`.
fn counterparty(banks: &[Bank], me: usize, id: &str) -> Option<usize> {
    let index = bank_index_from_id(id)?;
    if index == me || index >= banks.len() {
        return None;
    }
    Some(index)
}

/// Phase 5 (apply side): execute an intent against the registry.
///
/// The per-tick operating cost is charged and the `missed_payment` flag
/// reset before the action's own effect.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    index: usize,
    banks: &mut [Bank],
    ccp: &mut Ccp,
    fabric: &mut StateFabric,
    tick: u64,
    config: &SimulationConfig,
    obs: &Observations,
    payload: &Payload,
) -> Result<(), FabricError> {
    {
        let bank = &mut banks[index];
        bank.liquidity -= config.step_operating_cost;
        bank.missed_payment = false;
    }

    match payload {
        Payload::RouteOtcProposal(p) => {
            let amount = p.encrypted_content.amount;
            if let Some(target) = counterparty(banks, index, &p.target_agent_id) {
                if amount > 0.0 && banks[target].is_live() {
                    let (me, other) = pair_mut(banks, index, target);
                    me.liquidity -= amount;
                    other.liquidity += amount;
                    me.add_exposure(target, amount);
                    me.otc_loans_given.push(OtcLoan {
                        loan_id: Uuid::new_v4().to_string(),
                        target,
                        principal: amount,
                        interest_rate: p.encrypted_content.interest_rate,
                        remaining_ticks: p.encrypted_content.tenor_ticks,
                    });
                }
            }
        }
        Payload::Borrow(p) => {
            let outcome = execute_borrow(index, banks, p.target_agent_id.as_str());
            if !matches!(outcome, TransferOutcome::Settled(_)) {
                banks[index].missed_payment = true;
            }
        }
        Payload::ReduceExposure(p) => {
            if let Some(target) = bank_index_from_id(&p.target_neighbor_id) {
                let bank = &mut banks[index];
                if let Some(current) = bank.exposure.get_mut(&target) {
                    let cut = p.amount.min(*current).max(0.0);
                    *current -= cut;
                    bank.liquidity += 0.5 * cut;
                }
            }
        }
        Payload::HoardLiquidity(_) => {
            let bank = &mut banks[index];
            let mut recovered = 0.0;
            for exposure in bank.exposure.values_mut() {
                let cut = *exposure * 0.05;
                *exposure -= cut;
                recovered += 0.3 * cut;
            }
            bank.liquidity += recovered;
        }
        Payload::PayMarginCall(p) => {
            let bank = &mut banks[index];
            if let Some(pos) = bank
                .pending_margin_calls
                .iter()
                .position(|call| call.intent_id == p.margin_call_id)
            {
                let paid = p.amount.min(0.9 * bank.liquidity).max(0.0);
                bank.liquidity -= paid;
                bank.capital -= 0.1 * paid;
                bank.pending_margin_calls.remove(pos);
            }
        }
        Payload::SellAssetStandard(p) => {
            execute_asset_sale(index, banks, fabric, tick, obs, &p.asset_type, p.amount, false)?;
        }
        Payload::FireSaleAsset(p) => {
            execute_asset_sale(index, banks, fabric, tick, obs, &p.asset_id, p.quantity, true)?;
        }
        Payload::ProvideInterbankCredit(p) => {
            if let Some(borrower) = counterparty(banks, index, &p.borrower_bank_id) {
                let principal = p.principal.min(0.5 * banks[index].liquidity);
                if principal > 0.0 && banks[borrower].is_live() {
                    let loan = InterbankLoan {
                        loan_id: Uuid::new_v4().to_string(),
                        borrower_id: banks[borrower].id.clone(),
                        lender_id: banks[index].id.clone(),
                        principal,
                        interest_rate: p.interest_rate,
                        maturity_tick: p.maturity_tick,
                    };
                    let (lender, borrower_bank) = pair_mut(banks, index, borrower);
                    lender.liquidity -= principal;
                    borrower_bank.liquidity += principal;
                    lender.interbank_given.push(loan.clone());
                    borrower_bank.interbank_received.push(loan);
                }
            }
        }
        Payload::RepayInterbankLoan(p) => {
            let outcome = execute_repayment(index, banks, &p.loan_id);
            if matches!(
                outcome,
                TransferOutcome::Partial { .. } | TransferOutcome::Rejected(_)
            ) {
                banks[index].missed_payment = true;
            }
        }
        Payload::DeclareDefault(p) => {
            info!("tick {}: {} declares default ({})", tick, banks[index].id, p.reason);
            default_bank(index, banks, ccp, tick);
        }
        Payload::DepositDefaultFund(p) => {
            let bank = &mut banks[index];
            let amount = p.amount.min(0.5 * bank.liquidity).max(0.0);
            bank.liquidity -= amount;
            bank.default_fund_contribution += amount;
            ccp.accept_deposit(amount);
        }
        // CCP / exchange intents have no bank-side execution
        Payload::IssueMarginCall(_) | Payload::UpdateMarketData(_) => {}
    }
    Ok(())
}

/// Borrow from a lender: funds move only when the lender can spare a tenth
/// of its liquidity; tiny or impossible draws are rejected.
fn execute_borrow(index: usize, banks: &mut [Bank], lender_id: &str) -> TransferOutcome {
    let Some(lender) = counterparty(banks, index, lender_id) else {
        return TransferOutcome::Rejected("no lender");
    };
    if !banks[lender].is_live() {
        return TransferOutcome::Rejected("lender defaulted");
    }
    let amount = (banks[lender].liquidity * 0.1).min(10.0);
    if amount <= 1.0 {
        return TransferOutcome::Rejected("lender illiquid");
    }
    let (me, lender_bank) = pair_mut(banks, index, lender);
    lender_bank.liquidity -= amount;
    me.liquidity += amount;
    lender_bank.add_exposure(index, amount);
    TransferOutcome::Settled(amount)
}

/// Repay an interbank loan: pays up to 90% of own liquidity; the loan record
/// leaves both books regardless, and a partial payment is a missed payment.
fn execute_repayment(index: usize, banks: &mut [Bank], loan_id: &str) -> TransferOutcome {
    let Some(pos) = banks[index]
        .interbank_received
        .iter()
        .position(|l| l.loan_id == loan_id)
    else {
        return TransferOutcome::Rejected("unknown loan");
    };
    let loan = banks[index].interbank_received.remove(pos);
    let due = loan.repayment_due();

    let lender = bank_index_from_id(&loan.lender_id).filter(|&l| l != index && l < banks.len());
    let outcome = match lender {
        Some(lender) if banks[lender].is_live() => {
            let (me, lender_bank) = pair_mut(banks, index, lender);
            let paid = due.min(0.9 * me.liquidity).max(0.0);
            me.liquidity -= paid;
            lender_bank.liquidity += paid;
            if paid + 1e-9 < due {
                TransferOutcome::Partial {
                    paid,
                    shortfall: due - paid,
                }
            } else {
                TransferOutcome::Settled(paid)
            }
        }
        // counterparty defaulted mid-transfer: the executing side absorbs
        // the difference, no cascading retries
        _ => TransferOutcome::Rejected("lender gone"),
    };

    if let Some(lender) = lender {
        banks[lender].interbank_given.retain(|l| l.loan_id != loan_id);
    }
    outcome
}

/// Sell into the exchange at the impact-adjusted price.
#[allow(clippy::too_many_arguments)]
fn execute_asset_sale(
    index: usize,
    banks: &mut [Bank],
    fabric: &mut StateFabric,
    tick: u64,
    obs: &Observations,
    asset: &str,
    quantity: f64,
    fire_sale: bool,
) -> Result<(), FabricError> {
    let held = banks[index].holding(asset);
    let quantity = quantity.min(held).max(0.0);
    if quantity <= 0.0 {
        return Ok(());
    }
    let sale = exchange::execute_sale(
        fabric,
        tick,
        asset,
        quantity,
        fire_sale,
        obs.market.new_volatility,
        obs.depth,
    )?;
    let bank = &mut banks[index];
    if let Some(holding) = bank.assets.get_mut(asset) {
        *holding -= quantity;
    }
    bank.liquidity += sale.proceeds;
    debug!(
        "tick {}: {} sold {:.2} {} at {:.4} (fire={})",
        tick, bank.id, quantity, asset, sale.unit_price, fire_sale
    );
    Ok(())
}

/// Phase 6: age loan books.
///
/// OTC loans count down their tenor and settle (or half-recover) at zero;
/// received interbank loans past maturity plus grace are force-settled at up
/// to 80% of the borrower's liquidity.
pub fn age_loans(index: usize, banks: &mut [Bank], tick: u64) {
    // OTC tenor countdown on the lender's book
    let matured: Vec<OtcLoan> = {
        let bank = &mut banks[index];
        for loan in bank.otc_loans_given.iter_mut() {
            loan.remaining_ticks = loan.remaining_ticks.saturating_sub(1);
        }
        let (due, remaining): (Vec<OtcLoan>, Vec<OtcLoan>) = bank
            .otc_loans_given
            .drain(..)
            .partition(|loan| loan.remaining_ticks == 0);
        bank.otc_loans_given = remaining;
        due
    };

    for loan in matured {
        let target = loan.target;
        if target == index || target >= banks.len() || banks[target].defaulted {
            // the lender absorbs the loss; the stale exposure is unwound
            // through reduce_exposure / hoard_liquidity
            continue;
        }
        let due = loan.amount_due();
        let (lender, borrower) = pair_mut(banks, index, target);
        if borrower.liquidity >= due {
            borrower.liquidity -= due;
            lender.liquidity += due;
        } else {
            let recovered = (0.5 * borrower.liquidity).max(0.0);
            borrower.liquidity -= recovered;
            lender.liquidity += recovered;
            borrower.missed_payment = true;
        }
        // settlement retires the outstanding lent amount
        if let Some(exposure) = lender.exposure.get_mut(&target) {
            *exposure = (*exposure - loan.principal).max(0.0);
        }
    }

    // Force-settle received interbank loans past the grace window
    let overdue: Vec<InterbankLoan> = {
        let bank = &mut banks[index];
        let (late, remaining): (Vec<InterbankLoan>, Vec<InterbankLoan>) = bank
            .interbank_received
            .drain(..)
            .partition(|loan| loan.is_past_grace(tick, REPAYMENT_GRACE_TICKS));
        bank.interbank_received = remaining;
        late
    };

    for loan in overdue {
        let due = loan.repayment_due();
        let lender = bank_index_from_id(&loan.lender_id).filter(|&l| l != index && l < banks.len());
        match lender {
            Some(lender) if banks[lender].is_live() => {
                let (me, lender_bank) = pair_mut(banks, index, lender);
                let paid = due.min(0.8 * me.liquidity).max(0.0);
                me.liquidity -= paid;
                lender_bank.liquidity += paid;
            }
            // lender gone: the obligation lapses, nothing moves
            _ => {}
        }
        banks[index].missed_payment = true;
        if let Some(lender) = lender {
            banks[lender]
                .interbank_given
                .retain(|l| l.loan_id != loan.loan_id);
        }
    }
}

/// Default subroutine: terminal, idempotent.
///
/// Direct bilateral contagion hits each surviving creditor (30% of its
/// exposure from capital, 4.5% from liquidity), then the CCP waterfall
/// absorbs the LGD-weighted uncovered loss and mutualises the remainder.
/// The defaulter's balance sheet is zeroed in the same tick.
pub fn default_bank(index: usize, banks: &mut [Bank], ccp: &mut Ccp, tick: u64) {
    if banks[index].defaulted {
        return;
    }
    banks[index].defaulted = true;
    banks[index].stressed = true;
    info!("tick {}: {} defaulted", tick, banks[index].id);

    for j in 0..banks.len() {
        if j == index || banks[j].defaulted {
            continue;
        }
        let exposure = banks[j].exposure.get(&index).copied().unwrap_or(0.0);
        if exposure > 0.0 {
            banks[j].capital -= 0.3 * exposure;
            banks[j].liquidity -= 0.045 * exposure;
        }
    }

    ccp.handle_default(banks, index, tick);

    banks[index].zero_out();
}
