//! Risk metrics and expected-utility action selection
//!
//! The utility table is policy: the guards and coefficients below define
//! bank behaviour and are reproduced exactly by tests. A failed guard makes
//! an action unavailable (−∞); ties go to the earlier action in
//! `BANK_ACTIONS` order.

use crate::bank::Observations;
use crate::exchange::EXCHANGE_ID;
use crate::models::bank::{bank_id, Bank, LIQUID_BOND};
use crate::models::intent::{
    ActionType, BorrowPayload, DeclareDefaultPayload, DepositDefaultFundPayload,
    FireSaleAssetPayload, HoardLiquidityPayload, OtcContent, Payload, PayMarginCallPayload,
    ProvideInterbankCreditPayload, ReduceExposurePayload, RepayInterbankLoanPayload,
    RouteOtcProposalPayload, SellAssetStandardPayload, BANK_ACTIONS,
};
use crate::orchestrator::SimulationConfig;
use crate::rng::RngManager;

/// Loss given default on bilateral exposure.
pub const LGD: f64 = 0.6;

/// OTC proposal terms offered by liquid banks.
const OTC_RATE: f64 = 0.05;
const OTC_TENOR_TICKS: u32 = 6;
/// Interbank credit matures five ticks out.
const INTERBANK_TENOR: u64 = 5;

/// Per-tick risk picture for one bank.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskMetrics {
    /// Σ PD(neighbour) · LGD · exposure
    pub expected_loss: f64,
    /// max(0, min_liquidity + E[margin] − liquidity)
    pub liquidity_shortfall: f64,
    /// Total margin due / max(liquidity, 1)
    pub margin_urgency: f64,
    /// Total repayment due / max(liquidity, 1)
    pub repay_urgency: f64,
    pub total_margin_due: f64,
    pub total_repayment_due: f64,
}

impl RiskMetrics {
    /// Phase 3: compute the risk picture from the post-update beliefs.
    pub fn compute(bank: &Bank, tick: u64, config: &SimulationConfig) -> Self {
        let expected_loss: f64 = bank
            .exposure
            .iter()
            .map(|(&neighbor, &exposure)| bank.beliefs.default_prob(neighbor) * LGD * exposure)
            .sum();

        let expected_margin = bank.beliefs.margin_call.mean();
        let liquidity_shortfall =
            (config.min_liquidity + expected_margin - bank.liquidity).max(0.0);

        let total_margin_due = bank.total_margin_due();
        let margin_urgency = total_margin_due / bank.liquidity.max(1.0);

        let total_repayment_due = bank.total_repayment_due(tick);
        let repay_urgency = total_repayment_due / bank.liquidity.max(1.0);

        Self {
            expected_loss,
            liquidity_shortfall,
            margin_urgency,
            repay_urgency,
            total_margin_due,
            total_repayment_due,
        }
    }
}

/// Neighbours (by belief-channel key) the snapshot shows as not defaulted.
pub fn live_neighbors(bank: &Bank, obs: &Observations) -> Vec<usize> {
    bank.beliefs
        .neighbor_default
        .keys()
        .copied()
        .filter(|n| {
            obs.snapshot
                .banks
                .get(n)
                .map(|view| !view.defaulted)
                .unwrap_or(false)
        })
        .collect()
}

/// Utility of each bank action this tick, in tie-break order.
pub fn compute_utilities(
    bank: &Bank,
    obs: &Observations,
    risk: &RiskMetrics,
    tick: u64,
) -> Vec<(ActionType, f64)> {
    let liq = bank.liquidity;
    let cap = bank.capital;
    let vol = obs.market.new_volatility;
    let stress = bank.beliefs.liquidity_stress.mean();
    let expected_margin = bank.beliefs.margin_call.mean();
    let shortfall = risk.liquidity_shortfall;
    let live = live_neighbors(bank, obs);

    BANK_ACTIONS
        .iter()
        .map(|&action| {
            let utility = match action {
                ActionType::RepayInterbankLoan => {
                    if bank.loans_due(tick).is_empty() {
                        f64::NEG_INFINITY
                    } else {
                        60.0 + 20.0 * risk.repay_urgency
                    }
                }
                ActionType::DeclareDefault => {
                    if liq < 5.0 && cap < 10.0 {
                        let recovery_prob = (liq / 50.0 + cap / 100.0).max(0.0);
                        ((1.0 - recovery_prob) * 30.0 - 15.0).max(0.0)
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                ActionType::DepositDefaultFund => {
                    if liq > 80.0 && stress < 0.2 && !bank.stressed {
                        5.0 + (liq - 80.0) * 0.1
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                ActionType::ProvideInterbankCredit => {
                    if !live.is_empty() && liq > 100.0 {
                        ((liq - 100.0) * 0.3 - 0.5 * risk.expected_loss - 5.0 * stress).max(0.0)
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                ActionType::FireSaleAsset => {
                    let distressed =
                        shortfall > 5.0 || risk.margin_urgency > 0.5 || liq < 15.0;
                    if bank.total_assets() > 0.0 && distressed {
                        5.0 * shortfall
                            + 4.0 * risk.margin_urgency
                            + ((20.0 - liq) * 0.8).max(0.0)
                            + 2.0 * vol
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                ActionType::PayMarginCall => {
                    if bank.pending_margin_calls.is_empty() {
                        f64::NEG_INFINITY
                    } else {
                        50.0 + 20.0 * risk.margin_urgency
                    }
                }
                ActionType::SellAssetStandard => {
                    if bank.holding(LIQUID_BOND) > 0.0 {
                        3.0 * shortfall
                            + 2.0 * vol
                            + 1.5 * risk.margin_urgency
                            + ((30.0 - liq) * 0.3).max(0.0)
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                ActionType::HoardLiquidity => 2.0 * shortfall + 3.0 * stress + 1.0 * vol,
                ActionType::ReduceExposure => {
                    1.5 * risk.expected_loss + 1.0 * expected_margin + 0.5 * vol
                }
                ActionType::Borrow => {
                    if cap / liq.max(1.0) > 1.0 && !live.is_empty() {
                        ((40.0 - liq) * 0.5).max(0.0)
                    } else {
                        0.0
                    }
                }
                ActionType::RouteOtcProposal => {
                    ((liq - 80.0) * 0.4
                        - risk.expected_loss
                        - 10.0 * stress
                        - 5.0 * vol)
                        .max(0.0)
                }
                // CCP / exchange actions are never candidates for a bank
                _ => f64::NEG_INFINITY,
            };
            (action, utility)
        })
        .collect()
}

/// Phase 4: argmax with ties broken by enumeration order.
pub fn choose_action(bank: &Bank, obs: &Observations, risk: &RiskMetrics, tick: u64) -> ActionType {
    let utilities = compute_utilities(bank, obs, risk, tick);
    let mut best = utilities[0];
    for candidate in &utilities[1..] {
        if candidate.1 > best.1 {
            best = *candidate;
        }
    }
    best.0
}

/// Concretize the chosen action into a payload.
///
/// Counterparty picks are seeded draws over live neighbours; amounts follow
/// the sizing rules of the decision engine. A pick that cannot be satisfied
/// (no live neighbour, empty book) degrades to a self-targeted zero-amount
/// payload whose execution is a no-op.
pub fn build_payload(
    action: ActionType,
    bank: &Bank,
    obs: &Observations,
    risk: &RiskMetrics,
    config: &SimulationConfig,
    rng: &mut RngManager,
    tick: u64,
) -> Payload {
    let live = live_neighbors(bank, obs);
    match action {
        ActionType::RepayInterbankLoan => {
            let loan = bank
                .loans_due(tick)
                .first()
                .cloned()
                .cloned()
                .expect("repay guard requires a due loan");
            Payload::RepayInterbankLoan(RepayInterbankLoanPayload {
                loan_id: loan.loan_id.clone(),
                principal: loan.principal,
                interest: loan.interest(),
            })
        }
        ActionType::DeclareDefault => Payload::DeclareDefault(DeclareDefaultPayload {
            reason: "liquidity_and_capital_exhausted".to_string(),
        }),
        ActionType::DepositDefaultFund => Payload::DepositDefaultFund(DepositDefaultFundPayload {
            amount: bank.liquidity * config.default_fund_rate,
        }),
        ActionType::ProvideInterbankCredit => {
            let borrower = live[rng.choice(live.len())];
            Payload::ProvideInterbankCredit(ProvideInterbankCreditPayload {
                borrower_bank_id: bank_id(borrower),
                principal: (bank.liquidity * 0.1).min(15.0),
                interest_rate: 0.03 + 0.05 * obs.market.new_volatility,
                maturity_tick: tick + INTERBANK_TENOR,
            })
        }
        ActionType::FireSaleAsset => {
            // largest holding takes the hit
            let (asset, holding) = bank
                .assets
                .iter()
                .fold(("", 0.0), |acc, (name, &qty)| {
                    if qty > acc.1 {
                        (name.as_str(), qty)
                    } else {
                        acc
                    }
                });
            let needed = (risk.liquidity_shortfall + risk.total_margin_due).max(5.0);
            Payload::FireSaleAsset(FireSaleAssetPayload {
                exchange_id: EXCHANGE_ID.to_string(),
                asset_id: asset.to_string(),
                quantity: needed.min(holding),
                max_acceptable_discount: 0.5,
            })
        }
        ActionType::PayMarginCall => {
            let call = bank
                .pending_margin_calls
                .first()
                .expect("pay guard requires a pending call");
            let amount = match &call.payload {
                Payload::IssueMarginCall(p) => p.margin_amount,
                _ => 0.0,
            };
            Payload::PayMarginCall(PayMarginCallPayload {
                amount,
                margin_call_id: call.intent_id.clone(),
            })
        }
        ActionType::SellAssetStandard => Payload::SellAssetStandard(SellAssetStandardPayload {
            asset_type: LIQUID_BOND.to_string(),
            amount: risk
                .liquidity_shortfall
                .max(5.0)
                .min(bank.holding(LIQUID_BOND)),
            order_type: "market".to_string(),
        }),
        ActionType::HoardLiquidity => Payload::HoardLiquidity(HoardLiquidityPayload {
            estimated_recovery: bank.total_exposure() * 0.05 * 0.3,
        }),
        ActionType::ReduceExposure => {
            // unwind the edge with the highest default belief
            let riskiest = bank
                .exposure
                .iter()
                .fold(None::<(usize, f64)>, |acc, (&n, _)| {
                    let pd = bank.beliefs.default_prob(n);
                    match acc {
                        Some((_, best)) if best >= pd => acc,
                        _ => Some((n, pd)),
                    }
                });
            match riskiest {
                Some((neighbor, _)) => Payload::ReduceExposure(ReduceExposurePayload {
                    target_neighbor_id: bank_id(neighbor),
                    amount: bank.exposure[&neighbor] * 0.2,
                }),
                None => Payload::ReduceExposure(ReduceExposurePayload {
                    target_neighbor_id: bank.id.clone(),
                    amount: 0.0,
                }),
            }
        }
        ActionType::Borrow => match live.as_slice() {
            [] => Payload::Borrow(BorrowPayload {
                amount: 0.0,
                target_agent_id: bank.id.clone(),
            }),
            candidates => {
                let lender = candidates[rng.choice(candidates.len())];
                let lender_liquidity = obs
                    .snapshot
                    .banks
                    .get(&lender)
                    .map(|view| view.liquidity)
                    .unwrap_or(0.0);
                Payload::Borrow(BorrowPayload {
                    amount: (lender_liquidity * 0.1).min(10.0),
                    target_agent_id: bank_id(lender),
                })
            }
        },
        ActionType::RouteOtcProposal => {
            let target = if live.is_empty() {
                bank.id.clone()
            } else {
                bank_id(live[rng.choice(live.len())])
            };
            Payload::RouteOtcProposal(RouteOtcProposalPayload {
                encrypted_content: OtcContent {
                    kind: "otc_loan".to_string(),
                    amount: if target == bank.id {
                        0.0
                    } else {
                        (bank.liquidity * 0.1).min(15.0)
                    },
                    interest_rate: OTC_RATE,
                    tenor_ticks: OTC_TENOR_TICKS,
                },
                target_agent_id: target,
            })
        }
        other => unreachable!("{:?} is not a bank action", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{BankStateView, SystemSnapshot};
    use crate::models::intent::{Intent, IssueMarginCallPayload};
    use crate::models::loan::InterbankLoan;
    use crate::models::market::MarketSnapshot;

    fn observations() -> Observations {
        Observations {
            snapshot: SystemSnapshot::default(),
            market: MarketSnapshot {
                new_volatility: 0.12,
                price_change_signal: 0.0,
            },
            depth: 100.0,
            observed_defaults: 0,
            observed_sell_volume: 0.0,
            observed_fire_sales: 0,
        }
    }

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    fn utility_of(
        bank: &Bank,
        obs: &Observations,
        tick: u64,
        action: ActionType,
    ) -> f64 {
        let risk = RiskMetrics::compute(bank, tick, &config());
        compute_utilities(bank, obs, &risk, tick)
            .into_iter()
            .find(|(a, _)| *a == action)
            .unwrap()
            .1
    }

    #[test]
    fn test_repay_guard_requires_due_loan() {
        let mut bank = Bank::new(0, 50.0, 100.0, 50.0, 20.0);
        let obs = observations();
        assert_eq!(
            utility_of(&bank, &obs, 5, ActionType::RepayInterbankLoan),
            f64::NEG_INFINITY
        );

        bank.interbank_received.push(InterbankLoan {
            loan_id: "l".to_string(),
            borrower_id: "bank_00".to_string(),
            lender_id: "bank_01".to_string(),
            principal: 20.0,
            interest_rate: 0.05,
            maturity_tick: 5,
        });
        let u = utility_of(&bank, &obs, 5, ActionType::RepayInterbankLoan);
        // 60 + 20 * (21 / 50)
        assert!((u - (60.0 + 20.0 * 21.0 / 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_repay_dominates_when_due() {
        let mut bank = Bank::new(0, 100.0, 100.0, 50.0, 20.0);
        bank.interbank_received.push(InterbankLoan {
            loan_id: "l".to_string(),
            borrower_id: "bank_00".to_string(),
            lender_id: "bank_01".to_string(),
            principal: 20.0,
            interest_rate: 0.05,
            maturity_tick: 3,
        });
        let obs = observations();
        let risk = RiskMetrics::compute(&bank, 3, &config());
        assert_eq!(
            choose_action(&bank, &obs, &risk, 3),
            ActionType::RepayInterbankLoan
        );
    }

    #[test]
    fn test_declare_default_guard_and_value() {
        let bank = Bank::new(0, 3.0, 5.0, 0.0, 0.0);
        let obs = observations();
        let u = utility_of(&bank, &obs, 1, ActionType::DeclareDefault);
        // recovery = 3/50 + 5/100 = 0.11
        assert!((u - ((1.0 - 0.11) * 30.0 - 15.0)).abs() < 1e-9);

        let healthy = Bank::new(0, 50.0, 100.0, 0.0, 0.0);
        assert_eq!(
            utility_of(&healthy, &obs, 1, ActionType::DeclareDefault),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_fire_sale_unavailable_without_assets() {
        let mut bank = Bank::new(0, 5.0, 50.0, 0.0, 0.0);
        bank.beliefs.margin_call = crate::models::belief::NormalBelief::new(10.0, 1.0);
        let obs = observations();
        // liq < 15 so the distress leg holds, but total assets are zero
        assert_eq!(
            utility_of(&bank, &obs, 1, ActionType::FireSaleAsset),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_fire_sale_guard_on_low_liquidity() {
        let bank = Bank::new(0, 10.0, 50.0, 30.0, 10.0);
        let obs = observations();
        let u = utility_of(&bank, &obs, 1, ActionType::FireSaleAsset);
        assert!(u.is_finite());
        assert!(u > 0.0);
    }

    #[test]
    fn test_pay_margin_call_guard() {
        let mut bank = Bank::new(0, 50.0, 100.0, 50.0, 20.0);
        let obs = observations();
        assert_eq!(
            utility_of(&bank, &obs, 1, ActionType::PayMarginCall),
            f64::NEG_INFINITY
        );

        bank.pending_margin_calls.push(Intent::new(
            1,
            "ccp_01",
            Payload::IssueMarginCall(IssueMarginCallPayload {
                target_agent_id: "bank_00".to_string(),
                margin_amount: 25.0,
                deadline_tick: 3,
                reason: "exposure_ratio_breach".to_string(),
            }),
        ));
        let u = utility_of(&bank, &obs, 1, ActionType::PayMarginCall);
        // 50 + 20 * (25 / 50)
        assert!((u - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_borrow_requires_capital_ratio_and_lender() {
        let mut obs = observations();
        obs.snapshot.n_banks = 2;
        obs.snapshot.banks.insert(
            1,
            BankStateView {
                liquidity: 100.0,
                capital: 100.0,
                ..Default::default()
            },
        );

        // capital ratio over 1 but no known neighbour: falls to the zero branch
        let isolated = Bank::new(0, 10.0, 50.0, 0.0, 0.0);
        assert_eq!(utility_of(&isolated, &obs, 1, ActionType::Borrow), 0.0);

        let mut connected = Bank::new(0, 10.0, 50.0, 0.0, 0.0);
        connected
            .beliefs
            .neighbor_default
            .insert(1, crate::models::belief::BetaBelief::prior());
        let u = utility_of(&connected, &obs, 1, ActionType::Borrow);
        assert!((u - (40.0 - 10.0) * 0.5).abs() < 1e-9);

        // healthy capital ratio: zero utility
        let liquid = Bank::new(0, 100.0, 50.0, 0.0, 0.0);
        assert_eq!(utility_of(&liquid, &obs, 1, ActionType::Borrow), 0.0);
    }

    #[test]
    fn test_otc_utility_floors_at_zero() {
        let poor = Bank::new(0, 20.0, 50.0, 0.0, 0.0);
        let obs = observations();
        assert_eq!(utility_of(&poor, &obs, 1, ActionType::RouteOtcProposal), 0.0);
    }

    #[test]
    fn test_ties_break_by_enumeration_order() {
        // a bank with nothing going on: hoard, reduce, borrow and otc can
        // all be near zero; hoard comes first among the tied actions
        let mut bank = Bank::new(0, 50.0, 40.0, 0.0, 0.0);
        bank.beliefs.liquidity_stress = crate::models::belief::NormalBelief::new(0.0, 1.0);
        bank.beliefs.margin_call = crate::models::belief::NormalBelief::new(0.0, 1.0);
        let mut obs = observations();
        obs.market.new_volatility = 0.0;
        let risk = RiskMetrics::compute(&bank, 1, &config());
        // shortfall = max(0, 25 + 0 - 50) = 0, so hoard = 0, reduce = 0,
        // borrow = 0, otc = 0; the earliest zero-utility action wins
        assert_eq!(choose_action(&bank, &obs, &risk, 1), ActionType::HoardLiquidity);
    }

    #[test]
    fn test_risk_metrics_expected_loss() {
        let mut bank = Bank::new(0, 50.0, 100.0, 0.0, 0.0);
        bank.add_exposure(1, 10.0);
        bank.add_exposure(2, 20.0);
        bank.beliefs
            .neighbor_default
            .insert(1, crate::models::belief::BetaBelief::new(1.0, 9.0));
        bank.beliefs
            .neighbor_default
            .insert(2, crate::models::belief::BetaBelief::new(5.0, 5.0));
        let obs = observations();
        let risk = RiskMetrics::compute(&bank, 1, &config());
        let expected = 0.1 * LGD * 10.0 + 0.5 * LGD * 20.0;
        assert!((risk.expected_loss - expected).abs() < 1e-9);
    }

    #[test]
    fn test_build_fire_sale_payload_targets_largest_holding() {
        let mut bank = Bank::new(0, 5.0, 50.0, 10.0, 40.0);
        bank.beliefs.margin_call = crate::models::belief::NormalBelief::new(0.0, 1.0);
        let obs = observations();
        let risk = RiskMetrics::compute(&bank, 1, &config());
        let mut rng = RngManager::new(1);
        let payload =
            build_payload(ActionType::FireSaleAsset, &bank, &obs, &risk, &config(), &mut rng, 1);
        match payload {
            Payload::FireSaleAsset(p) => {
                assert_eq!(p.asset_id, "illiquid_asset");
                assert!(p.quantity > 0.0 && p.quantity <= 40.0);
                assert_eq!(p.exchange_id, EXCHANGE_ID);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_build_reduce_targets_riskiest_neighbor() {
        let mut bank = Bank::new(0, 50.0, 100.0, 0.0, 0.0);
        bank.add_exposure(1, 10.0);
        bank.add_exposure(2, 10.0);
        bank.beliefs
            .neighbor_default
            .insert(1, crate::models::belief::BetaBelief::new(1.0, 9.0));
        bank.beliefs
            .neighbor_default
            .insert(2, crate::models::belief::BetaBelief::new(8.0, 2.0));
        let obs = observations();
        let risk = RiskMetrics::compute(&bank, 1, &config());
        let mut rng = RngManager::new(1);
        let payload =
            build_payload(ActionType::ReduceExposure, &bank, &obs, &risk, &config(), &mut rng, 1);
        match payload {
            Payload::ReduceExposure(p) => {
                assert_eq!(p.target_neighbor_id, "bank_02");
                assert!((p.amount - 2.0).abs() < 1e-9);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
