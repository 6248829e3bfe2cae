//! Domain types (Bank, Intent, Beliefs, Loans, Market)

pub mod bank;
pub mod belief;
pub mod intent;
pub mod loan;
pub mod market;

pub use bank::{bank_id, bank_index_from_id, Bank, BeliefState};
pub use belief::{BetaBelief, NormalBelief};
pub use intent::{
    ActionType, BeliefSnapshot, Intent, IntentError, OtcContent, Payload, RiskPreference,
    Visibility,
};
pub use loan::{InterbankLoan, OtcLoan};
pub use market::MarketSnapshot;
