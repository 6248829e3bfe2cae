//! Intent protocol
//!
//! The typed message envelope exchanged by all agents. Every envelope
//! carries `{intent_id, tick, agent_id, action_type, visibility, payload}`
//! plus optional `belief_snapshot` and `risk_preference`. Payload fields
//! depend on the action type; the wire format is a self-describing JSON
//! object with exactly these field names.
//!
//! Action types are a closed enumeration: eleven bank actions plus the
//! CCP's `issue_margin_call` and the exchange's `update_market_data`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while decoding an intent envelope.
///
/// A malformed intent is logged and ignored by the receiving agent; it never
/// propagates past the fabric read.
#[derive(Debug, Error)]
pub enum IntentError {
    #[error("malformed {action} payload: {source}")]
    MalformedPayload {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Who can observe an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Broadcast to every bank at the next tick
    Public,
    /// Delivered exactly-once to the resolved target
    Private,
}

/// Closed enumeration of action types.
///
/// The first eleven variants are bank actions listed in decision order:
/// expected-utility ties are broken by this enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "REPAY_INTERBANK_LOAN")]
    RepayInterbankLoan,
    #[serde(rename = "DECLARE_DEFAULT")]
    DeclareDefault,
    #[serde(rename = "DEPOSIT_DEFAULT_FUND")]
    DepositDefaultFund,
    #[serde(rename = "PROVIDE_INTERBANK_CREDIT")]
    ProvideInterbankCredit,
    #[serde(rename = "FIRE_SALE_ASSET")]
    FireSaleAsset,
    #[serde(rename = "pay_margin_call")]
    PayMarginCall,
    #[serde(rename = "sell_asset_standard")]
    SellAssetStandard,
    #[serde(rename = "hoard_liquidity")]
    HoardLiquidity,
    #[serde(rename = "reduce_exposure")]
    ReduceExposure,
    #[serde(rename = "borrow")]
    Borrow,
    #[serde(rename = "route_otc_proposal")]
    RouteOtcProposal,
    #[serde(rename = "issue_margin_call")]
    IssueMarginCall,
    #[serde(rename = "update_market_data")]
    UpdateMarketData,
}

/// The eleven bank actions, in utility-table / tie-break order.
pub const BANK_ACTIONS: [ActionType; 11] = [
    ActionType::RepayInterbankLoan,
    ActionType::DeclareDefault,
    ActionType::DepositDefaultFund,
    ActionType::ProvideInterbankCredit,
    ActionType::FireSaleAsset,
    ActionType::PayMarginCall,
    ActionType::SellAssetStandard,
    ActionType::HoardLiquidity,
    ActionType::ReduceExposure,
    ActionType::Borrow,
    ActionType::RouteOtcProposal,
];

impl ActionType {
    /// Wire spelling of the action type.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ActionType::RepayInterbankLoan => "REPAY_INTERBANK_LOAN",
            ActionType::DeclareDefault => "DECLARE_DEFAULT",
            ActionType::DepositDefaultFund => "DEPOSIT_DEFAULT_FUND",
            ActionType::ProvideInterbankCredit => "PROVIDE_INTERBANK_CREDIT",
            ActionType::FireSaleAsset => "FIRE_SALE_ASSET",
            ActionType::PayMarginCall => "pay_margin_call",
            ActionType::SellAssetStandard => "sell_asset_standard",
            ActionType::HoardLiquidity => "hoard_liquidity",
            ActionType::ReduceExposure => "reduce_exposure",
            ActionType::Borrow => "borrow",
            ActionType::RouteOtcProposal => "route_otc_proposal",
            ActionType::IssueMarginCall => "issue_margin_call",
            ActionType::UpdateMarketData => "update_market_data",
        }
    }

    /// Fixed visibility of each action type.
    pub fn visibility(&self) -> Visibility {
        match self {
            ActionType::RouteOtcProposal
            | ActionType::Borrow
            | ActionType::ReduceExposure
            | ActionType::HoardLiquidity
            | ActionType::PayMarginCall
            | ActionType::ProvideInterbankCredit
            | ActionType::IssueMarginCall => Visibility::Private,
            ActionType::SellAssetStandard
            | ActionType::RepayInterbankLoan
            | ActionType::FireSaleAsset
            | ActionType::DeclareDefault
            | ActionType::DepositDefaultFund
            | ActionType::UpdateMarketData => Visibility::Public,
        }
    }
}

/// Inner terms of an OTC proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtcContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub interest_rate: f64,
    pub tenor_ticks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOtcProposalPayload {
    pub encrypted_content: OtcContent,
    pub target_agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowPayload {
    pub amount: f64,
    pub target_agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceExposurePayload {
    pub target_neighbor_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoardLiquidityPayload {
    pub estimated_recovery: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayMarginCallPayload {
    pub amount: f64,
    pub margin_call_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellAssetStandardPayload {
    pub asset_type: String,
    pub amount: f64,
    pub order_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvideInterbankCreditPayload {
    pub borrower_bank_id: String,
    pub principal: f64,
    pub interest_rate: f64,
    pub maturity_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepayInterbankLoanPayload {
    pub loan_id: String,
    pub principal: f64,
    pub interest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireSaleAssetPayload {
    pub exchange_id: String,
    pub asset_id: String,
    pub quantity: f64,
    pub max_acceptable_discount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclareDefaultPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositDefaultFundPayload {
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueMarginCallPayload {
    pub target_agent_id: String,
    pub margin_amount: f64,
    pub deadline_tick: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMarketDataPayload {
    pub new_volatility: f64,
    pub price_change_signal: f64,
}

/// Typed payload, one record per action type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    RouteOtcProposal(RouteOtcProposalPayload),
    Borrow(BorrowPayload),
    ReduceExposure(ReduceExposurePayload),
    HoardLiquidity(HoardLiquidityPayload),
    PayMarginCall(PayMarginCallPayload),
    SellAssetStandard(SellAssetStandardPayload),
    ProvideInterbankCredit(ProvideInterbankCreditPayload),
    RepayInterbankLoan(RepayInterbankLoanPayload),
    FireSaleAsset(FireSaleAssetPayload),
    DeclareDefault(DeclareDefaultPayload),
    DepositDefaultFund(DepositDefaultFundPayload),
    IssueMarginCall(IssueMarginCallPayload),
    UpdateMarketData(UpdateMarketDataPayload),
}

impl Payload {
    /// The action type this payload belongs to.
    pub fn action_type(&self) -> ActionType {
        match self {
            Payload::RouteOtcProposal(_) => ActionType::RouteOtcProposal,
            Payload::Borrow(_) => ActionType::Borrow,
            Payload::ReduceExposure(_) => ActionType::ReduceExposure,
            Payload::HoardLiquidity(_) => ActionType::HoardLiquidity,
            Payload::PayMarginCall(_) => ActionType::PayMarginCall,
            Payload::SellAssetStandard(_) => ActionType::SellAssetStandard,
            Payload::ProvideInterbankCredit(_) => ActionType::ProvideInterbankCredit,
            Payload::RepayInterbankLoan(_) => ActionType::RepayInterbankLoan,
            Payload::FireSaleAsset(_) => ActionType::FireSaleAsset,
            Payload::DeclareDefault(_) => ActionType::DeclareDefault,
            Payload::DepositDefaultFund(_) => ActionType::DepositDefaultFund,
            Payload::IssueMarginCall(_) => ActionType::IssueMarginCall,
            Payload::UpdateMarketData(_) => ActionType::UpdateMarketData,
        }
    }

    /// Serialize the payload fields as a bare JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::RouteOtcProposal(p) => serde_json::to_value(p),
            Payload::Borrow(p) => serde_json::to_value(p),
            Payload::ReduceExposure(p) => serde_json::to_value(p),
            Payload::HoardLiquidity(p) => serde_json::to_value(p),
            Payload::PayMarginCall(p) => serde_json::to_value(p),
            Payload::SellAssetStandard(p) => serde_json::to_value(p),
            Payload::ProvideInterbankCredit(p) => serde_json::to_value(p),
            Payload::RepayInterbankLoan(p) => serde_json::to_value(p),
            Payload::FireSaleAsset(p) => serde_json::to_value(p),
            Payload::DeclareDefault(p) => serde_json::to_value(p),
            Payload::DepositDefaultFund(p) => serde_json::to_value(p),
            Payload::IssueMarginCall(p) => serde_json::to_value(p),
            Payload::UpdateMarketData(p) => serde_json::to_value(p),
        }
    }

    /// Decode a payload object for the given action type.
    pub fn from_value(action: ActionType, value: Value) -> Result<Self, IntentError> {
        let wrap = |source| IntentError::MalformedPayload {
            action: action.wire_name(),
            source,
        };
        Ok(match action {
            ActionType::RouteOtcProposal => {
                Payload::RouteOtcProposal(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::Borrow => Payload::Borrow(serde_json::from_value(value).map_err(wrap)?),
            ActionType::ReduceExposure => {
                Payload::ReduceExposure(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::HoardLiquidity => {
                Payload::HoardLiquidity(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::PayMarginCall => {
                Payload::PayMarginCall(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::SellAssetStandard => {
                Payload::SellAssetStandard(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::ProvideInterbankCredit => {
                Payload::ProvideInterbankCredit(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::RepayInterbankLoan => {
                Payload::RepayInterbankLoan(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::FireSaleAsset => {
                Payload::FireSaleAsset(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::DeclareDefault => {
                Payload::DeclareDefault(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::DepositDefaultFund => {
                Payload::DepositDefaultFund(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::IssueMarginCall => {
                Payload::IssueMarginCall(serde_json::from_value(value).map_err(wrap)?)
            }
            ActionType::UpdateMarketData => {
                Payload::UpdateMarketData(serde_json::from_value(value).map_err(wrap)?)
            }
        })
    }
}

/// Private belief summary a bank may attach to an emitted intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefSnapshot {
    pub avg_neighbor_default_prob: f64,
    pub liquidity_stress_mu: f64,
    pub expected_margin_call_mu: f64,
    pub market_volatility_mu: f64,
}

/// Risk-preference summary a bank may attach to an emitted intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPreference {
    pub risk_aversion: f64,
}

/// The message envelope.
///
/// Intent records are immutable: created on emit, consumed from streams on
/// read. `intent_id` is a universally unique string.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub intent_id: String,
    pub tick: u64,
    pub agent_id: String,
    pub action_type: ActionType,
    pub visibility: Visibility,
    pub payload: Payload,
    pub belief_snapshot: Option<BeliefSnapshot>,
    pub risk_preference: Option<RiskPreference>,
}

impl Intent {
    /// Build an envelope around a payload. Visibility is fixed by the action
    /// type; the id is a fresh UUID.
    pub fn new(tick: u64, agent_id: impl Into<String>, payload: Payload) -> Self {
        let action_type = payload.action_type();
        Self {
            intent_id: Uuid::new_v4().to_string(),
            tick,
            agent_id: agent_id.into(),
            action_type,
            visibility: action_type.visibility(),
            payload,
            belief_snapshot: None,
            risk_preference: None,
        }
    }

    /// Attach a belief snapshot.
    pub fn with_beliefs(mut self, beliefs: BeliefSnapshot) -> Self {
        self.belief_snapshot = Some(beliefs);
        self
    }

    /// Attach a risk preference.
    pub fn with_risk_preference(mut self, pref: RiskPreference) -> Self {
        self.risk_preference = Some(pref);
        self
    }
}

impl Serialize for Intent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;

        let mut map = serde_json::Map::new();
        map.insert("intent_id".into(), Value::String(self.intent_id.clone()));
        map.insert("tick".into(), Value::from(self.tick));
        map.insert("agent_id".into(), Value::String(self.agent_id.clone()));
        map.insert(
            "action_type".into(),
            Value::String(self.action_type.wire_name().to_string()),
        );
        map.insert(
            "visibility".into(),
            serde_json::to_value(self.visibility).map_err(S::Error::custom)?,
        );
        map.insert(
            "payload".into(),
            self.payload.to_value().map_err(S::Error::custom)?,
        );
        if let Some(beliefs) = &self.belief_snapshot {
            map.insert(
                "belief_snapshot".into(),
                serde_json::to_value(beliefs).map_err(S::Error::custom)?,
            );
        }
        if let Some(pref) = &self.risk_preference {
            map.insert(
                "risk_preference".into(),
                serde_json::to_value(pref).map_err(S::Error::custom)?,
            );
        }
        Value::Object(map).serialize(serializer)
    }
}

#[derive(Deserialize)]
struct RawIntent {
    intent_id: String,
    tick: u64,
    agent_id: String,
    action_type: ActionType,
    visibility: Visibility,
    payload: Value,
    #[serde(default)]
    belief_snapshot: Option<BeliefSnapshot>,
    #[serde(default)]
    risk_preference: Option<RiskPreference>,
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = RawIntent::deserialize(deserializer)?;
        let payload = Payload::from_value(raw.action_type, raw.payload).map_err(D::Error::custom)?;
        Ok(Intent {
            intent_id: raw.intent_id,
            tick: raw.tick,
            agent_id: raw.agent_id,
            action_type: raw.action_type,
            visibility: raw.visibility,
            payload,
            belief_snapshot: raw.belief_snapshot,
            risk_preference: raw.risk_preference,
        })
    }
}
