use thiserror::Error;

use crate::types::{AgentId, Quantity, Step};

/// Errors raised by the auction pipeline.
///
/// "No trade" is not an error; it is reported through `ClearingResult::NoTrade`.
/// Variants for which [`MarketError::is_fatal`] returns true indicate a defect in
/// curve construction, matching or settlement and invalidate the run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketError {
    // === INPUT & LIFECYCLE ===
    #[error("invalid {side} submission from {agent}: price={price}, quantity={quantity}")]
    InvalidSubmission {
        side: &'static str,
        agent: AgentId,
        price: f64,
        quantity: Quantity,
    },

    #[error("no step is open for submissions")]
    StepNotOpen,

    #[error("step {open} is still open; close it before starting step {requested}")]
    StepAlreadyOpen { open: Step, requested: Step },

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("agent {0} is already registered")]
    DuplicateAgent(AgentId),

    #[error("configuration error: {0}")]
    Config(String),

    // === CURVE DEFECTS ===
    #[error("self-trade segment for agent {agent} survived the market rules")]
    SelfTrade { agent: AgentId },

    #[error("zero-quantity segment at cumulative quantity {cumulative} survived the market rules")]
    ZeroQuantitySegment { cumulative: Quantity },

    #[error("curve of {segments} segments has no segment with both a bid and an offer side")]
    IncompleteCurve { segments: usize },

    #[error("curve is not ordered: segment {index} crosses after a non-crossing segment")]
    UnorderedCurve { index: usize },

    // === MATCHING DEFECTS ===
    #[error("matched quantity {matched} does not equal clearing quantity {clearing}")]
    MatchedQuantityMismatch { matched: Quantity, clearing: Quantity },

    #[error("matched quantity {matched} exceeds tradable quantity {limit}")]
    ExcessMatch { matched: Quantity, limit: Quantity },

    #[error("trade pair turnover {recorded} differs from expected turnover {expected}")]
    TurnoverMismatch { recorded: f64, expected: f64 },

    #[error("negative turnover {0}")]
    NegativeTurnover(f64),

    #[error("trade pair between {seller} and {buyer} has non-positive quantity {quantity}")]
    NonPositiveTradeQuantity {
        seller: AgentId,
        buyer: AgentId,
        quantity: Quantity,
    },

    // === SETTLEMENT DEFECTS ===
    #[error("malformed trade pair for {rule} settlement: {reason}")]
    MalformedTradePair { rule: &'static str, reason: String },

    #[error("buyer payment {buyer_payment} is below seller revenue {seller_revenue}")]
    BudgetImbalanceViolated {
        seller_revenue: f64,
        buyer_payment: f64,
    },
}

impl MarketError {
    /// True for internal-consistency violations that must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidSubmission { .. }
                | Self::StepNotOpen
                | Self::StepAlreadyOpen { .. }
                | Self::UnknownAgent(_)
                | Self::DuplicateAgent(_)
                | Self::Config(_)
        )
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
