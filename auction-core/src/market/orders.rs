use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::MarketError;
use crate::types::{AgentId, Price, Quantity};

// === BIDS & OFFERS ===

/// A buyer's willingness to pay `price` per unit for up to `quantity` units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Bid {
    pub price: Price,
    pub quantity: Quantity,
    pub buyer_id: AgentId,
}

/// A seller's ask of `price` per unit for up to `quantity` units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Offer {
    pub price: Price,
    pub quantity: Quantity,
    pub seller_id: AgentId,
}

impl Bid {
    pub fn new(price: Price, quantity: Quantity, buyer_id: impl Into<AgentId>) -> Self {
        Self {
            price,
            quantity,
            buyer_id: buyer_id.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), MarketError> {
        validate_submission(Side::Buy, &self.buyer_id, self.price, self.quantity)
    }
}

impl Offer {
    pub fn new(price: Price, quantity: Quantity, seller_id: impl Into<AgentId>) -> Self {
        Self {
            price,
            quantity,
            seller_id: seller_id.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), MarketError> {
        validate_submission(Side::Sell, &self.seller_id, self.price, self.quantity)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "bid",
            Side::Sell => "offer",
        }
    }
}

fn validate_submission(
    side: Side,
    agent: &AgentId,
    price: Price,
    quantity: Quantity,
) -> Result<(), MarketError> {
    if price.is_finite() && quantity.is_finite() && quantity >= 0.0 {
        return Ok(());
    }
    Err(MarketError::InvalidSubmission {
        side: side.as_str(),
        agent: agent.clone(),
        price,
        quantity,
    })
}

// === ORDER BOOK ===

/// Bids and offers of one step with placeholders already stripped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    pub bids: Vec<Bid>,
    pub offers: Vec<Offer>,
}

impl OrderBook {
    pub fn total_demand(&self) -> Quantity {
        self.bids.iter().map(|b| b.quantity).sum()
    }

    pub fn total_supply(&self) -> Quantity {
        self.offers.iter().map(|o| o.quantity).sum()
    }

    /// Sort bids descending and offers ascending by price.
    ///
    /// Both sorts are stable: equal prices keep submission order.
    pub fn into_sorted(mut self) -> SortedBook {
        self.bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        self.offers.sort_by(|a, b| a.price.total_cmp(&b.price));
        SortedBook {
            bids: self.bids,
            offers: self.offers,
        }
    }
}

/// Bids in descending and offers in ascending price order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedBook {
    pub bids: Vec<Bid>,
    pub offers: Vec<Offer>,
}

impl SortedBook {
    pub fn total_demand(&self) -> Quantity {
        self.bids.iter().map(|b| b.quantity).sum()
    }

    pub fn total_supply(&self) -> Quantity {
        self.offers.iter().map(|o| o.quantity).sum()
    }
}
