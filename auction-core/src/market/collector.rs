use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::MarketError;
use crate::types::Step;

use super::orders::{Bid, Offer, OrderBook};

// === NO-TRADE REASONS ===

/// Why a step ended without trade. All of these are normal outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Tsify)]
pub enum NoTradeReason {
    NoBids,
    NoOffers,
    NoBidsOrOffers,
    /// Every remaining bid is priced below its counterpart offer.
    CurvesDoNotCross,
    /// The pricing rule selected no trade pairs (e.g. McAfee trade reduction).
    NoTradePairs,
}

impl NoTradeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBids => "no_bids",
            Self::NoOffers => "no_offers",
            Self::NoBidsOrOffers => "no_bids_or_offers",
            Self::CurvesDoNotCross => "curves_do_not_cross",
            Self::NoTradePairs => "no_trade_pairs",
        }
    }
}

// === STEP BOOK ===

/// Raw submissions of one step.
///
/// A book is opened with [`StepBook::begin`] and consumed by [`StepBook::collect`],
/// so nothing submitted for one step can leak into the next.
#[derive(Debug, Clone, Default)]
pub struct StepBook {
    step: Step,
    bids: Vec<Option<Bid>>,
    offers: Vec<Option<Offer>>,
}

/// Result of filtering a step's submissions.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    NoTrade(NoTradeReason),
    Ready(OrderBook),
}

impl StepBook {
    pub fn begin(step: Step) -> Self {
        Self {
            step,
            bids: Vec::new(),
            offers: Vec::new(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Queue a bid; `None` is an agent's placeholder for "not trading".
    pub fn submit_bid(&mut self, bid: Option<Bid>) {
        self.bids.push(bid);
    }

    pub fn submit_offer(&mut self, offer: Option<Offer>) {
        self.offers.push(offer);
    }

    pub fn submitted(&self) -> usize {
        self.bids.len() + self.offers.len()
    }

    /// Strip placeholders, validate the rest and decide whether an auction can run.
    pub fn collect(self) -> Result<Collected, MarketError> {
        let bids: Vec<Bid> = self.bids.into_iter().flatten().collect();
        let offers: Vec<Offer> = self.offers.into_iter().flatten().collect();

        for bid in &bids {
            bid.validate()?;
        }
        for offer in &offers {
            offer.validate()?;
        }

        let collected = match (bids.is_empty(), offers.is_empty()) {
            (true, true) => Collected::NoTrade(NoTradeReason::NoBidsOrOffers),
            (true, false) => Collected::NoTrade(NoTradeReason::NoBids),
            (false, true) => Collected::NoTrade(NoTradeReason::NoOffers),
            (false, false) => Collected::Ready(OrderBook { bids, offers }),
        };
        Ok(collected)
    }
}
