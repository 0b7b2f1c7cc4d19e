//! The auctioneer runs one step of the double auction:
//! `Idle -> Collecting -> {NoTrade -> Idle} | {Clearing -> Settling -> Idle}`.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::agents::{AgentRegistry, Wallet};
use crate::error::MarketError;
use crate::market::{
    Bid, ClearingResult, Collected, NetQuantities, NoTradeReason, Offer, PriceSummary, PricingRule,
    SettlementLedger, SettlementSummary, StepBook, Tolerances, TradePair, apply_market_rules,
    build_curve, detect_crossing,
};
use crate::measurements::Measurements;
use crate::types::{AgentId, Quantity, Step};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Tsify)]
pub enum StepPhase {
    #[default]
    Idle,
    Collecting,
    NoTrade,
    Clearing,
    Settling,
}

/// Everything a step produced, trade or not.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: Step,
    pub demand: Quantity,
    pub supply: Quantity,
    pub clearing: ClearingResult,
    pub trade_pairs: Vec<TradePair>,
    pub price_summary: Option<PriceSummary>,
    pub settlement: SettlementSummary,
    pub net_quantities: NetQuantities,
    pub no_trade: Option<NoTradeReason>,
}

impl StepOutcome {
    fn no_trade(step: Step, demand: Quantity, supply: Quantity, reason: NoTradeReason) -> Self {
        Self {
            step,
            demand,
            supply,
            clearing: ClearingResult::NoTrade,
            trade_pairs: Vec::new(),
            price_summary: None,
            settlement: SettlementSummary::default(),
            net_quantities: NetQuantities::new(),
            no_trade: Some(reason),
        }
    }

    pub fn traded(&self) -> bool {
        self.clearing.is_trade()
    }
}

// === AUCTIONEER ===

/// Market operator: owns the step's order buffer and the market-maker wallet.
#[derive(Debug, Clone)]
pub struct Auctioneer {
    pub id: AgentId,
    pub wallet: Wallet,
    pricing_rule: PricingRule,
    tolerances: Tolerances,
    snapshot_interval: Option<usize>,
    phase: StepPhase,
    book: Option<StepBook>,
}

impl Auctioneer {
    pub fn new(id: impl Into<AgentId>, pricing_rule: PricingRule, tolerances: Tolerances) -> Self {
        let id = id.into();
        Self {
            wallet: Wallet::new(id.clone()),
            id,
            pricing_rule,
            tolerances,
            snapshot_interval: None,
            phase: StepPhase::Idle,
            book: None,
        }
    }

    pub fn with_snapshot_interval(mut self, interval: Option<usize>) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn pricing_rule(&self) -> PricingRule {
        self.pricing_rule
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn open_step(&self) -> Option<Step> {
        self.book.as_ref().map(StepBook::step)
    }

    pub fn begin_step(&mut self, step: Step) -> Result<(), MarketError> {
        if let Some(open) = self.open_step() {
            return Err(MarketError::StepAlreadyOpen {
                open,
                requested: step,
            });
        }
        self.book = Some(StepBook::begin(step));
        self.phase = StepPhase::Collecting;
        Ok(())
    }

    pub fn submit_bid(&mut self, bid: Option<Bid>) -> Result<(), MarketError> {
        self.book
            .as_mut()
            .ok_or(MarketError::StepNotOpen)?
            .submit_bid(bid);
        Ok(())
    }

    pub fn submit_offer(&mut self, offer: Option<Offer>) -> Result<(), MarketError> {
        self.book
            .as_mut()
            .ok_or(MarketError::StepNotOpen)?
            .submit_offer(offer);
        Ok(())
    }

    /// Clear and settle the open step.
    ///
    /// The order buffer is consumed whatever happens; on error the auctioneer
    /// is back in `Idle` and the caller decides whether the run survives.
    pub fn run_step(
        &mut self,
        registry: &mut AgentRegistry,
        measurements: &mut Measurements,
    ) -> Result<StepOutcome, MarketError> {
        let book = self.book.take().ok_or(MarketError::StepNotOpen)?;
        let result = self.clear_book(book, registry, measurements);
        self.phase = StepPhase::Idle;
        result
    }

    fn clear_book(
        &mut self,
        book: StepBook,
        registry: &mut AgentRegistry,
        measurements: &mut Measurements,
    ) -> Result<StepOutcome, MarketError> {
        let step = book.step();
        measurements.record_participation(step, registry.participation());

        let orders = match book.collect()? {
            Collected::Ready(orders) => orders,
            Collected::NoTrade(reason) => {
                return Ok(self.skip(step, 0.0, 0.0, reason));
            }
        };

        let demand = orders.total_demand();
        let supply = orders.total_supply();

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "submissions",
            step = step,
            bids = orders.bids.len(),
            offers = orders.offers.len(),
            demand = demand,
            supply = supply,
        );

        // === CLEARING ===
        self.phase = StepPhase::Clearing;
        let sorted = orders.into_sorted();
        let curve = apply_market_rules(build_curve(&sorted), self.tolerances.quantity_epsilon)?;
        let crossing = detect_crossing(&curve)?;

        if self.snapshot_due(step) {
            measurements.record_curve(step, curve);
        }

        if !crossing.result.is_trade() {
            return Ok(self.skip(step, demand, supply, NoTradeReason::CurvesDoNotCross));
        }

        let outcome = self.pricing_rule.clear(&sorted, &crossing, self.tolerances)?;
        let Some(quantity) = outcome.result.quantity() else {
            return Ok(self.skip(step, demand, supply, NoTradeReason::NoTradePairs));
        };

        let matched = outcome.matched_quantity();
        let limit = demand.min(supply);
        if matched > limit + self.tolerances.quantity_epsilon {
            return Err(MarketError::ExcessMatch { matched, limit });
        }

        #[cfg(feature = "instrument")]
        {
            let price = outcome.result.price().unwrap_or_default();
            let (min, avg, max) = outcome
                .price_summary
                .map_or((price, price, price), |s| (s.min, s.avg, s.max));
            tracing::info!(
                target: "clearing",
                step = step,
                rule = self.pricing_rule.as_str(),
                quantity = quantity,
                price = price,
                price_min = min,
                price_avg = avg,
                price_max = max,
                turnover = outcome.turnover,
                pairs = outcome.trade_pairs.len(),
            );
            for pair in &outcome.trade_pairs {
                tracing::info!(
                    target: "trade",
                    step = step,
                    seller = pair.seller_id.as_str(),
                    buyer = pair.buyer_id.as_str(),
                    quantity = pair.quantity,
                    seller_revenue = pair.payment.seller_revenue(),
                    buyer_payment = pair.payment.buyer_payment(),
                    budget_balanced = pair.budget_balanced(),
                );
            }
        }

        // === SETTLEMENT ===
        self.phase = StepPhase::Settling;
        let mut ledger = SettlementLedger::open(registry, &mut self.wallet, step);
        let settled = ledger.settle(&outcome.trade_pairs, self.pricing_rule.settlement_policy());
        let net_quantities = ledger.close();
        let settlement = settled?;

        measurements.record_clearing(step, quantity, outcome.price_summary);
        measurements.record_household_demand(step, registry.household_demand(step));
        measurements.record_trades(step, &outcome.trade_pairs);
        measurements.record_net_quantities(step, &net_quantities);

        Ok(StepOutcome {
            step,
            demand,
            supply,
            clearing: outcome.result,
            trade_pairs: outcome.trade_pairs,
            price_summary: outcome.price_summary,
            settlement,
            net_quantities,
            no_trade: None,
        })
    }

    fn skip(&mut self, step: Step, demand: Quantity, supply: Quantity, reason: NoTradeReason) -> StepOutcome {
        self.phase = StepPhase::NoTrade;

        #[cfg(feature = "instrument")]
        tracing::warn!(
            target: "no_trade",
            step = step,
            reason = reason.as_str(),
            demand = demand,
            supply = supply,
        );

        StepOutcome::no_trade(step, demand, supply, reason)
    }

    fn snapshot_due(&self, step: Step) -> bool {
        self.snapshot_interval
            .is_some_and(|every| every > 0 && step % every == 0)
    }
}
