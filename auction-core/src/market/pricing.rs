//! Trade-pair construction for the configured pricing rule.
//!
//! Crossing detection fixes the clearing point once; each rule then turns the
//! sorted book and the comparable curve into concrete seller/buyer matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::MarketError;
use crate::types::{AgentId, Price, Quantity};

use super::clearing::{Clearance, ClearingResult, Crossing};
use super::curve::CurveSegment;
use super::orders::SortedBook;
use super::settlement::SettlementPolicy;

// === PRICING RULE ===

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
pub enum PricingRule {
    /// Every match settles at the uniform clearing price.
    #[default]
    #[serde(rename = "pac")]
    PayAsClear,
    /// Every crossing segment settles at its own bid price.
    #[serde(rename = "pab")]
    PayAsBid,
    /// Trade reduction; may leave a residual with the market maker.
    #[serde(rename = "mcafee")]
    McAfee,
}

impl PricingRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PayAsClear => "pac",
            Self::PayAsBid => "pab",
            Self::McAfee => "mcafee",
        }
    }

    pub fn settlement_policy(self) -> SettlementPolicy {
        match self {
            Self::PayAsClear | Self::PayAsBid => SettlementPolicy::BudgetBalanced,
            Self::McAfee => SettlementPolicy::BudgetImbalanced,
        }
    }

    /// Build trade pairs for a detected crossing.
    ///
    /// `book` must be the same sorted book the crossing's curve was built from.
    pub fn clear(
        self,
        book: &SortedBook,
        crossing: &Crossing,
        tolerances: Tolerances,
    ) -> Result<ClearingOutcome, MarketError> {
        let ClearingResult::Cleared { quantity, price, .. } = crossing.result else {
            return Ok(ClearingOutcome::no_trade());
        };

        let (result, trade_pairs) = match self {
            Self::PayAsClear => (
                crossing.result,
                pay_as_clear(book, quantity, price, tolerances)?,
            ),
            Self::PayAsBid => (
                crossing.result,
                pay_as_bid(&crossing.curve, quantity, tolerances.quantity_epsilon),
            ),
            Self::McAfee => mcafee(crossing),
        };

        if trade_pairs.is_empty() {
            return Ok(ClearingOutcome::no_trade());
        }

        let policy = self.settlement_policy();
        for pair in &trade_pairs {
            pair.validate(self, policy)?;
        }

        let turnover: f64 = trade_pairs.iter().map(|p| p.payment.buyer_payment()).sum();
        if turnover < 0.0 {
            return Err(MarketError::NegativeTurnover(turnover));
        }

        Ok(ClearingOutcome {
            result,
            price_summary: PriceSummary::from_pairs(&trade_pairs),
            trade_pairs,
            turnover,
        })
    }
}

impl fmt::Display for PricingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PricingRule {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pac" | "pay_as_clear" => Ok(Self::PayAsClear),
            "pab" | "pay_as_bid" => Ok(Self::PayAsBid),
            "mcafee" => Ok(Self::McAfee),
            other => Err(MarketError::Config(format!("unknown pricing rule `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub quantity_epsilon: Quantity,
    /// Allowed gap between recorded PAC payments and quantity * price.
    pub turnover_tolerance: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            quantity_epsilon: 1e-9,
            turnover_tolerance: 0.01,
        }
    }
}

// === TRADE PAIRS ===

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Tsify)]
pub enum Payment {
    /// Buyer pays exactly what the seller receives.
    Balanced(f64),
    Imbalanced {
        seller_revenue: f64,
        buyer_payment: f64,
    },
}

impl Payment {
    pub fn seller_revenue(&self) -> f64 {
        match *self {
            Self::Balanced(amount) => amount,
            Self::Imbalanced { seller_revenue, .. } => seller_revenue,
        }
    }

    pub fn buyer_payment(&self) -> f64 {
        match *self {
            Self::Balanced(amount) => amount,
            Self::Imbalanced { buyer_payment, .. } => buyer_payment,
        }
    }

    /// What the buyer pays on top of the seller's revenue.
    pub fn residual(&self) -> f64 {
        self.buyer_payment() - self.seller_revenue()
    }

    pub fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
pub struct TradePair {
    pub seller_id: AgentId,
    pub buyer_id: AgentId,
    pub quantity: Quantity,
    pub payment: Payment,
}

impl TradePair {
    pub fn budget_balanced(&self) -> bool {
        self.payment.is_balanced()
    }

    /// Price per unit; the mean of both sides when budget-imbalanced.
    pub fn unit_price(&self) -> Price {
        let total = match self.payment {
            Payment::Balanced(amount) => amount,
            Payment::Imbalanced {
                seller_revenue,
                buyer_payment,
            } => (seller_revenue + buyer_payment) / 2.0,
        };
        total / self.quantity
    }

    pub(crate) fn validate(&self, rule: PricingRule, policy: SettlementPolicy) -> Result<(), MarketError> {
        if self.seller_id == self.buyer_id {
            return Err(MarketError::SelfTrade {
                agent: self.seller_id.clone(),
            });
        }
        if self.quantity.is_nan() || self.quantity <= 0.0 {
            return Err(MarketError::NonPositiveTradeQuantity {
                seller: self.seller_id.clone(),
                buyer: self.buyer_id.clone(),
                quantity: self.quantity,
            });
        }
        match (policy, self.payment) {
            (SettlementPolicy::BudgetBalanced, Payment::Imbalanced { .. }) => {
                Err(MarketError::MalformedTradePair {
                    rule: rule.as_str(),
                    reason: "budget-imbalanced payment under a budget-balanced rule".into(),
                })
            }
            (
                _,
                Payment::Imbalanced {
                    seller_revenue,
                    buyer_payment,
                },
            ) if buyer_payment < seller_revenue => Err(MarketError::BudgetImbalanceViolated {
                seller_revenue,
                buyer_payment,
            }),
            _ => Ok(()),
        }
    }
}

// === OUTCOME ===

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Tsify)]
pub struct PriceSummary {
    pub min: Price,
    pub avg: Price,
    pub max: Price,
}

impl PriceSummary {
    /// Min/max of per-unit prices over all pairs, and their quantity-weighted
    /// mean. `None` for an empty slice.
    pub fn from_pairs(pairs: &[TradePair]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let prices = pairs.iter().map(TradePair::unit_price);
        let min = prices.clone().fold(f64::INFINITY, f64::min);
        let max = prices.fold(f64::NEG_INFINITY, f64::max);

        let quantity: Quantity = pairs.iter().map(|p| p.quantity).sum();
        let weighted: f64 = pairs.iter().map(|p| p.unit_price() * p.quantity).sum();
        let avg = weighted / quantity;
        Some(Self { min, avg, max })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClearingOutcome {
    pub result: ClearingResult,
    pub trade_pairs: Vec<TradePair>,
    pub price_summary: Option<PriceSummary>,
    /// Sum of buyer payments.
    pub turnover: f64,
}

impl ClearingOutcome {
    pub fn no_trade() -> Self {
        Self {
            result: ClearingResult::NoTrade,
            trade_pairs: Vec::new(),
            price_summary: None,
            turnover: 0.0,
        }
    }

    pub fn matched_quantity(&self) -> Quantity {
        self.trade_pairs.iter().map(|p| p.quantity).sum()
    }
}

// === RULES ===

/// Greedy multi-unit matching at a single price.
///
/// Highest bids draw from the cheapest offers until `quantity` is matched. A
/// seller with leftover supply stays in line for the next bid; a bid that
/// exhausts a seller moves on to the next one. Offers from the bid's own agent
/// are skipped.
fn pay_as_clear(
    book: &SortedBook,
    quantity: Quantity,
    price: Price,
    tolerances: Tolerances,
) -> Result<Vec<TradePair>, MarketError> {
    let eps = tolerances.quantity_epsilon;
    let mut remaining: Vec<Quantity> = book.offers.iter().map(|o| o.quantity).collect();
    let mut pairs = Vec::new();
    let mut matched = 0.0;

    'bids: for bid in &book.bids {
        if quantity - matched <= eps {
            break;
        }
        // zero-volume bids have nothing to fill
        let mut demand = bid.quantity.min(quantity - matched);
        if demand <= eps {
            continue;
        }

        for (offer, available) in book.offers.iter().zip(remaining.iter_mut()) {
            if *available <= eps || offer.seller_id == bid.buyer_id {
                continue;
            }
            let traded = demand.min(*available);
            pairs.push(TradePair {
                seller_id: offer.seller_id.clone(),
                buyer_id: bid.buyer_id.clone(),
                quantity: traded,
                payment: Payment::Balanced(traded * price),
            });
            *available -= traded;
            demand -= traded;
            matched += traded;

            if quantity - matched <= eps {
                break 'bids;
            }
            if demand <= eps {
                continue 'bids;
            }
        }
    }

    if (matched - quantity).abs() > eps {
        return Err(MarketError::MatchedQuantityMismatch {
            matched,
            clearing: quantity,
        });
    }

    let recorded: f64 = pairs.iter().map(|p| p.payment.buyer_payment()).sum();
    let expected = quantity * price;
    if (recorded - expected).abs() > tolerances.turnover_tolerance {
        return Err(MarketError::TurnoverMismatch { recorded, expected });
    }

    Ok(pairs)
}

/// One pair per crossing segment, each at its own bid price.
fn pay_as_bid(curve: &[CurveSegment], quantity: Quantity, eps: Quantity) -> Vec<TradePair> {
    curve
        .iter()
        .filter(|s| s.cumulative_quantity <= quantity + eps)
        .filter_map(|s| {
            let price = s.bid_price?;
            Some(TradePair {
                seller_id: s.seller_id.clone()?,
                buyer_id: s.buyer_id.clone()?,
                quantity: s.marginal_quantity,
                payment: Payment::Balanced(s.marginal_quantity * price),
            })
        })
        .collect()
}

/// McAfee trade reduction over the efficient prefix of the curve.
///
/// With `k` the last efficient segment, the first rejected segment proposes
/// `p0 = (bid + offer) / 2`. If `p0` lies within segment `k`'s offer and bid,
/// every efficient segment trades at `p0`. Otherwise segment `k` is dropped and
/// the rest trade with buyers paying bid `k` and sellers receiving offer `k`.
fn mcafee(crossing: &Crossing) -> (ClearingResult, Vec<TradePair>) {
    let efficient = crossing.efficient_segments();
    let Some((last, kept)) = efficient.split_last() else {
        return (ClearingResult::NoTrade, Vec::new());
    };
    let Some((bid_k, offer_k)) = last.prices() else {
        return (ClearingResult::NoTrade, Vec::new());
    };

    let proposal = crossing
        .first_rejected()
        .and_then(CurveSegment::prices)
        .map(|(bid, offer)| (bid + offer) / 2.0)
        .filter(|p0| (offer_k..=bid_k).contains(p0));

    let clearance = match crossing.result {
        ClearingResult::Cleared { clearance, .. } => clearance,
        ClearingResult::NoTrade => Clearance::Partial,
    };

    // (segments that trade, price buyers pay, price sellers receive)
    let (segments, buyer_price, seller_price) = match proposal {
        Some(p0) => (efficient, p0, p0),
        None => (kept, bid_k, offer_k),
    };
    let payment = |q: Quantity| {
        if buyer_price == seller_price {
            Payment::Balanced(q * buyer_price)
        } else {
            Payment::Imbalanced {
                seller_revenue: q * seller_price,
                buyer_payment: q * buyer_price,
            }
        }
    };

    let pairs: Vec<TradePair> = segments
        .iter()
        .filter_map(|s| {
            Some(TradePair {
                seller_id: s.seller_id.clone()?,
                buyer_id: s.buyer_id.clone()?,
                quantity: s.marginal_quantity,
                payment: payment(s.marginal_quantity),
            })
        })
        .collect();

    if pairs.is_empty() {
        return (ClearingResult::NoTrade, pairs);
    }
    let quantity = pairs.iter().map(|p| p.quantity).sum();
    let result = ClearingResult::Cleared {
        quantity,
        price: buyer_price,
        clearance,
    };
    (result, pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::clearing::detect_crossing;
    use crate::market::curve::build_curve;
    use crate::market::orders::{Bid, Offer, OrderBook};
    use crate::market::rules::apply_market_rules;

    fn clear(rule: PricingRule, bids: Vec<Bid>, offers: Vec<Offer>) -> ClearingOutcome {
        let book = OrderBook { bids, offers }.into_sorted();
        let curve = apply_market_rules(build_curve(&book), 1e-9).unwrap();
        let crossing = detect_crossing(&curve).unwrap();
        rule.clear(&book, &crossing, Tolerances::default()).unwrap()
    }

    fn scenario_a(rule: PricingRule) -> ClearingOutcome {
        clear(
            rule,
            vec![Bid::new(0.30, 10.0, "H1"), Bid::new(0.25, 5.0, "H2")],
            vec![Offer::new(0.10, 8.0, "H3"), Offer::new(0.20, 10.0, "H4")],
        )
    }

    fn scenario_c(rule: PricingRule) -> ClearingOutcome {
        clear(
            rule,
            vec![Bid::new(0.30, 5.0, "H1"), Bid::new(0.10, 5.0, "H2")],
            vec![Offer::new(0.15, 5.0, "H3"), Offer::new(0.25, 5.0, "H4")],
        )
    }

    #[test]
    fn pac_fills_bids_across_sellers() {
        let outcome = scenario_a(PricingRule::PayAsClear);

        let shape: Vec<_> = outcome
            .trade_pairs
            .iter()
            .map(|p| (p.seller_id.as_str(), p.buyer_id.as_str(), p.quantity))
            .collect();
        assert_eq!(
            shape,
            vec![("H3", "H1", 8.0), ("H4", "H1", 2.0), ("H4", "H2", 5.0)]
        );
        assert!((outcome.turnover - 3.75).abs() < 0.01);
        assert_eq!(outcome.matched_quantity(), 15.0);

        let summary = outcome.price_summary.unwrap();
        assert!((summary.min - 0.25).abs() < 1e-12);
        assert!((summary.max - 0.25).abs() < 1e-12);
    }

    #[test]
    fn pac_partial_clearance() {
        let outcome = scenario_c(PricingRule::PayAsClear);
        assert_eq!(outcome.result.quantity(), Some(5.0));
        assert_eq!(outcome.result.price(), Some(0.30));
        assert_eq!(outcome.trade_pairs.len(), 1);
        assert_eq!(outcome.trade_pairs[0].seller_id, "H3");
        assert!((outcome.turnover - 1.5).abs() < 1e-12);
    }

    #[test]
    fn pab_pays_each_segment_bid() {
        let outcome = scenario_a(PricingRule::PayAsBid);

        let payments: Vec<_> = outcome
            .trade_pairs
            .iter()
            .map(|p| p.payment.buyer_payment())
            .collect();
        assert_eq!(payments.len(), 3);
        assert!((payments[0] - 2.4).abs() < 1e-12);
        assert!((payments[1] - 0.6).abs() < 1e-12);
        assert!((payments[2] - 1.25).abs() < 1e-12);
        assert!(outcome.trade_pairs.iter().all(TradePair::budget_balanced));

        let summary = outcome.price_summary.unwrap();
        assert!((summary.min - 0.25).abs() < 1e-12);
        assert!((summary.max - 0.30).abs() < 1e-12);
        // 10 units at 0.30 and 5 at 0.25
        assert!((summary.avg - 4.25 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn agent_on_both_sides_trades_with_other_counterparts() {
        let bids = vec![Bid::new(0.30, 10.0, "H1")];
        let offers = vec![Offer::new(0.10, 5.0, "H1"), Offer::new(0.20, 5.0, "S1")];

        let pac = clear(PricingRule::PayAsClear, bids.clone(), offers.clone());
        assert_eq!(pac.result.quantity(), Some(5.0));
        assert_eq!(pac.result.price(), Some(0.30));
        assert_eq!(pac.trade_pairs.len(), 1);
        assert_eq!(pac.trade_pairs[0].seller_id, "S1");
        assert_eq!(pac.matched_quantity(), 5.0);
        assert!((pac.turnover - 1.5).abs() < 1e-12);

        let pab = clear(PricingRule::PayAsBid, bids, offers);
        assert_eq!(pab.result.quantity(), Some(5.0));
        assert_eq!(pab.matched_quantity(), 5.0);
    }

    #[test]
    fn pac_skips_zero_volume_bids() {
        let outcome = clear(
            PricingRule::PayAsClear,
            vec![
                Bid::new(0.30, 5.0, "H1"),
                Bid::new(0.28, 0.0, "H2"),
                Bid::new(0.25, 5.0, "H3"),
            ],
            vec![Offer::new(0.10, 10.0, "S1")],
        );

        assert_eq!(outcome.result.quantity(), Some(10.0));
        let buyers: Vec<_> = outcome.trade_pairs.iter().map(|p| p.buyer_id.as_str()).collect();
        assert_eq!(buyers, vec!["H1", "H3"]);
        assert!((outcome.turnover - 2.5).abs() < 1e-12);
    }

    #[test]
    fn mcafee_trades_at_proposed_price_when_it_fits() {
        let outcome = scenario_c(PricingRule::McAfee);

        assert_eq!(outcome.trade_pairs.len(), 1);
        let pair = &outcome.trade_pairs[0];
        assert!(pair.budget_balanced());
        assert!((pair.payment.buyer_payment() - 5.0 * 0.175).abs() < 1e-12);
        assert!((outcome.result.price().unwrap() - 0.175).abs() < 1e-12);
    }

    #[test]
    fn mcafee_reduces_trade_and_leaves_residual() {
        let outcome = scenario_a(PricingRule::McAfee);

        // the last efficient segment (H2 buying from H4) is sacrificed
        assert_eq!(outcome.trade_pairs.len(), 2);
        assert!(outcome.trade_pairs.iter().all(|p| p.buyer_id == "H1"));
        assert_eq!(outcome.result.quantity(), Some(10.0));
        assert_eq!(outcome.result.price(), Some(0.25));

        let residual: f64 = outcome.trade_pairs.iter().map(|p| p.payment.residual()).sum();
        assert!((residual - 10.0 * 0.05).abs() < 1e-9);
        assert!(
            outcome
                .trade_pairs
                .iter()
                .all(|p| p.payment.buyer_payment() >= p.payment.seller_revenue())
        );
    }

    #[test]
    fn mcafee_single_efficient_segment_without_proposal_is_no_trade() {
        let outcome = clear(
            PricingRule::McAfee,
            vec![Bid::new(0.90, 4.0, "B1")],
            vec![Offer::new(0.10, 6.0, "S1")],
        );
        assert_eq!(outcome, ClearingOutcome::no_trade());
    }

    #[test]
    fn imbalanced_pair_is_malformed_under_balanced_rule() {
        let pair = TradePair {
            seller_id: "S".into(),
            buyer_id: "B".into(),
            quantity: 1.0,
            payment: Payment::Imbalanced {
                seller_revenue: 0.1,
                buyer_payment: 0.2,
            },
        };
        assert!(matches!(
            pair.validate(PricingRule::PayAsClear, SettlementPolicy::BudgetBalanced),
            Err(MarketError::MalformedTradePair { rule: "pac", .. })
        ));

        let reversed = TradePair {
            payment: Payment::Imbalanced {
                seller_revenue: 0.3,
                buyer_payment: 0.2,
            },
            ..pair
        };
        assert!(matches!(
            reversed.validate(PricingRule::McAfee, SettlementPolicy::BudgetImbalanced),
            Err(MarketError::BudgetImbalanceViolated { .. })
        ));
    }

    #[test]
    fn parses_rule_names() {
        assert_eq!("PAC".parse::<PricingRule>().unwrap(), PricingRule::PayAsClear);
        assert_eq!("pab".parse::<PricingRule>().unwrap(), PricingRule::PayAsBid);
        assert_eq!("mcafee".parse::<PricingRule>().unwrap(), PricingRule::McAfee);
        assert!("vickrey".parse::<PricingRule>().is_err());
        assert_eq!(PricingRule::McAfee.to_string(), "mcafee");
    }
}
