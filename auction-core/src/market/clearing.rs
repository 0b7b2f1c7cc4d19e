use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::MarketError;
use crate::types::{Price, Quantity};

use super::curve::CurveSegment;

// === CLEARING RESULT ===

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Tsify)]
pub enum Clearance {
    /// Every comparable segment crosses.
    Full,
    /// Trade stops before the first non-crossing segment.
    Partial,
}

/// Quantity and uniform price the market clears at, or no trade.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Tsify)]
pub enum ClearingResult {
    NoTrade,
    Cleared {
        quantity: Quantity,
        price: Price,
        clearance: Clearance,
    },
}

impl ClearingResult {
    pub fn quantity(&self) -> Option<Quantity> {
        match self {
            Self::NoTrade => None,
            Self::Cleared { quantity, .. } => Some(*quantity),
        }
    }

    pub fn price(&self) -> Option<Price> {
        match self {
            Self::NoTrade => None,
            Self::Cleared { price, .. } => Some(*price),
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, Self::Cleared { .. })
    }
}

// === CROSSING DETECTION ===

/// Comparable part of a filtered curve together with its crossing point.
#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub result: ClearingResult,
    /// Segments with both a bid and an offer side, in curve order.
    pub curve: Vec<CurveSegment>,
    /// Number of leading segments whose bid covers their offer.
    pub efficient: usize,
}

impl Crossing {
    pub fn efficient_segments(&self) -> &[CurveSegment] {
        &self.curve[..self.efficient]
    }

    /// First segment that does not cross, if the curve has one.
    pub fn first_rejected(&self) -> Option<&CurveSegment> {
        self.curve.get(self.efficient)
    }
}

/// Find where the aggregate demand curve drops below the supply curve.
///
/// One-sided segments carry no price comparison and are ignored. A filtered
/// curve without a single comparable segment is an [`MarketError::IncompleteCurve`].
pub fn detect_crossing(segments: &[CurveSegment]) -> Result<Crossing, MarketError> {
    let curve: Vec<CurveSegment> = segments
        .iter()
        .filter(|s| s.is_comparable())
        .cloned()
        .collect();

    let Some(last) = curve.last() else {
        return Err(MarketError::IncompleteCurve {
            segments: segments.len(),
        });
    };

    let crosses = |s: &CurveSegment| s.crosses().unwrap_or(false);

    // full clearance prices at the last accepted bid, never the offer side
    if curve.iter().all(crosses) {
        let result = ClearingResult::Cleared {
            quantity: last.cumulative_quantity,
            price: last.bid_price.unwrap_or_default(),
            clearance: Clearance::Full,
        };
        let efficient = curve.len();
        return Ok(Crossing {
            result,
            curve,
            efficient,
        });
    }

    if !curve.iter().any(crosses) {
        return Ok(Crossing {
            result: ClearingResult::NoTrade,
            curve,
            efficient: 0,
        });
    }

    // demand falls and supply rises, so crossing segments form a prefix
    let first_miss = curve.iter().position(|s| !crosses(s)).unwrap_or(curve.len());
    if let Some(index) = curve[first_miss..].iter().position(crosses) {
        return Err(MarketError::UnorderedCurve {
            index: first_miss + index,
        });
    }
    let Some(clearing) = first_miss.checked_sub(1).map(|i| &curve[i]) else {
        return Err(MarketError::UnorderedCurve { index: first_miss });
    };

    let result = ClearingResult::Cleared {
        quantity: clearing.cumulative_quantity,
        price: clearing.bid_price.unwrap_or_default(),
        clearance: Clearance::Partial,
    };
    Ok(Crossing {
        result,
        curve,
        efficient: first_miss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::curve::build_curve;
    use crate::market::orders::{Bid, Offer, OrderBook};
    use crate::market::rules::apply_market_rules;

    fn crossing(bids: Vec<Bid>, offers: Vec<Offer>) -> Result<Crossing, MarketError> {
        let curve = build_curve(&OrderBook { bids, offers }.into_sorted());
        detect_crossing(&apply_market_rules(curve, 1e-9)?)
    }

    #[test]
    fn full_clearance_prices_at_last_bid() {
        let crossing = crossing(
            vec![Bid::new(0.30, 10.0, "H1"), Bid::new(0.25, 5.0, "H2")],
            vec![Offer::new(0.10, 8.0, "H3"), Offer::new(0.20, 10.0, "H4")],
        )
        .unwrap();

        assert_eq!(
            crossing.result,
            ClearingResult::Cleared {
                quantity: 15.0,
                price: 0.25,
                clearance: Clearance::Full
            }
        );
        assert_eq!(crossing.efficient, 3);
    }

    #[test]
    fn full_clearance_price_is_not_the_offer_or_an_average() {
        let crossing = crossing(
            vec![Bid::new(0.90, 4.0, "B1")],
            vec![Offer::new(0.10, 6.0, "S1")],
        )
        .unwrap();

        let price = crossing.result.price().unwrap();
        assert_eq!(price, 0.90);
        assert_ne!(price, 0.10);
        assert_ne!(price, 0.50);
    }

    #[test]
    fn no_crossing_means_no_trade() {
        let crossing = crossing(
            vec![Bid::new(0.05, 10.0, "H1")],
            vec![Offer::new(0.20, 10.0, "H2")],
        )
        .unwrap();

        assert_eq!(crossing.result, ClearingResult::NoTrade);
        assert_eq!(crossing.result.quantity(), None);
        assert_eq!(crossing.result.price(), None);
    }

    #[test]
    fn partial_clearance_stops_before_first_losing_bid() {
        let crossing = crossing(
            vec![Bid::new(0.30, 5.0, "H1"), Bid::new(0.10, 5.0, "H2")],
            vec![Offer::new(0.15, 5.0, "H3"), Offer::new(0.25, 5.0, "H4")],
        )
        .unwrap();

        assert_eq!(
            crossing.result,
            ClearingResult::Cleared {
                quantity: 5.0,
                price: 0.30,
                clearance: Clearance::Partial
            }
        );
        assert_eq!(crossing.efficient, 1);
        assert_eq!(crossing.first_rejected().unwrap().bid_price, Some(0.10));
    }

    #[test]
    fn curve_without_comparable_segment_is_incomplete() {
        // one agent on both sides: every two-sided segment is a self-trade
        let result = crossing(
            vec![Bid::new(0.30, 5.0, "H1")],
            vec![Offer::new(0.10, 7.0, "H1")],
        );
        assert!(matches!(result, Err(MarketError::IncompleteCurve { .. })));
        assert!(detect_crossing(&[]).is_err());
    }

    #[test]
    fn crossing_after_a_miss_is_rejected() {
        let mut segments = build_curve(
            &OrderBook {
                bids: vec![Bid::new(0.30, 5.0, "B1"), Bid::new(0.20, 5.0, "B2")],
                offers: vec![Offer::new(0.10, 5.0, "S1"), Offer::new(0.15, 5.0, "S2")],
            }
            .into_sorted(),
        );
        segments = apply_market_rules(segments, 1e-9).unwrap();
        segments[0].bid_price = Some(0.01);

        assert!(matches!(
            detect_crossing(&segments),
            Err(MarketError::UnorderedCurve { index: 1 })
        ));
    }
}
