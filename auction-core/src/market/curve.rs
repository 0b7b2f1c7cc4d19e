//! Aggregate demand/supply curve on a shared cumulative-quantity axis.
//!
//! Bids (descending) and offers (ascending) are prefix-summed independently,
//! merged by cumulative quantity, and every point is then completed with the
//! nearest *following* point of the opposite side. A point at cumulative
//! quantity `q` therefore describes the slice `(previous q, q]`: the bid and the
//! offer that cover that slice, and who submitted them.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::types::{AgentId, Price, Quantity};

use super::orders::{Side, SortedBook};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
pub struct CurveSegment {
    pub cumulative_quantity: Quantity,
    /// Distance to the previous point on the merged axis.
    pub marginal_quantity: Quantity,
    pub bid_price: Option<Price>,
    pub offer_price: Option<Price>,
    pub buyer_id: Option<AgentId>,
    pub seller_id: Option<AgentId>,
    /// Side whose prefix sum produced this point.
    pub anchor: Side,
}

impl CurveSegment {
    fn bid_point(cumulative_quantity: Quantity, price: Price, buyer: &AgentId) -> Self {
        Self {
            cumulative_quantity,
            marginal_quantity: 0.0,
            bid_price: Some(price),
            offer_price: None,
            buyer_id: Some(buyer.clone()),
            seller_id: None,
            anchor: Side::Buy,
        }
    }

    fn offer_point(cumulative_quantity: Quantity, price: Price, seller: &AgentId) -> Self {
        Self {
            cumulative_quantity,
            marginal_quantity: 0.0,
            bid_price: None,
            offer_price: Some(price),
            buyer_id: None,
            seller_id: Some(seller.clone()),
            anchor: Side::Sell,
        }
    }

    /// Bid and offer price, if both sides are known.
    pub fn prices(&self) -> Option<(Price, Price)> {
        Some((self.bid_price?, self.offer_price?))
    }

    pub fn is_comparable(&self) -> bool {
        self.prices().is_some()
    }

    /// True when the bid covers the offer. `None` for one-sided segments.
    pub fn crosses(&self) -> Option<bool> {
        self.prices().map(|(bid, offer)| bid >= offer)
    }

    pub fn is_self_trade(&self) -> bool {
        matches!((&self.buyer_id, &self.seller_id), (Some(b), Some(s)) if b == s)
    }
}

/// Build the merged, forward-filled curve for a sorted book.
pub fn build_curve(book: &SortedBook) -> Vec<CurveSegment> {
    let mut segments = Vec::with_capacity(book.bids.len() + book.offers.len());

    let mut cumulative = 0.0;
    for bid in &book.bids {
        cumulative += bid.quantity;
        segments.push(CurveSegment::bid_point(cumulative, bid.price, &bid.buyer_id));
    }

    cumulative = 0.0;
    for offer in &book.offers {
        cumulative += offer.quantity;
        segments.push(CurveSegment::offer_point(
            cumulative,
            offer.price,
            &offer.seller_id,
        ));
    }

    // Stable: at equal cumulative quantity bid points stay ahead of offer points.
    segments.sort_by(|a, b| a.cumulative_quantity.total_cmp(&b.cumulative_quantity));

    let mut previous = 0.0;
    for segment in &mut segments {
        segment.marginal_quantity = segment.cumulative_quantity - previous;
        previous = segment.cumulative_quantity;
    }

    forward_fill(&mut segments);
    segments
}

/// Copy the nearest following counterpart into every one-sided point.
///
/// Points after the last point of the opposite side stay one-sided: that side
/// is exhausted and there is nothing to compare them with.
fn forward_fill(segments: &mut [CurveSegment]) {
    let mut next_offer: Option<(Price, AgentId)> = None;
    let mut next_bid: Option<(Price, AgentId)> = None;

    for segment in segments.iter_mut().rev() {
        match segment.anchor {
            Side::Buy => {
                let own = segment.bid_price.zip(segment.buyer_id.clone());
                if let Some((price, seller)) = &next_offer {
                    segment.offer_price = Some(*price);
                    segment.seller_id = Some(seller.clone());
                }
                next_bid = own;
            }
            Side::Sell => {
                let own = segment.offer_price.zip(segment.seller_id.clone());
                if let Some((price, buyer)) = &next_bid {
                    segment.bid_price = Some(*price);
                    segment.buyer_id = Some(buyer.clone());
                }
                next_offer = own;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::orders::{Bid, Offer, OrderBook};

    fn curve(bids: Vec<Bid>, offers: Vec<Offer>) -> Vec<CurveSegment> {
        build_curve(&OrderBook { bids, offers }.into_sorted())
    }

    #[test]
    fn merges_and_fills_both_sides() {
        let segments = curve(
            vec![Bid::new(0.25, 5.0, "H2"), Bid::new(0.30, 10.0, "H1")],
            vec![Offer::new(0.20, 10.0, "H4"), Offer::new(0.10, 8.0, "H3")],
        );

        let points: Vec<_> = segments.iter().map(|s| s.cumulative_quantity).collect();
        assert_eq!(points, vec![8.0, 10.0, 15.0, 18.0]);

        let marginals: Vec<_> = segments.iter().map(|s| s.marginal_quantity).collect();
        assert_eq!(marginals, vec![8.0, 2.0, 5.0, 3.0]);

        // offer point at 8 borrows the next bid (H1 @ 0.30)
        assert_eq!(segments[0].prices(), Some((0.30, 0.10)));
        assert_eq!(segments[0].buyer_id.as_deref(), Some("H1"));
        assert_eq!(segments[0].seller_id.as_deref(), Some("H3"));

        // bid points borrow the next offer (H4 @ 0.20)
        assert_eq!(segments[1].prices(), Some((0.30, 0.20)));
        assert_eq!(segments[2].prices(), Some((0.25, 0.20)));
        assert_eq!(segments[2].seller_id.as_deref(), Some("H4"));

        // demand is exhausted before the last offer point
        assert_eq!(segments[3].bid_price, None);
        assert!(!segments[3].is_comparable());
    }

    #[test]
    fn equal_cumulative_points_keep_bid_first() {
        let segments = curve(
            vec![Bid::new(0.05, 10.0, "H1")],
            vec![Offer::new(0.20, 10.0, "H2")],
        );

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].anchor, Side::Buy);
        assert_eq!(segments[0].prices(), Some((0.05, 0.20)));
        assert_eq!(segments[1].anchor, Side::Sell);
        assert_eq!(segments[1].marginal_quantity, 0.0);
        assert!(!segments[1].is_comparable());
    }

    #[test]
    fn supply_entirely_below_demand_leaves_trailing_bids_one_sided() {
        let segments = curve(
            vec![Bid::new(0.30, 10.0, "B1"), Bid::new(0.28, 10.0, "B2")],
            vec![Offer::new(0.05, 3.0, "S1"), Offer::new(0.06, 2.0, "S2")],
        );

        let comparable: Vec<_> = segments.iter().filter(|s| s.is_comparable()).collect();
        assert_eq!(comparable.len(), 2);
        assert_eq!(comparable.last().unwrap().cumulative_quantity, 5.0);
        assert!(segments[2..].iter().all(|s| s.offer_price.is_none()));
    }

    #[test]
    fn detects_self_trade_segments() {
        let segments = curve(
            vec![Bid::new(0.30, 5.0, "H1")],
            vec![Offer::new(0.10, 6.0, "H1")],
        );
        assert!(segments[0].is_self_trade());
    }
}
