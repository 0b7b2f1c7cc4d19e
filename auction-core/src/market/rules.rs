use crate::error::MarketError;
use crate::types::{AgentId, Quantity};

use super::curve::CurveSegment;

/// Drop self-trades and zero-volume segments from a built curve.
///
/// Marginal quantities at or below `epsilon` count as zero, so two points that
/// only differ by prefix-sum rounding collapse into one. The cumulative axis is
/// rebuilt from the surviving marginals: volume an agent offered to itself is
/// not tradeable and must not count towards the clearing quantity.
pub fn apply_market_rules(
    segments: Vec<CurveSegment>,
    epsilon: Quantity,
) -> Result<Vec<CurveSegment>, MarketError> {
    let mut filtered: Vec<CurveSegment> = segments
        .into_iter()
        .filter(|s| !s.is_self_trade() && s.marginal_quantity > epsilon)
        .collect();

    let mut cumulative = 0.0;
    for segment in &mut filtered {
        cumulative += segment.marginal_quantity;
        segment.cumulative_quantity = cumulative;
    }

    check_market_rules(&filtered, epsilon)?;
    Ok(filtered)
}

/// Post-condition of [`apply_market_rules`]. A violation is a curve construction bug.
pub fn check_market_rules(segments: &[CurveSegment], epsilon: Quantity) -> Result<(), MarketError> {
    for segment in segments {
        if segment.is_self_trade() {
            let agent: AgentId = segment.buyer_id.clone().unwrap_or_default();
            return Err(MarketError::SelfTrade { agent });
        }
        if segment.marginal_quantity <= epsilon {
            return Err(MarketError::ZeroQuantitySegment {
                cumulative: segment.cumulative_quantity,
            });
        }
    }
    Ok(())
}
