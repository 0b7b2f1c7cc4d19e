use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::agents::Participation;
use crate::market::{CurveSegment, NetQuantities, PriceSummary, TradePair};
use crate::types::{AgentId, Quantity, Step, step_slot};

// === PER-AGENT SERIES ===

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSeries {
    /// Signed energy traded per step: negative sold, positive bought.
    pub traded_volume: Vec<Quantity>,
}

// === MEASUREMENTS ===

/// Step-indexed market time series, written once per step by the auctioneer.
///
/// Steps without trade keep `None` for price and quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub clearing_price: Vec<Option<PriceSummary>>,
    pub clearing_quantity: Vec<Option<Quantity>>,
    pub household_demand: Vec<Quantity>,
    pub participation: Vec<Option<Participation>>,
    pub agents: HashMap<AgentId, AgentSeries>,
    pub trade_log: BTreeMap<Step, Vec<TradePair>>,
    pub curve_snapshots: BTreeMap<Step, Vec<CurveSegment>>,
}

impl Measurements {
    pub fn with_steps(num_steps: usize) -> Self {
        Self {
            clearing_price: vec![None; num_steps],
            clearing_quantity: vec![None; num_steps],
            household_demand: vec![0.0; num_steps],
            participation: vec![None; num_steps],
            ..Self::default()
        }
    }

    pub fn record_participation(&mut self, step: Step, participation: Option<Participation>) {
        *step_slot(&mut self.participation, step) = participation;
    }

    pub fn record_clearing(&mut self, step: Step, quantity: Quantity, summary: Option<PriceSummary>) {
        *step_slot(&mut self.clearing_quantity, step) = Some(quantity);
        *step_slot(&mut self.clearing_price, step) = summary;
    }

    pub fn record_household_demand(&mut self, step: Step, demand: Quantity) {
        *step_slot(&mut self.household_demand, step) += demand;
    }

    pub fn record_trades(&mut self, step: Step, pairs: &[TradePair]) {
        self.trade_log.entry(step).or_default().extend_from_slice(pairs);
    }

    /// Sum each agent's signed quantities into its traded volume for `step`.
    pub fn record_net_quantities(&mut self, step: Step, net: &NetQuantities) {
        for (agent, quantities) in net {
            let series = self.agents.entry(agent.clone()).or_default();
            *step_slot(&mut series.traded_volume, step) += quantities.iter().sum::<Quantity>();
        }
    }

    pub fn record_curve(&mut self, step: Step, curve: Vec<CurveSegment>) {
        self.curve_snapshots.insert(step, curve);
    }

    pub fn traded_volume(&self, agent: &str, step: Step) -> Quantity {
        self.agents
            .get(agent)
            .and_then(|s| s.traded_volume.get(step))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn trades_at(&self, step: Step) -> &[TradePair] {
        self.trade_log.get(&step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps that produced trade, in order.
    pub fn trading_steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.clearing_quantity
            .iter()
            .enumerate()
            .filter_map(|(step, q)| q.map(|_| step))
    }
}
