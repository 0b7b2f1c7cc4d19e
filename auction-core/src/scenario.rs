//! Ready-made submission sources for smoke runs and tests.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agents::{Agent, AgentRegistry, TradingState};
use crate::error::MarketError;
use crate::market::{Bid, Offer};
use crate::session::{StepSubmissions, SubmissionSource};
use crate::types::{Price, Quantity, Step};

// === RANDOM BOOK ===

/// Random bids and offers from fixed buyer and seller populations.
///
/// Buyers and sellers never overlap, so generated books contain no
/// self-trades. Agents sit out a step with probability `idle_probability`
/// and submit a placeholder instead.
#[derive(Debug, Clone)]
pub struct RandomBook {
    rng: StdRng,
    buyers: Vec<String>,
    sellers: Vec<String>,
    pub price_range: (Price, Price),
    pub quantity_range: (Quantity, Quantity),
    pub idle_probability: f64,
}

impl RandomBook {
    pub fn new(seed: u64, num_buyers: usize, num_sellers: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            buyers: (0..num_buyers).map(|i| format!("B{i}")).collect(),
            sellers: (0..num_sellers).map(|i| format!("S{i}")).collect(),
            price_range: (0.05, 0.40),
            quantity_range: (0.1, 10.0),
            idle_probability: 0.1,
        }
    }

    pub fn with_idle_probability(mut self, p: f64) -> Self {
        self.idle_probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &String> {
        self.buyers.iter().chain(&self.sellers)
    }

    /// Register every buyer and seller as a household.
    pub fn register_agents(&self, registry: &mut AgentRegistry) -> Result<(), MarketError> {
        for id in self.agent_ids() {
            registry.register(Agent::household(id.clone()))?;
        }
        Ok(())
    }

    fn price(&mut self) -> Price {
        let (lo, hi) = self.price_range;
        self.rng.random_range(lo..=hi)
    }

    fn quantity(&mut self) -> Quantity {
        let (lo, hi) = self.quantity_range;
        self.rng.random_range(lo..=hi)
    }

    fn idle(&mut self) -> bool {
        self.rng.random_bool(self.idle_probability)
    }

    /// One step's submissions, without touching any registry.
    pub fn generate(&mut self) -> StepSubmissions {
        let mut submissions = StepSubmissions::default();
        for i in 0..self.buyers.len() {
            let bid = (!self.idle()).then(|| {
                let price = self.price();
                let quantity = self.quantity();
                Bid::new(price, quantity, self.buyers[i].clone())
            });
            submissions.bids.push(bid);
        }
        for i in 0..self.sellers.len() {
            let offer = (!self.idle()).then(|| {
                let price = self.price();
                let quantity = self.quantity();
                Offer::new(price, quantity, self.sellers[i].clone())
            });
            submissions.offers.push(offer);
        }
        submissions
    }
}

impl SubmissionSource for RandomBook {
    fn submissions(&mut self, _step: Step, registry: &mut AgentRegistry) -> StepSubmissions {
        let submissions = self.generate();

        for agent in registry.iter_mut() {
            agent.trading_state = TradingState::Passive;
        }
        let active = submissions
            .bids
            .iter()
            .flatten()
            .map(|b| (&b.buyer_id, TradingState::Buying))
            .chain(
                submissions
                    .offers
                    .iter()
                    .flatten()
                    .map(|o| (&o.seller_id, TradingState::Supplying)),
            );
        for (id, state) in active {
            // unregistered ids are left for settlement to reject
            if let Ok(agent) = registry.lookup_mut(id) {
                agent.trading_state = state;
            }
        }

        submissions
    }
}

// === SCRIPTED BOOK ===

/// Replays prepared steps in order; empty steps once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBook {
    steps: VecDeque<StepSubmissions>,
}

impl ScriptedBook {
    pub fn new(steps: impl IntoIterator<Item = StepSubmissions>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl SubmissionSource for ScriptedBook {
    fn submissions(&mut self, _step: Step, _registry: &mut AgentRegistry) -> StepSubmissions {
        self.steps.pop_front().unwrap_or_default()
    }
}
