//! Multi-step market session driven by an external submission source.

use crate::agents::{Agent, AgentRegistry, Wallet};
use crate::auctioneer::{Auctioneer, StepOutcome};
use crate::config::MarketConfig;
use crate::error::MarketError;
use crate::market::{Bid, Offer};
use crate::measurements::Measurements;
use crate::types::Step;

/// Raw submissions for one step; `None` entries are "not trading" placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepSubmissions {
    pub bids: Vec<Option<Bid>>,
    pub offers: Vec<Option<Offer>>,
}

impl StepSubmissions {
    pub fn new(bids: Vec<Bid>, offers: Vec<Offer>) -> Self {
        Self {
            bids: bids.into_iter().map(Some).collect(),
            offers: offers.into_iter().map(Some).collect(),
        }
    }
}

/// Produces each step's bids and offers.
///
/// Sources may update agents' trading state through the registry before the
/// auctioneer records participation.
pub trait SubmissionSource {
    fn submissions(&mut self, step: Step, registry: &mut AgentRegistry) -> StepSubmissions;
}

impl<F> SubmissionSource for F
where
    F: FnMut(Step, &mut AgentRegistry) -> StepSubmissions,
{
    fn submissions(&mut self, step: Step, registry: &mut AgentRegistry) -> StepSubmissions {
        self(step, registry)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub steps: usize,
    pub trading_steps: usize,
    pub traded_quantity: f64,
    pub total_revenue: f64,
    pub total_payment: f64,
    /// Revenue collected by the market maker.
    pub market_maker_revenue: f64,
}

// === SESSION ===

pub struct MarketSession {
    config: MarketConfig,
    registry: AgentRegistry,
    auctioneer: Auctioneer,
    measurements: Measurements,
    step: Step,
}

impl MarketSession {
    pub fn new(config: MarketConfig) -> Result<Self, MarketError> {
        Self::with_registry(config, AgentRegistry::new())
    }

    pub fn with_registry(config: MarketConfig, registry: AgentRegistry) -> Result<Self, MarketError> {
        config.validate()?;
        if registry.contains(&config.market_maker_id) {
            return Err(MarketError::DuplicateAgent(config.market_maker_id.clone()));
        }

        let auctioneer = Auctioneer::new(
            config.market_maker_id.clone(),
            config.pricing_rule,
            config.tolerances(),
        )
        .with_snapshot_interval(config.snapshot_interval);
        let measurements = Measurements::with_steps(config.num_steps);

        Ok(Self {
            config,
            registry,
            auctioneer,
            measurements,
            step: 0,
        })
    }

    pub fn register(&mut self, agent: Agent) -> Result<(), MarketError> {
        if agent.id == self.auctioneer.id {
            return Err(MarketError::DuplicateAgent(agent.id));
        }
        let agent = Agent {
            wallet: Wallet::new(agent.id.clone()).with_steps(self.config.num_steps),
            ..agent
        };
        self.registry.register(agent)?;
        Ok(())
    }

    /// Open the current step for submissions if it is not open yet.
    pub fn open_step(&mut self) -> Result<Step, MarketError> {
        if self.auctioneer.open_step().is_none() {
            self.auctioneer.begin_step(self.step)?;
        }
        Ok(self.step)
    }

    pub fn submit_bid(&mut self, bid: Option<Bid>) -> Result<(), MarketError> {
        self.open_step()?;
        self.auctioneer.submit_bid(bid)
    }

    pub fn submit_offer(&mut self, offer: Option<Offer>) -> Result<(), MarketError> {
        self.open_step()?;
        self.auctioneer.submit_offer(offer)
    }

    /// Clear whatever was submitted for the current step and advance.
    pub fn step_once(&mut self) -> Result<StepOutcome, MarketError> {
        self.open_step()?;
        let outcome = self
            .auctioneer
            .run_step(&mut self.registry, &mut self.measurements)?;
        self.step += 1;
        Ok(outcome)
    }

    /// Submit a complete step and clear it.
    pub fn submit_step(&mut self, submissions: StepSubmissions) -> Result<StepOutcome, MarketError> {
        self.open_step()?;
        for bid in submissions.bids {
            self.auctioneer.submit_bid(bid)?;
        }
        for offer in submissions.offers {
            self.auctioneer.submit_offer(offer)?;
        }
        self.step_once()
    }

    /// Run the remaining steps of the session, stopping at the first error.
    pub fn run(&mut self, source: &mut impl SubmissionSource) -> Result<SessionSummary, MarketError> {
        while self.step < self.config.num_steps {
            let submissions = source.submissions(self.step, &mut self.registry);
            self.submit_step(submissions)?;
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            steps: self.step,
            trading_steps: self.measurements.trading_steps().count(),
            traded_quantity: self.measurements.clearing_quantity.iter().flatten().sum(),
            total_revenue: self.registry.total_revenue(),
            total_payment: self.registry.total_payment(),
            market_maker_revenue: self.auctioneer.wallet.total_revenue(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    pub fn measurements(&self) -> &Measurements {
        &self.measurements
    }

    pub fn auctioneer(&self) -> &Auctioneer {
        &self.auctioneer
    }

    /// Wallet by agent id; the market maker's id resolves to the auctioneer's wallet.
    pub fn wallet(&self, id: &str) -> Result<&Wallet, MarketError> {
        if id == self.auctioneer.id {
            return Ok(&self.auctioneer.wallet);
        }
        Ok(&self.registry.lookup(id)?.wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PricingRule;

    fn session(rule: PricingRule, ids: &[&str]) -> MarketSession {
        let config = MarketConfig::default().with_pricing_rule(rule).with_num_steps(3);
        let mut session = MarketSession::new(config).unwrap();
        for id in ids {
            session.register(Agent::household(*id)).unwrap();
        }
        session
    }

    #[test]
    fn run_pulls_every_step_from_source() {
        let mut session = session(PricingRule::PayAsClear, &["B", "S"]);
        let mut seen = Vec::new();
        let mut source = |step: Step, _: &mut AgentRegistry| {
            seen.push(step);
            StepSubmissions::new(
                vec![Bid::new(0.3, 1.0, "B")],
                vec![Offer::new(0.1, 1.0, "S")],
            )
        };

        let summary = session.run(&mut source).unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.trading_steps, 3);
        assert!((summary.traded_quantity - 3.0).abs() < 1e-12);
        assert!((summary.total_revenue - summary.total_payment).abs() < 1e-12);
    }

    #[test]
    fn market_maker_id_is_reserved() {
        let mut session = session(PricingRule::McAfee, &[]);
        assert!(matches!(
            session.register(Agent::household("auctioneer")),
            Err(MarketError::DuplicateAgent(_))
        ));
        assert!(session.wallet("auctioneer").unwrap().is_untouched());
    }

    #[test]
    fn incremental_submissions_clear_on_step() {
        let mut session = session(PricingRule::PayAsBid, &["B", "S"]);
        session.submit_bid(Some(Bid::new(0.3, 2.0, "B"))).unwrap();
        session.submit_offer(Some(Offer::new(0.1, 2.0, "S"))).unwrap();

        let outcome = session.step_once().unwrap();
        assert_eq!(outcome.step, 0);
        assert_eq!(session.step(), 1);
        assert!((session.wallet("B").unwrap().payment_at(0) - 0.6).abs() < 1e-12);
        assert!(matches!(session.wallet("nobody"), Err(MarketError::UnknownAgent(_))));
    }
}
