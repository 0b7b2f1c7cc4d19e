use serde::{Deserialize, Serialize};

use crate::error::MarketError;
use crate::market::{PricingRule, Tolerances};
use crate::types::Quantity;

/// Market session settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Mechanism used for every step of the session.
    pub pricing_rule: PricingRule,
    /// Length of the step-indexed measurement series (96 = one day of 15 min steps).
    pub num_steps: usize,
    /// Wallet that absorbs budget-imbalanced residuals.
    pub market_maker_id: String,
    /// Slack between recorded pay-as-clear payments and quantity * price.
    pub turnover_tolerance: f64,
    pub quantity_epsilon: Quantity,
    /// Keep the filtered curve of every n-th step.
    pub snapshot_interval: Option<usize>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            pricing_rule: PricingRule::PayAsClear,
            num_steps: 96,
            market_maker_id: "auctioneer".to_string(),
            turnover_tolerance: 0.01,
            quantity_epsilon: 1e-9,
            snapshot_interval: None,
        }
    }
}

impl MarketConfig {
    pub fn from_json(json: &str) -> Result<Self, MarketError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_pricing_rule(mut self, rule: PricingRule) -> Self {
        self.pricing_rule = rule;
        self
    }

    pub fn with_num_steps(mut self, num_steps: usize) -> Self {
        self.num_steps = num_steps;
        self
    }

    pub fn validate(&self) -> Result<(), MarketError> {
        if self.num_steps == 0 {
            return Err(MarketError::Config("num_steps must be positive".into()));
        }
        if self.market_maker_id.is_empty() {
            return Err(MarketError::Config("market_maker_id must not be empty".into()));
        }
        for (name, value) in [
            ("turnover_tolerance", self.turnover_tolerance),
            ("quantity_epsilon", self.quantity_epsilon),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(MarketError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.snapshot_interval == Some(0) {
            return Err(MarketError::Config("snapshot_interval must be positive".into()));
        }
        Ok(())
    }

    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            quantity_epsilon: self.quantity_epsilon,
            turnover_tolerance: self.turnover_tolerance,
        }
    }
}
