use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use tsify_next::Tsify;

use crate::error::MarketError;
use crate::types::{AgentId, Quantity, Step};

use super::wallet::Wallet;

new_key_type! {
    pub struct AgentKey;
}

// === AGENT ===

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum TradingState {
    Supplying,
    Buying,
    #[default]
    Passive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum AgentKind {
    #[default]
    Household,
    Utility,
    Electrolyzer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub kind: AgentKind,
    pub wallet: Wallet,
    pub trading_state: TradingState,
    /// Energy moved through the market in the current step. Reset after settlement.
    pub energy_trade_flux: Quantity,
    /// Consumption per step; only households contribute it to measured demand.
    pub load_profile: Vec<Quantity>,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, kind: AgentKind) -> Self {
        let id = id.into();
        Self {
            wallet: Wallet::new(id.clone()),
            id,
            kind,
            trading_state: TradingState::Passive,
            energy_trade_flux: 0.0,
            load_profile: Vec::new(),
        }
    }

    pub fn household(id: impl Into<AgentId>) -> Self {
        Self::new(id, AgentKind::Household)
    }

    pub fn with_load_profile(mut self, profile: Vec<Quantity>) -> Self {
        self.load_profile = profile;
        self
    }

    pub fn with_trading_state(mut self, state: TradingState) -> Self {
        self.trading_state = state;
        self
    }

    pub fn load_at(&self, step: Step) -> Quantity {
        self.load_profile.get(step).copied().unwrap_or(0.0)
    }
}

// === REGISTRY ===

/// Agents by id, handed explicitly to the auctioneer and settlement ledger.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: SlotMap<AgentKey, Agent>,
    index: HashMap<AgentId, AgentKey>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Agent) -> Result<AgentKey, MarketError> {
        if self.index.contains_key(&agent.id) {
            return Err(MarketError::DuplicateAgent(agent.id));
        }
        let id = agent.id.clone();
        let key = self.agents.insert(agent);
        self.index.insert(id, key);
        Ok(key)
    }

    pub fn key(&self, id: &str) -> Option<AgentKey> {
        self.index.get(id).copied()
    }

    pub fn get(&self, key: AgentKey) -> Option<&Agent> {
        self.agents.get(key)
    }

    pub fn lookup(&self, id: &str) -> Result<&Agent, MarketError> {
        self.key(id)
            .and_then(|key| self.agents.get(key))
            .ok_or_else(|| MarketError::UnknownAgent(id.to_string()))
    }

    pub fn lookup_mut(&mut self, id: &str) -> Result<&mut Agent, MarketError> {
        let key = self.key(id);
        key.and_then(|key| self.agents.get_mut(key))
            .ok_or_else(|| MarketError::UnknownAgent(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.values().map(|a| &a.id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn set_trading_state(&mut self, id: &str, state: TradingState) -> Result<(), MarketError> {
        self.lookup_mut(id)?.trading_state = state;
        Ok(())
    }

    /// Share of agents per trading state. `None` for an empty registry.
    pub fn participation(&self) -> Option<Participation> {
        if self.agents.is_empty() {
            return None;
        }
        let count = |state| self.iter().filter(|a| a.trading_state == state).count() as f64;
        let total = self.agents.len() as f64;
        Some(Participation {
            sellers: count(TradingState::Supplying) / total,
            buyers: count(TradingState::Buying) / total,
            passive: count(TradingState::Passive) / total,
        })
    }

    /// Summed household load at `step`.
    pub fn household_demand(&self, step: Step) -> Quantity {
        self.iter()
            .filter(|a| a.kind == AgentKind::Household)
            .map(|a| a.load_at(step))
            .sum()
    }

    pub fn reset_energy_flux(&mut self) {
        for agent in self.agents.values_mut() {
            agent.energy_trade_flux = 0.0;
        }
    }

    pub fn total_revenue(&self) -> f64 {
        self.iter().map(|a| a.wallet.total_revenue()).sum()
    }

    pub fn total_payment(&self) -> f64 {
        self.iter().map(|a| a.wallet.total_payment()).sum()
    }
}

/// Shares of registered agents supplying, buying and staying out of the market.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Tsify)]
pub struct Participation {
    pub sellers: f64,
    pub buyers: f64,
    pub passive: f64,
}
