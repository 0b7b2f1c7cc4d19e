use serde::{Deserialize, Serialize};
use tsify_next::Tsify;
use wasm_bindgen::prelude::*;

pub mod agents;
pub mod auctioneer;
pub mod config;
pub mod error;
pub mod market;
pub mod measurements;
pub mod scenario;
pub mod session;
pub mod types;

pub use agents::*;
pub use auctioneer::*;
pub use config::*;
pub use error::*;
pub use market::*;
pub use measurements::*;
pub use scenario::*;
pub use session::*;
pub use types::*;

#[cfg(feature = "instrument")]
pub use instrument;

// ============================================================================
// WASM API - Microgrid market
// ============================================================================

#[wasm_bindgen]
pub struct Microgrid {
    session: MarketSession,
}

#[wasm_bindgen]
impl Microgrid {
    /// Create a market from a JSON config; an empty string uses the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<Microgrid, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        let config = if config_json.trim().is_empty() {
            MarketConfig::default()
        } else {
            MarketConfig::from_json(config_json)?
        };
        Ok(Self {
            session: MarketSession::new(config)?,
        })
    }

    #[wasm_bindgen]
    pub fn register_household(&mut self, id: String, load_profile: Vec<f64>) -> Result<(), JsError> {
        self.session
            .register(Agent::household(id).with_load_profile(load_profile))?;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn register_agent(&mut self, id: String, kind: AgentKind) -> Result<(), JsError> {
        self.session.register(Agent::new(id, kind))?;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn set_trading_state(&mut self, id: &str, state: TradingState) -> Result<(), JsError> {
        self.session.registry_mut().set_trading_state(id, state)?;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn submit_bid(&mut self, price: f64, quantity: f64, buyer_id: String) -> Result<(), JsError> {
        self.session
            .submit_bid(Some(Bid::new(price, quantity, buyer_id)))?;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn submit_offer(&mut self, price: f64, quantity: f64, seller_id: String) -> Result<(), JsError> {
        self.session
            .submit_offer(Some(Offer::new(price, quantity, seller_id)))?;
        Ok(())
    }

    /// Submit a JS array of bids; `null` entries are "not trading" placeholders.
    #[wasm_bindgen]
    pub fn submit_bids(&mut self, bids: JsValue) -> Result<(), JsError> {
        let bids: Vec<Option<Bid>> = serde_wasm_bindgen::from_value(bids)?;
        for bid in bids {
            self.session.submit_bid(bid)?;
        }
        Ok(())
    }

    #[wasm_bindgen]
    pub fn submit_offers(&mut self, offers: JsValue) -> Result<(), JsError> {
        let offers: Vec<Option<Offer>> = serde_wasm_bindgen::from_value(offers)?;
        for offer in offers {
            self.session.submit_offer(offer)?;
        }
        Ok(())
    }

    /// Clear the current step and move to the next one
    #[wasm_bindgen]
    pub fn advance_step(&mut self) -> Result<StepSnapshot, JsError> {
        let outcome = self.session.step_once()?;
        Ok(StepSnapshot::from(&outcome))
    }

    #[wasm_bindgen]
    pub fn get_step(&self) -> usize {
        self.session.step()
    }

    #[wasm_bindgen]
    pub fn wallet(&self, id: &str) -> Result<WalletSnapshot, JsError> {
        Ok(WalletSnapshot::from(self.session.wallet(id)?))
    }

    /// All recorded measurements as JSON
    #[wasm_bindgen]
    pub fn measurements_json(&self) -> Result<String, JsError> {
        Ok(serde_json::to_string(self.session.measurements())?)
    }
}

// ============================================================================
// Serializable snapshots for JS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct StepSnapshot {
    pub step: Step,
    pub demand: Quantity,
    pub supply: Quantity,
    pub clearing_quantity: Option<Quantity>,
    pub clearing_price: Option<Price>,
    pub price_summary: Option<PriceSummary>,
    pub trade_pairs: Vec<TradePair>,
    /// Budget-imbalance residual taken by the market maker this step.
    pub residual: f64,
    pub no_trade: Option<NoTradeReason>,
}

impl From<&StepOutcome> for StepSnapshot {
    fn from(outcome: &StepOutcome) -> Self {
        Self {
            step: outcome.step,
            demand: outcome.demand,
            supply: outcome.supply,
            clearing_quantity: outcome.clearing.quantity(),
            clearing_price: outcome.clearing.price(),
            price_summary: outcome.price_summary,
            trade_pairs: outcome.trade_pairs.clone(),
            residual: outcome.settlement.residual,
            no_trade: outcome.no_trade,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct WalletSnapshot {
    pub owner: AgentId,
    pub revenue: Vec<f64>,
    pub payment: Vec<f64>,
    pub balance: f64,
}

impl From<&Wallet> for WalletSnapshot {
    fn from(wallet: &Wallet) -> Self {
        Self {
            owner: wallet.owner.clone(),
            revenue: wallet.revenue_history().to_vec(),
            payment: wallet.payment_history().to_vec(),
            balance: wallet.balance(),
        }
    }
}
