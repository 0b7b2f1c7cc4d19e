//! Posting of trade pairs into agent wallets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::agents::{AgentRegistry, Wallet};
use crate::error::MarketError;
use crate::types::{AgentId, Quantity, Step};

use super::pricing::{Payment, TradePair};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Tsify)]
pub enum SettlementPolicy {
    /// Every pair carries one payment figure.
    BudgetBalanced,
    /// Pairs may carry separate seller revenue and buyer payment; the residual
    /// goes to the market maker.
    BudgetImbalanced,
}

impl SettlementPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BudgetBalanced => "budget_balanced",
            Self::BudgetImbalanced => "budget_imbalanced",
        }
    }
}

/// Totals posted during one settlement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, Tsify)]
pub struct SettlementSummary {
    pub seller_revenue: f64,
    pub buyer_payment: f64,
    /// Absorbed by the market maker.
    pub residual: f64,
    pub quantity: Quantity,
}

/// Signed energy per agent for one step: negative sold, positive bought.
pub type NetQuantities = HashMap<AgentId, Vec<Quantity>>;

// === LEDGER ===

/// Scoped writer for one step's settlement.
///
/// Opened after clearing, consumed by [`SettlementLedger::close`], which resets
/// every agent's energy trade flux for the next step.
pub struct SettlementLedger<'a> {
    registry: &'a mut AgentRegistry,
    market_maker: &'a mut Wallet,
    step: Step,
    net: NetQuantities,
}

impl<'a> SettlementLedger<'a> {
    pub fn open(registry: &'a mut AgentRegistry, market_maker: &'a mut Wallet, step: Step) -> Self {
        let net = registry.ids().map(|id| (id.clone(), Vec::new())).collect();
        Self {
            registry,
            market_maker,
            step,
            net,
        }
    }

    /// Post every pair, or none of them if any pair is rejected.
    pub fn settle(
        &mut self,
        pairs: &[TradePair],
        policy: SettlementPolicy,
    ) -> Result<SettlementSummary, MarketError> {
        for pair in pairs {
            self.check(pair, policy)?;
        }

        let mut summary = SettlementSummary::default();
        for pair in pairs {
            let revenue = pair.payment.seller_revenue();
            let payment = pair.payment.buyer_payment();

            let seller = self.registry.lookup_mut(&pair.seller_id)?;
            seller.wallet.settle_revenue(revenue, self.step);
            seller.energy_trade_flux -= pair.quantity;

            let buyer = self.registry.lookup_mut(&pair.buyer_id)?;
            buyer.wallet.settle_payment(payment, self.step);
            buyer.energy_trade_flux += pair.quantity;

            let residual = payment - revenue;
            if residual != 0.0 {
                self.market_maker.settle_revenue(residual, self.step);
            }

            self.net
                .entry(pair.seller_id.clone())
                .or_default()
                .push(-pair.quantity);
            self.net
                .entry(pair.buyer_id.clone())
                .or_default()
                .push(pair.quantity);

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "settlement",
                step = self.step,
                seller = pair.seller_id.as_str(),
                buyer = pair.buyer_id.as_str(),
                quantity = pair.quantity,
                seller_revenue = revenue,
                buyer_payment = payment,
                residual = residual,
            );

            summary.seller_revenue += revenue;
            summary.buyer_payment += payment;
            summary.residual += residual;
            summary.quantity += pair.quantity;
        }
        Ok(summary)
    }

    fn check(&self, pair: &TradePair, policy: SettlementPolicy) -> Result<(), MarketError> {
        if pair.seller_id == pair.buyer_id {
            return Err(MarketError::SelfTrade {
                agent: pair.seller_id.clone(),
            });
        }
        if pair.quantity.is_nan() || pair.quantity <= 0.0 {
            return Err(MarketError::NonPositiveTradeQuantity {
                seller: pair.seller_id.clone(),
                buyer: pair.buyer_id.clone(),
                quantity: pair.quantity,
            });
        }
        match (policy, pair.payment) {
            (SettlementPolicy::BudgetBalanced, Payment::Imbalanced { .. }) => {
                return Err(MarketError::MalformedTradePair {
                    rule: policy.as_str(),
                    reason: format!(
                        "pair {} -> {} carries separate revenue and payment",
                        pair.seller_id, pair.buyer_id
                    ),
                });
            }
            (
                SettlementPolicy::BudgetImbalanced,
                Payment::Imbalanced {
                    seller_revenue,
                    buyer_payment,
                },
            ) if buyer_payment < seller_revenue => {
                return Err(MarketError::BudgetImbalanceViolated {
                    seller_revenue,
                    buyer_payment,
                });
            }
            _ => {}
        }
        for id in [&pair.seller_id, &pair.buyer_id] {
            if !self.registry.contains(id) {
                return Err(MarketError::UnknownAgent(id.clone()));
            }
        }
        Ok(())
    }

    /// Finish the step: reset transient flux and hand back the net quantities.
    pub fn close(self) -> NetQuantities {
        self.registry.reset_energy_flux();
        self.net
    }
}
