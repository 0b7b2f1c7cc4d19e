use serde::{Deserialize, Serialize};

use crate::types::{AgentId, Step, step_slot};

// === WALLET ===

/// Step-indexed revenue/payment ledger of one agent.
///
/// Postings only accumulate. Both histories grow on demand, so a wallet never
/// needs to know the session length up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner: AgentId,
    revenue_history: Vec<f64>,
    payment_history: Vec<f64>,
}

impl Wallet {
    pub fn new(owner: impl Into<AgentId>) -> Self {
        Self {
            owner: owner.into(),
            revenue_history: Vec::new(),
            payment_history: Vec::new(),
        }
    }

    pub fn with_steps(mut self, num_steps: usize) -> Self {
        self.revenue_history = vec![0.0; num_steps];
        self.payment_history = vec![0.0; num_steps];
        self
    }

    pub fn settle_revenue(&mut self, amount: f64, step: Step) {
        *step_slot(&mut self.revenue_history, step) += amount;
    }

    pub fn settle_payment(&mut self, amount: f64, step: Step) {
        *step_slot(&mut self.payment_history, step) += amount;
    }

    pub fn revenue_at(&self, step: Step) -> f64 {
        self.revenue_history.get(step).copied().unwrap_or(0.0)
    }

    pub fn payment_at(&self, step: Step) -> f64 {
        self.payment_history.get(step).copied().unwrap_or(0.0)
    }

    pub fn revenue_history(&self) -> &[f64] {
        &self.revenue_history
    }

    pub fn payment_history(&self) -> &[f64] {
        &self.payment_history
    }

    pub fn total_revenue(&self) -> f64 {
        self.revenue_history.iter().sum()
    }

    pub fn total_payment(&self) -> f64 {
        self.payment_history.iter().sum()
    }

    /// Revenue minus payment over the whole history.
    pub fn balance(&self) -> f64 {
        self.total_revenue() - self.total_payment()
    }

    pub fn is_untouched(&self) -> bool {
        self.revenue_history
            .iter()
            .chain(&self.payment_history)
            .all(|v| *v == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postings_accumulate_per_step() {
        let mut wallet = Wallet::new("H1").with_steps(2);
        assert!(wallet.is_untouched());

        wallet.settle_revenue(1.5, 0);
        wallet.settle_revenue(0.5, 0);
        wallet.settle_payment(0.75, 4);

        assert_eq!(wallet.revenue_at(0), 2.0);
        assert_eq!(wallet.payment_at(4), 0.75);
        assert_eq!(wallet.payment_at(9), 0.0);
        assert_eq!(wallet.payment_history().len(), 5);
        assert!((wallet.balance() - 1.25).abs() < 1e-12);
        assert!(!wallet.is_untouched());
    }
}
