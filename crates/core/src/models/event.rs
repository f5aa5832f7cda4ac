use serde::{Deserialize, Serialize};

use super::portfolio::PortfolioId;

/// Notification published after any change to a portfolio's stored state.
/// Views holding a copy of that portfolio reload when they see their id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortfolioEvent {
    /// Holdings and/or cash changed (trade executed or simulated)
    Updated { portfolio_id: PortfolioId },

    /// Simulated cash was edited directly
    CashChanged { portfolio_id: PortfolioId, cash: f64 },

    /// Portfolio was deleted and its local keys purged
    Deleted { portfolio_id: PortfolioId },

    /// Queued offline trades were replayed to the backend
    Reconciled {
        portfolio_id: PortfolioId,
        submitted: usize,
    },
}

impl PortfolioEvent {
    #[must_use]
    pub fn portfolio_id(&self) -> PortfolioId {
        match self {
            PortfolioEvent::Updated { portfolio_id }
            | PortfolioEvent::CashChanged { portfolio_id, .. }
            | PortfolioEvent::Deleted { portfolio_id }
            | PortfolioEvent::Reconciled { portfolio_id, .. } => *portfolio_id,
        }
    }

    /// `true` if a view showing `portfolio_id` should reload.
    #[must_use]
    pub fn concerns(&self, portfolio_id: PortfolioId) -> bool {
        self.portfolio_id() == portfolio_id
    }
}
