use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::traits::BackendApi;
use crate::backend::types::{CoachChatRequest, CoachLogEntry, CoachPortfolioSnapshot, CoachTurn};
use crate::errors::CoreError;
use crate::models::message::{CoachScope, Message};
use crate::models::portfolio::PortfolioId;
use crate::models::settings::Settings;
use crate::models::summary::{Holding, PortfolioSummary};
use crate::storage::manager::StorageManager;

/// Shown when the backend answers without any reply text.
pub const NO_RESPONSE_TEXT: &str = "⚠️ No response from server.";

/// Greeting shown at the top of a fresh conversation. Not persisted.
pub const INTRO_TEXT: &str = "👋 Hi, I'm your AI Smart Coach, here to give clear and practical investing insights.\n\n\
You can say things like:\n\
- \"How am I doing this week?\"\n\
- \"TCS 3500 3600 (10 shares)\"\n\
- \"How to avoid FOMO in trading?\"";

/// Canned prompts offered next to the input.
pub const QUICK_PROMPTS: [&str; 3] = [
    "How am I doing this week?",
    "Rate my performance this month.",
    "How to avoid panic selling?",
];

/// Chat with the backend coach. One request per message, no retries.
pub struct CoachService {
    backend: Arc<dyn BackendApi>,
    storage: StorageManager,
    settings: Arc<Settings>,
}

impl CoachService {
    pub fn new(backend: Arc<dyn BackendApi>, storage: StorageManager, settings: Arc<Settings>) -> Self {
        Self {
            backend,
            storage,
            settings,
        }
    }

    /// Send a message with the stored summary of the conversation's
    /// portfolio as context. Returns the assistant's reply.
    pub async fn send(&self, scope: CoachScope, text: &str) -> Result<Message, CoreError> {
        let summary = self
            .resolve_summary(scope)?
            .map(|(_, s)| s)
            .unwrap_or_default();
        self.send_with_summary(scope, text, &summary).await
    }

    /// Send a message with an explicit portfolio snapshot.
    ///
    /// Failures never surface as `Err`: a transport failure or a backend
    /// error becomes a synthetic assistant message. Only an empty message or
    /// a storage failure is an error.
    pub async fn send_with_summary(
        &self,
        scope: CoachScope,
        text: &str,
        summary: &PortfolioSummary,
    ) -> Result<Message, CoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::ValidationError("Message must not be empty".into()));
        }

        let mut history = self.storage.coach_history(scope)?;
        let window = self.settings.coach_context_window;
        let context: Vec<CoachTurn> = history[history.len().saturating_sub(window)..]
            .iter()
            .map(|m| CoachTurn {
                role: m.role.to_string(),
                text: m.text.clone(),
            })
            .collect();

        history.push(Message::user(text));

        let request = CoachChatRequest {
            message: text.to_string(),
            portfolio_summary: CoachPortfolioSnapshot {
                cash: summary.cash,
                holdings: summary.holdings.clone(),
            },
            portfolio_id: scope.portfolio_id(),
            history: context,
        };

        let reply_text = match self.backend.coach_chat(&request).await {
            Ok(resp) => resp.text().unwrap_or_else(|| NO_RESPONSE_TEXT.to_string()),
            Err(CoreError::Network(msg)) => {
                warn!(%scope, error = %msg, "coach request failed");
                format!("⚠️ Network error: {msg}")
            }
            Err(e) => {
                warn!(%scope, error = %e, "coach request rejected");
                format!("⚠️ {e}")
            }
        };

        let reply = Message::assistant(reply_text);
        history.push(reply.clone());
        self.storage
            .save_coach_history(scope, &history, self.settings.coach_history_cap)?;
        debug!(%scope, messages = history.len(), "coach history saved");
        Ok(reply)
    }

    /// Summary the coach should see: the conversation's own portfolio, else
    /// the last viewed one, else the highest stored portfolio id.
    pub fn resolve_summary(&self, scope: CoachScope) -> Result<Option<(PortfolioId, PortfolioSummary)>, CoreError> {
        if let CoachScope::Portfolio(id) = scope {
            return Ok(Some((id, self.storage.summary_or_default(id)?)));
        }

        if let Some(id) = self.storage.last_summary_id()? {
            if let Some(summary) = self.storage.summary(id)? {
                return Ok(Some((id, summary)));
            }
            debug!(portfolio_id = id, "last-viewed pointer has no summary");
        }

        for id in self.storage.summary_ids()?.into_iter().rev() {
            if let Some(summary) = self.storage.summary(id)? {
                return Ok(Some((id, summary)));
            }
        }
        Ok(None)
    }

    /// Conversation logs the backend saved.
    pub async fn saved_logs(&self, portfolio_id: Option<PortfolioId>) -> Result<Vec<CoachLogEntry>, CoreError> {
        self.backend.coach_logs(portfolio_id).await
    }

    pub fn history(&self, scope: CoachScope) -> Result<Vec<Message>, CoreError> {
        self.storage.coach_history(scope)
    }

    pub fn clear_history(&self, scope: CoachScope) -> Result<(), CoreError> {
        self.storage.clear_coach_history(scope)
    }
}

/// Parse free-form holdings, one per line: `TICKER QTY [AVG_COST [PRICE]]`,
/// separated by whitespace or commas. Lines without a positive quantity are
/// skipped; a missing price defaults to the average cost.
pub fn parse_holdings_text(text: &str) -> Vec<Holding> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() < 2 {
                return None;
            }
            let quantity = parse_number(parts[1]);
            if quantity <= 0.0 {
                return None;
            }
            let avg_cost = parts.get(2).map_or(0.0, |p| parse_number(p));
            let current_price = parts.get(3).map_or(avg_cost, |p| parse_number(p));
            let mut holding = Holding::new(parts[0], quantity, avg_cost);
            holding.current_price = current_price;
            Some(holding)
        })
        .collect()
}

/// Inverse of [`parse_holdings_text`].
pub fn format_holdings_text(holdings: &[Holding]) -> String {
    holdings
        .iter()
        .map(|h| format!("{} {} {} {}", h.ticker, h.quantity, h.avg_cost, h.current_price))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_number(raw: &str) -> f64 {
    raw.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}
