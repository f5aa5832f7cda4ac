use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::models::lesson::ProgressEntry;
use crate::models::message::{CoachScope, Message};
use crate::models::portfolio::{PortfolioId, PortfolioInfo};
use crate::models::summary::PortfolioSummary;
use crate::models::transaction::TradeRequest;

use super::keys;
use super::traits::KeyValueStore;

/// Attempts at a checked summary update before reporting a conflict.
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Typed access to everything the client keeps in its key/value store.
///
/// Unreadable entries are treated as absent (and logged), matching how the
/// browser client tolerated hand-edited or stale local storage.
#[derive(Clone)]
pub struct StorageManager {
    store: Arc<dyn KeyValueStore>,
    default_cash: f64,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("default_cash", &self.default_cash)
            .finish_non_exhaustive()
    }
}

impl StorageManager {
    pub fn new(store: Arc<dyn KeyValueStore>, default_cash: f64) -> Self {
        Self { store, default_cash }
    }

    /// The underlying raw store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    #[must_use]
    pub fn default_cash(&self) -> f64 {
        self.default_cash
    }

    // ── Generic JSON helpers ────────────────────────────────────────

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable store entry");
                Ok(None)
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CoreError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize '{key}': {e}")))?;
        self.store.set(key, &raw)
    }

    // ── Portfolio summaries ─────────────────────────────────────────

    /// Stored summary for a portfolio, if any.
    pub fn summary(&self, id: PortfolioId) -> Result<Option<PortfolioSummary>, CoreError> {
        Ok(self
            .read_json::<PortfolioSummary>(&keys::portfolio_summary(id))?
            .map(|mut s| {
                s.normalize();
                s
            }))
    }

    /// Stored summary, or a fresh one seeded with the portfolio's simulated
    /// cash (or the configured default).
    pub fn summary_or_default(&self, id: PortfolioId) -> Result<PortfolioSummary, CoreError> {
        match self.summary(id)? {
            Some(s) => Ok(s),
            None => Ok(PortfolioSummary::with_cash(self.effective_cash(id)?)),
        }
    }

    /// Overwrite a summary wholesale and move the last-viewed pointer to it.
    /// Last writer wins; use [`StorageManager::update_summary`] for
    /// read-modify-write changes.
    pub fn save_summary(&self, id: PortfolioId, summary: &mut PortfolioSummary) -> Result<(), CoreError> {
        summary.saved_at = Some(Utc::now());
        let key = keys::portfolio_summary(id);
        self.write_json(&key, summary)?;
        self.store.set(keys::LAST_SUMMARY_POINTER, &key)?;
        debug!(portfolio_id = id, holdings = summary.holdings.len(), "summary saved");
        Ok(())
    }

    /// Read-modify-write of a summary that detects concurrent writers.
    ///
    /// `apply` runs against the freshly read summary; if the stored value
    /// changed before the write lands, the summary is re-read and `apply`
    /// runs again. An `Err` from `apply` aborts without writing anything.
    pub fn update_summary<T>(
        &self,
        id: PortfolioId,
        mut apply: impl FnMut(&mut PortfolioSummary) -> Result<T, CoreError>,
    ) -> Result<(T, PortfolioSummary), CoreError> {
        let key = keys::portfolio_summary(id);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let raw = self.store.get(&key)?;
            let mut summary = match raw.as_deref().map(|r| serde_json::from_str::<PortfolioSummary>(r)) {
                Some(Ok(mut s)) => {
                    s.normalize();
                    s
                }
                Some(Err(e)) => {
                    warn!(key = %key, error = %e, "replacing unreadable summary");
                    PortfolioSummary::with_cash(self.effective_cash(id)?)
                }
                None => PortfolioSummary::with_cash(self.effective_cash(id)?),
            };

            let out = apply(&mut summary)?;
            summary.saved_at = Some(Utc::now());
            let new_raw = serde_json::to_string(&summary)
                .map_err(|e| CoreError::Serialization(format!("Failed to serialize summary: {e}")))?;

            if self.store.compare_and_swap(&key, raw.as_deref(), &new_raw)? {
                self.store.set(keys::LAST_SUMMARY_POINTER, &key)?;
                return Ok((out, summary));
            }
            debug!(portfolio_id = id, attempt, "summary changed underneath update, retrying");
        }

        Err(CoreError::Conflict(key))
    }

    /// Ids of all portfolios with a stored summary, ascending.
    pub fn summary_ids(&self) -> Result<Vec<PortfolioId>, CoreError> {
        let mut ids: Vec<PortfolioId> = self
            .store
            .keys()?
            .iter()
            .filter_map(|k| keys::parse_summary_key(k))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Portfolio id the last-viewed pointer refers to.
    pub fn last_summary_id(&self) -> Result<Option<PortfolioId>, CoreError> {
        Ok(self
            .store
            .get(keys::LAST_SUMMARY_POINTER)?
            .and_then(|k| keys::parse_summary_key(&k)))
    }

    pub fn set_last_summary(&self, id: PortfolioId) -> Result<(), CoreError> {
        self.store
            .set(keys::LAST_SUMMARY_POINTER, &keys::portfolio_summary(id))
    }

    // ── Simulated cash ──────────────────────────────────────────────

    /// Explicitly stored simulated cash for a portfolio.
    pub fn sim_cash(&self, id: PortfolioId) -> Result<Option<f64>, CoreError> {
        let Some(raw) = self.store.get(&keys::sim_cash(id))? else {
            return Ok(None);
        };
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => {
                warn!(portfolio_id = id, raw = %raw, "ignoring unreadable simulated cash");
                Ok(None)
            }
        }
    }

    pub fn set_sim_cash(&self, id: PortfolioId, cash: f64) -> Result<(), CoreError> {
        self.store.set(&keys::sim_cash(id), &cash.to_string())
    }

    /// Cash to simulate with: stored sim cash, else the summary's cash,
    /// else the configured default.
    pub fn effective_cash(&self, id: PortfolioId) -> Result<f64, CoreError> {
        if let Some(cash) = self.sim_cash(id)? {
            return Ok(cash);
        }
        if let Some(summary) = self.read_json::<PortfolioSummary>(&keys::portfolio_summary(id))? {
            return Ok(summary.cash.max(0.0));
        }
        Ok(self.default_cash)
    }

    // ── Local portfolio directory ───────────────────────────────────

    pub fn local_portfolios(&self) -> Result<Vec<PortfolioInfo>, CoreError> {
        Ok(self.read_json(keys::LOCAL_PORTFOLIOS)?.unwrap_or_default())
    }

    pub fn save_local_portfolios(&self, list: &[PortfolioInfo]) -> Result<(), CoreError> {
        self.write_json(keys::LOCAL_PORTFOLIOS, list)
    }

    // ── Coach history ───────────────────────────────────────────────

    pub fn coach_history(&self, scope: CoachScope) -> Result<Vec<Message>, CoreError> {
        Ok(self.read_json(&keys::coach_history(scope))?.unwrap_or_default())
    }

    /// Persist the trailing `cap` messages of a conversation.
    pub fn save_coach_history(
        &self,
        scope: CoachScope,
        messages: &[Message],
        cap: usize,
    ) -> Result<(), CoreError> {
        let start = messages.len().saturating_sub(cap);
        self.write_json(&keys::coach_history(scope), &messages[start..])
    }

    pub fn clear_coach_history(&self, scope: CoachScope) -> Result<(), CoreError> {
        self.store.remove(&keys::coach_history(scope))
    }

    // ── Learn progress ──────────────────────────────────────────────

    pub fn learn_progress(&self) -> Result<Vec<ProgressEntry>, CoreError> {
        Ok(self.read_json(keys::LEARN_PROGRESS)?.unwrap_or_default())
    }

    pub fn save_learn_progress(&self, entries: &[ProgressEntry]) -> Result<(), CoreError> {
        self.write_json(keys::LEARN_PROGRESS, entries)
    }

    pub fn clear_learn_progress(&self) -> Result<(), CoreError> {
        self.store.remove(keys::LEARN_PROGRESS)
    }

    // ── Offline trade outbox ────────────────────────────────────────

    pub fn offline_trades(&self, id: PortfolioId) -> Result<Vec<TradeRequest>, CoreError> {
        Ok(self.read_json(&keys::offline_trades(id))?.unwrap_or_default())
    }

    pub fn save_offline_trades(&self, id: PortfolioId, trades: &[TradeRequest]) -> Result<(), CoreError> {
        if trades.is_empty() {
            return self.store.remove(&keys::offline_trades(id));
        }
        self.write_json(&keys::offline_trades(id), trades)
    }

    pub fn push_offline_trade(&self, trade: &TradeRequest) -> Result<(), CoreError> {
        let mut queue = self.offline_trades(trade.portfolio_id)?;
        queue.push(trade.clone());
        self.save_offline_trades(trade.portfolio_id, &queue)
    }

    // ── Auth token ──────────────────────────────────────────────────

    pub fn auth_token(&self) -> Result<Option<String>, CoreError> {
        Ok(self
            .store
            .get(keys::AUTH_TOKEN)?
            .filter(|t| !t.trim().is_empty()))
    }

    pub fn set_auth_token(&self, token: &str) -> Result<(), CoreError> {
        self.store.set(keys::AUTH_TOKEN, token)
    }

    pub fn clear_auth_token(&self) -> Result<(), CoreError> {
        self.store.remove(keys::AUTH_TOKEN)
    }

    // ── Deletion ────────────────────────────────────────────────────

    /// Remove every key tied to a portfolio, including the last-viewed
    /// pointer when it points at it.
    pub fn purge_portfolio(&self, id: PortfolioId) -> Result<(), CoreError> {
        let summary_key = keys::portfolio_summary(id);
        self.store.remove(&summary_key)?;
        self.store.remove(&keys::sim_cash(id))?;
        self.store.remove(&keys::offline_trades(id))?;
        self.store.remove(&keys::coach_history(CoachScope::Portfolio(id)))?;
        if self.store.get(keys::LAST_SUMMARY_POINTER)?.as_deref() == Some(summary_key.as_str()) {
            self.store.remove(keys::LAST_SUMMARY_POINTER)?;
        }

        let mut local = self.local_portfolios()?;
        let before = local.len();
        local.retain(|p| p.id != id);
        if local.len() != before {
            self.save_local_portfolios(&local)?;
        }
        debug!(portfolio_id = id, "portfolio keys purged");
        Ok(())
    }
}
