use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::traits::BackendApi;
use crate::backend::types::TradeBody;
use crate::errors::CoreError;
use crate::events::EventBus;
use crate::models::event::PortfolioEvent;
use crate::models::portfolio::PortfolioId;
use crate::models::summary::PortfolioSummary;
use crate::models::transaction::{TradeRequest, Transaction};
use crate::storage::manager::StorageManager;

use super::portfolio_service::PortfolioService;

/// How a trade was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Executed by the backend; the stored summary mirrors it.
    Server,
    /// Applied to the local summary only and queued for reconciliation.
    Simulated,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Server => write!(f, "server"),
            ExecutionMode::Simulated => write!(f, "simulated"),
        }
    }
}

/// Result of [`TradeService::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOutcome {
    pub mode: ExecutionMode,
    pub request: TradeRequest,
    /// Server record if the backend returned one; always present when simulated.
    pub transaction: Option<Transaction>,
    /// Stored summary after the trade.
    pub summary: PortfolioSummary,
}

impl TradeOutcome {
    /// One-line confirmation for the user.
    #[must_use]
    pub fn message(&self) -> String {
        let r = &self.request;
        match self.mode {
            ExecutionMode::Server => format!(
                "Trade executed (server): {} {} {} @ ₹{:.2}",
                r.side, r.quantity, r.ticker, r.price
            ),
            ExecutionMode::Simulated => format!(
                "Simulated trade executed: {} {} {} @ ₹{:.2}",
                r.side, r.quantity, r.ticker, r.price
            ),
        }
    }
}

/// Queued trade the backend refused during reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedTrade {
    pub request: TradeRequest,
    pub reason: String,
}

/// Result of replaying a portfolio's offline outbox.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileReport {
    pub portfolio_id: PortfolioId,
    pub submitted: usize,
    pub rejected: Vec<RejectedTrade>,
    /// Trades still queued because the backend became unavailable.
    pub remaining: usize,
    /// Why replay stopped early, if it did.
    pub stopped: Option<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Executes trades: server first, simulated locally when the backend cannot
/// serve the caller (401 or transport failure).
pub struct TradeService {
    backend: Arc<dyn BackendApi>,
    storage: StorageManager,
    events: EventBus,
    ledger: PortfolioService,
}

impl TradeService {
    pub fn new(backend: Arc<dyn BackendApi>, storage: StorageManager, events: EventBus) -> Self {
        Self {
            backend,
            storage,
            events,
            ledger: PortfolioService::new(),
        }
    }

    /// Execute a trade.
    ///
    /// Validation, the BUY cash check and the SELL share check run before
    /// anything is sent, so a rejected request changes nothing. Backend errors other than 401 and
    /// transport failures are returned as-is.
    pub async fn execute(&self, request: TradeRequest) -> Result<TradeOutcome, CoreError> {
        self.ledger.validate(&request)?;
        let current = self.storage.summary_or_default(request.portfolio_id)?;
        self.ledger.check_affordable(&current, &request)?;
        self.ledger.check_sellable(&current, &request)?;

        let body = TradeBody {
            ticker: request.ticker.clone(),
            side: request.side,
            quantity: request.quantity,
            price: request.price,
        };

        match self.backend.trade(request.portfolio_id, &body).await {
            Ok(resp) => self.settle_server_trade(request, resp.transaction).await,
            Err(e) if e.allows_offline_fallback() => {
                warn!(
                    portfolio_id = request.portfolio_id,
                    ticker = %request.ticker,
                    error = %e,
                    "backend unavailable, simulating trade locally"
                );
                self.simulate(request)
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_server_trade(
        &self,
        request: TradeRequest,
        transaction: Option<Transaction>,
    ) -> Result<TradeOutcome, CoreError> {
        let id = request.portfolio_id;
        let server_holdings = match self.backend.holdings(id).await {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(portfolio_id = id, error = %e, "could not refresh holdings after trade");
                None
            }
        };

        let ((), summary) = self.storage.update_summary(id, |s| {
            s.cash = self.ledger.settle_cash(s.cash, &request);
            if let Some(holdings) = &server_holdings {
                s.holdings = holdings.clone();
                s.normalize();
            }
            Ok(())
        })?;
        self.storage.set_sim_cash(id, summary.cash)?;

        info!(
            portfolio_id = id,
            side = %request.side,
            ticker = %request.ticker,
            quantity = request.quantity,
            price = request.price,
            "trade executed by backend"
        );
        self.events.publish(PortfolioEvent::Updated { portfolio_id: id });

        Ok(TradeOutcome {
            mode: ExecutionMode::Server,
            request,
            transaction,
            summary,
        })
    }

    fn simulate(&self, request: TradeRequest) -> Result<TradeOutcome, CoreError> {
        let id = request.portfolio_id;
        let ((), summary) = self
            .storage
            .update_summary(id, |s| self.ledger.apply_trade(s, &request))?;
        self.storage.set_sim_cash(id, summary.cash)?;
        self.storage.push_offline_trade(&request)?;

        let transaction = Transaction::simulated(
            id,
            &request.ticker,
            request.side,
            request.quantity,
            request.price,
        );
        info!(
            portfolio_id = id,
            side = %request.side,
            ticker = %request.ticker,
            quantity = request.quantity,
            price = request.price,
            cash = summary.cash,
            "trade simulated locally"
        );
        self.events.publish(PortfolioEvent::Updated { portfolio_id: id });

        Ok(TradeOutcome {
            mode: ExecutionMode::Simulated,
            request,
            transaction: Some(transaction),
            summary,
        })
    }

    /// Trades simulated while offline and not yet replayed.
    pub fn pending_offline_trades(&self, portfolio_id: PortfolioId) -> Result<Vec<TradeRequest>, CoreError> {
        self.storage.offline_trades(portfolio_id)
    }

    /// Replay the offline outbox to the backend, oldest first.
    ///
    /// Accepted trades leave the queue. A trade the backend rejects is
    /// dropped, reported, and backed out of the local summary. A 401 or
    /// transport failure stops the replay and keeps the rest queued. The
    /// local summary already reflects every accepted trade, so their cash is
    /// not adjusted again; holdings are refreshed from the backend when
    /// anything was accepted.
    pub async fn reconcile(&self, portfolio_id: PortfolioId) -> Result<ReconcileReport, CoreError> {
        let queue = self.storage.offline_trades(portfolio_id)?;
        let mut report = ReconcileReport {
            portfolio_id,
            ..ReconcileReport::default()
        };
        if queue.is_empty() {
            return Ok(report);
        }

        let mut processed = 0;
        for request in &queue {
            let body = TradeBody {
                ticker: request.ticker.clone(),
                side: request.side,
                quantity: request.quantity,
                price: request.price,
            };
            match self.backend.trade(portfolio_id, &body).await {
                Ok(_) => report.submitted += 1,
                Err(e) if e.allows_offline_fallback() => {
                    report.stopped = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(portfolio_id, ticker = %request.ticker, error = %e, "queued trade rejected");
                    report.rejected.push(RejectedTrade {
                        request: request.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            processed += 1;
        }

        // Re-read so trades queued while replaying are kept.
        let mut current = self.storage.offline_trades(portfolio_id)?;
        current.drain(..processed.min(current.len()));
        report.remaining = current.len();
        self.storage.save_offline_trades(portfolio_id, &current)?;

        let server_holdings = if report.submitted > 0 {
            match self.backend.holdings(portfolio_id).await {
                Ok(holdings) => Some(holdings),
                Err(e) => {
                    warn!(portfolio_id, error = %e, "could not refresh holdings after reconcile");
                    None
                }
            }
        } else {
            None
        };

        if server_holdings.is_some() || !report.rejected.is_empty() {
            let ((), summary) = self.storage.update_summary(portfolio_id, |s| {
                // Newest first, so each reversal sees the state its trade left.
                for rejected in report.rejected.iter().rev() {
                    s.cash = self.ledger.reverse_cash(s.cash, &rejected.request);
                }
                match &server_holdings {
                    // The backend never saw the rejected trades.
                    Some(holdings) => s.holdings = holdings.clone(),
                    None => {
                        for rejected in report.rejected.iter().rev() {
                            self.ledger.reverse_holding(s, &rejected.request);
                        }
                    }
                }
                s.normalize();
                Ok(())
            })?;
            self.storage.set_sim_cash(portfolio_id, summary.cash)?;
        }

        info!(
            portfolio_id,
            submitted = report.submitted,
            rejected = report.rejected.len(),
            remaining = report.remaining,
            "offline trades reconciled"
        );
        self.events.publish(PortfolioEvent::Reconciled {
            portfolio_id,
            submitted: report.submitted,
        });
        Ok(report)
    }
}
