use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::traits::BackendApi;
use crate::errors::CoreError;
use crate::events::EventBus;
use crate::models::event::PortfolioEvent;
use crate::models::portfolio::{DataSource, HoldingView, PortfolioDetail, PortfolioId};
use crate::models::summary::{Holding, PortfolioSummary};
use crate::storage::manager::StorageManager;

use super::market_service::MarketService;
use super::portfolio_service::PortfolioService;

/// Portfolio detail view: holdings with live prices, cash edits, deletion.
pub struct HoldingsService {
    backend: Arc<dyn BackendApi>,
    storage: StorageManager,
    events: EventBus,
    market: MarketService,
    ledger: PortfolioService,
}

impl HoldingsService {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        storage: StorageManager,
        events: EventBus,
        market: MarketService,
    ) -> Self {
        Self {
            backend,
            storage,
            events,
            market,
            ledger: PortfolioService::new(),
        }
    }

    /// Holdings from the backend, else from the stored summary, each priced
    /// live. A holding whose price cannot be fetched shows a price of 0.
    pub async fn load_holdings(&self, id: PortfolioId) -> Result<(Vec<HoldingView>, DataSource), CoreError> {
        let (holdings, source) = match self.backend.holdings(id).await {
            Ok(h) => (h, DataSource::Server),
            Err(e) if e.allows_offline_fallback() => {
                warn!(portfolio_id = id, error = %e, "holdings unavailable, using stored summary");
                (self.storage.summary_or_default(id)?.holdings, DataSource::Local)
            }
            Err(e) => return Err(e),
        };

        let mut summary = PortfolioSummary {
            holdings,
            ..PortfolioSummary::default()
        };
        summary.normalize();

        let views = join_all(summary.holdings.iter().map(|h| self.price_holding(h))).await;
        Ok((views, source))
    }

    async fn price_holding(&self, holding: &Holding) -> HoldingView {
        let price = match self.market.resolve_ticker(&holding.ticker).await {
            Ok(Some(resolved)) => self.market.live_price(&resolved).await,
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        let price = match price {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(ticker = %holding.ticker, "no live price");
                0.0
            }
            Err(e) => {
                debug!(ticker = %holding.ticker, error = %e, "live price lookup failed");
                0.0
            }
        };
        HoldingView::new(holding.ticker.clone(), holding.quantity, holding.avg_cost, price)
    }

    /// Everything the detail view shows. The loaded state is written back
    /// to the stored summary and the last-viewed pointer.
    pub async fn load_detail(&self, id: PortfolioId) -> Result<PortfolioDetail, CoreError> {
        let stored = self.storage.summary(id)?;

        let (name, transactions) = match self.backend.portfolio(id).await {
            Ok(env) => (
                env.portfolio.and_then(|p| p.name),
                env.transactions,
            ),
            Err(e) if e.allows_offline_fallback() => {
                warn!(portfolio_id = id, error = %e, "portfolio unavailable, using local data");
                let local_name = self
                    .storage
                    .local_portfolios()?
                    .into_iter()
                    .find(|p| p.id == id)
                    .map(|p| p.name);
                (local_name.or_else(|| stored.as_ref().and_then(|s| s.name.clone())), Vec::new())
            }
            Err(e) => return Err(e),
        };

        let (holdings, source) = self.load_holdings(id).await?;
        let cash = match &stored {
            Some(s) => s.cash,
            None => self.storage.effective_cash(id)?,
        };

        let detail = PortfolioDetail {
            id,
            name,
            cash,
            totals: self.ledger.totals(&holdings),
            coach_counts: self.ledger.coach_class_counts(&transactions),
            holdings,
            transactions,
            source,
        };

        let snapshot: Vec<Holding> = detail.holdings.iter().map(HoldingView::to_holding).collect();
        self.save_summary(id, detail.cash, snapshot, detail.name.clone())?;
        Ok(detail)
    }

    /// Overwrite the stored summary. Last writer wins.
    pub fn save_summary(
        &self,
        id: PortfolioId,
        cash: f64,
        holdings: Vec<Holding>,
        name: Option<String>,
    ) -> Result<PortfolioSummary, CoreError> {
        let mut summary = PortfolioSummary {
            cash,
            holdings,
            name,
            saved_at: None,
        };
        summary.normalize();
        self.storage.save_summary(id, &mut summary)?;
        Ok(summary)
    }

    /// Set the simulated cash balance directly.
    pub fn set_cash(&self, id: PortfolioId, cash: f64) -> Result<PortfolioSummary, CoreError> {
        if !cash.is_finite() || cash < 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Cash must be a non-negative number, got {cash}"
            )));
        }
        let ((), summary) = self.storage.update_summary(id, |s| {
            s.cash = cash;
            Ok(())
        })?;
        self.storage.set_sim_cash(id, cash)?;
        info!(portfolio_id = id, cash, "simulated cash set");
        self.events.publish(PortfolioEvent::CashChanged { portfolio_id: id, cash });
        Ok(summary)
    }

    /// Delete on the backend, then purge every local key of the portfolio.
    ///
    /// A portfolio that only exists in the local directory is purged
    /// locally when the backend cannot serve the request.
    pub async fn delete_portfolio(&self, id: PortfolioId) -> Result<(), CoreError> {
        match self.backend.delete_portfolio(id).await {
            Ok(()) => {}
            Err(e) if e.allows_offline_fallback() && self.is_local_portfolio(id)? => {
                warn!(portfolio_id = id, error = %e, "deleting local-only portfolio");
            }
            Err(e) => return Err(e),
        }

        self.storage.purge_portfolio(id)?;
        info!(portfolio_id = id, "portfolio deleted");
        self.events.publish(PortfolioEvent::Deleted { portfolio_id: id });
        Ok(())
    }

    fn is_local_portfolio(&self, id: PortfolioId) -> Result<bool, CoreError> {
        Ok(self.storage.local_portfolios()?.iter().any(|p| p.id == id))
    }
}
