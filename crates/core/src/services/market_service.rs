use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::traits::BackendApi;
use crate::errors::CoreError;
use crate::models::settings::Settings;
use crate::models::stock::Stock;

/// Stock list, detail and search over the backend.
///
/// Nothing is cached: every call goes to the backend. Cheap to clone.
#[derive(Clone)]
pub struct MarketService {
    backend: Arc<dyn BackendApi>,
    settings: Arc<Settings>,
}

impl MarketService {
    pub fn new(backend: Arc<dyn BackendApi>, settings: Arc<Settings>) -> Self {
        Self { backend, settings }
    }

    /// Full stock list with prices.
    ///
    /// Fetches the bare list, then every ticker's detail concurrently. A
    /// failed detail keeps the bare entry rather than failing the list.
    pub async fn list_stocks(&self) -> Result<Vec<Stock>, CoreError> {
        let list = self.backend.list_stocks().await?;
        let details = join_all(list.iter().map(|s| self.backend.stock(&s.ticker))).await;

        Ok(list
            .into_iter()
            .zip(details)
            .map(|(bare, detail)| match detail {
                Ok(detail) => bare.merged_with(detail),
                Err(e) => {
                    warn!(ticker = %bare.ticker, error = %e, "stock detail unavailable");
                    bare
                }
            })
            .collect())
    }

    pub async fn stock(&self, ticker: &str) -> Result<Stock, CoreError> {
        let ticker = ticker.trim();
        if ticker.is_empty() {
            return Err(CoreError::ValidationError("Ticker must not be empty".into()));
        }
        self.backend.stock(ticker).await
    }

    /// Search by name or ticker. Queries shorter than `search_min_chars`
    /// return nothing without contacting the backend.
    pub async fn search(&self, query: &str) -> Result<Vec<Stock>, CoreError> {
        let query = query.trim();
        if query.chars().count() < self.settings.search_min_chars {
            return Ok(Vec::new());
        }
        self.backend.search(query).await
    }

    /// Map user input to a listed ticker: an exact detail hit, else an exact
    /// ticker match among search results, else the first search result.
    pub async fn resolve_ticker(&self, raw: &str) -> Result<Option<String>, CoreError> {
        let wanted = raw.trim().to_uppercase();
        if wanted.is_empty() {
            return Ok(None);
        }

        match self.backend.stock(&wanted).await {
            Ok(stock) => {
                let ticker = if stock.ticker.trim().is_empty() {
                    wanted
                } else {
                    stock.ticker.to_uppercase()
                };
                return Ok(Some(ticker));
            }
            Err(e) if e.allows_offline_fallback() => return Err(e),
            Err(e) => debug!(ticker = %wanted, error = %e, "no exact stock hit, searching"),
        }

        let hits = self.backend.search(raw.trim()).await?;
        let exact = hits.iter().find(|s| s.ticker.eq_ignore_ascii_case(&wanted));
        Ok(exact
            .or_else(|| hits.first())
            .map(|s| s.ticker.to_uppercase()))
    }

    /// Current price of a ticker, `None` if the backend reports no usable price.
    pub async fn live_price(&self, ticker: &str) -> Result<Option<f64>, CoreError> {
        Ok(self.stock(ticker).await?.live_price())
    }

    /// Debounced search-as-you-type: each keystroke replaces the pending
    /// query; results land on the debouncer's channel. Errors yield an
    /// empty result list.
    pub fn search_as_you_type(&self, debouncer: &Debouncer<Vec<Stock>>, query: &str) {
        let market = self.clone();
        let query = query.to_string();
        debouncer.submit(async move {
            market.search(&query).await.unwrap_or_else(|e| {
                warn!(%query, error = %e, "search failed");
                Vec::new()
            })
        });
    }

    /// Debounced price autofill for the trade form.
    pub fn autofill_price(&self, debouncer: &Debouncer<Option<f64>>, ticker: &str) {
        let market = self.clone();
        let ticker = ticker.to_string();
        debouncer.submit(async move {
            match market.resolve_ticker(&ticker).await {
                Ok(Some(resolved)) => market.live_price(&resolved).await.ok().flatten(),
                Ok(None) => None,
                Err(e) => {
                    warn!(%ticker, error = %e, "price autofill failed");
                    None
                }
            }
        });
    }

    #[must_use]
    pub fn debouncer<T: Clone + Send + Sync + 'static>(&self) -> Debouncer<T> {
        Debouncer::new(self.settings.debounce())
    }
}

/// Runs only the most recent of a burst of submissions.
///
/// Each [`Debouncer::submit`] waits `delay`, then runs its future and
/// publishes the output on a `watch` channel. A new submission aborts the
/// pending one, whether it is still waiting or already in flight.
pub struct Debouncer<T> {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            delay,
            pending: Mutex::new(None),
            tx: Arc::new(tx),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let delay = self.delay;
        let tx = Arc::clone(&self.tx);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let value = work.await;
            tx.send_replace(Some(value));
        });

        match self.pending.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(handle) {
                    previous.abort();
                }
            }
            Err(_) => warn!("debouncer lock poisoned; previous submission not cancelled"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }

    /// Most recently published result.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.tx.borrow().clone()
    }
}

impl<T> Debouncer<T> {
    /// Abort the pending submission, if any.
    pub fn cancel(&self) {
        if let Ok(mut slot) = self.pending.lock() {
            if let Some(previous) = slot.take() {
                previous.abort();
            }
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
