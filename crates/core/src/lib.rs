pub mod backend;
pub mod errors;
pub mod events;
pub mod models;
pub mod services;
pub mod storage;
pub mod telemetry;

use rand::Rng;
use std::sync::Arc;

use backend::http::HttpBackend;
use backend::traits::BackendApi;
use errors::CoreError;
use events::EventBus;
use models::{
    event::PortfolioEvent,
    message::{CoachScope, Message},
    portfolio::{DataSource, PortfolioDetail, PortfolioId, PortfolioInfo, PortfolioListing},
    settings::Settings,
    stock::Stock,
    summary::PortfolioSummary,
    transaction::{TradeRequest, TradeSide},
};
use services::{
    auth_service::{AuthService, SessionState},
    coach_service::CoachService,
    directory_service::PortfolioDirectory,
    holdings_service::HoldingsService,
    learn_service::{LearnService, QuizAttempt},
    market_service::MarketService,
    trade_service::{ReconcileReport, TradeOutcome, TradeService},
};
use storage::{manager::StorageManager, memory::MemoryStore, traits::KeyValueStore};
use tokio::sync::broadcast;

/// Main entry point of the paper-trading client library.
///
/// Owns one store, one backend and one event bus, shared by every service.
#[must_use]
pub struct TradeDesk {
    settings: Arc<Settings>,
    storage: StorageManager,
    backend: Arc<dyn BackendApi>,
    events: EventBus,
    auth: AuthService,
    market: MarketService,
    directory: PortfolioDirectory,
    holdings: HoldingsService,
    trades: TradeService,
    coach: CoachService,
    learn: LearnService,
}

impl std::fmt::Debug for TradeDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeDesk")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

impl TradeDesk {
    pub fn new(settings: Settings, store: Arc<dyn KeyValueStore>, backend: Arc<dyn BackendApi>) -> Result<Self, CoreError> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let storage = StorageManager::new(store, settings.default_cash);
        let events = EventBus::new();
        let market = MarketService::new(Arc::clone(&backend), Arc::clone(&settings));

        Ok(Self {
            auth: AuthService::new(Arc::clone(&backend), storage.clone()),
            directory: PortfolioDirectory::new(Arc::clone(&backend), storage.clone()),
            holdings: HoldingsService::new(
                Arc::clone(&backend),
                storage.clone(),
                events.clone(),
                market.clone(),
            ),
            trades: TradeService::new(Arc::clone(&backend), storage.clone(), events.clone()),
            coach: CoachService::new(Arc::clone(&backend), storage.clone(), Arc::clone(&settings)),
            learn: LearnService::new(storage.clone(), Arc::clone(&settings)),
            market,
            settings,
            storage,
            backend,
            events,
        })
    }

    /// Desk over a process-local store.
    pub fn in_memory(settings: Settings, backend: Arc<dyn BackendApi>) -> Result<Self, CoreError> {
        Self::new(settings, Arc::new(MemoryStore::new()), backend)
    }

    /// Desk talking to the backend at `settings.api_base`.
    pub fn connect(settings: Settings, store: Arc<dyn KeyValueStore>) -> Result<Self, CoreError> {
        let backend: Arc<dyn BackendApi> = Arc::new(HttpBackend::new(&settings)?);
        Self::new(settings, store, backend)
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PortfolioEvent> {
        self.events.subscribe()
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn market(&self) -> &MarketService {
        &self.market
    }

    pub fn directory(&self) -> &PortfolioDirectory {
        &self.directory
    }

    pub fn holdings(&self) -> &HoldingsService {
        &self.holdings
    }

    pub fn trades(&self) -> &TradeService {
        &self.trades
    }

    pub fn coach(&self) -> &CoachService {
        &self.coach
    }

    pub fn learn(&self) -> &LearnService {
        &self.learn
    }

    // ── Session ─────────────────────────────────────────────────────

    pub async fn verify_session(&self) -> Result<SessionState, CoreError> {
        self.auth.verify().await
    }

    // ── Market ──────────────────────────────────────────────────────

    pub async fn stocks(&self) -> Result<Vec<Stock>, CoreError> {
        self.market.list_stocks().await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Stock>, CoreError> {
        self.market.search(query).await
    }

    // ── Portfolios ──────────────────────────────────────────────────

    pub async fn portfolios(&self) -> Result<PortfolioListing, CoreError> {
        self.directory.list().await
    }

    pub async fn create_portfolio(&self, name: &str) -> Result<(PortfolioInfo, DataSource), CoreError> {
        self.directory.create(name).await
    }

    pub async fn portfolio_detail(&self, id: PortfolioId) -> Result<PortfolioDetail, CoreError> {
        self.holdings.load_detail(id).await
    }

    pub fn set_cash(&self, id: PortfolioId, cash: f64) -> Result<PortfolioSummary, CoreError> {
        self.holdings.set_cash(id, cash)
    }

    pub async fn delete_portfolio(&self, id: PortfolioId) -> Result<(), CoreError> {
        self.holdings.delete_portfolio(id).await
    }

    // ── Trading ─────────────────────────────────────────────────────

    pub async fn trade(
        &self,
        id: PortfolioId,
        ticker: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> Result<TradeOutcome, CoreError> {
        self.trades
            .execute(TradeRequest::new(id, ticker, side, quantity, price))
            .await
    }

    /// Trade at the live price, resolving free-form ticker input first.
    pub async fn trade_at_market(
        &self,
        id: PortfolioId,
        ticker: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<TradeOutcome, CoreError> {
        let resolved = self
            .market
            .resolve_ticker(ticker)
            .await?
            .ok_or_else(|| CoreError::TickerNotFound(ticker.trim().to_string()))?;
        let price = self
            .market
            .live_price(&resolved)
            .await?
            .ok_or_else(|| CoreError::ValidationError(format!("No live price for {resolved}")))?;
        self.trade(id, &resolved, side, quantity, price).await
    }

    pub async fn reconcile(&self, id: PortfolioId) -> Result<ReconcileReport, CoreError> {
        self.trades.reconcile(id).await
    }

    // ── Coach ───────────────────────────────────────────────────────

    pub async fn ask_coach(&self, scope: CoachScope, text: &str) -> Result<Message, CoreError> {
        self.coach.send(scope, text).await
    }

    // ── Learn ───────────────────────────────────────────────────────

    pub fn start_quiz<R: Rng + ?Sized>(&self, lesson_id: u32, rng: &mut R) -> Result<QuizAttempt, CoreError> {
        self.learn.start_attempt(lesson_id, rng)
    }
}
