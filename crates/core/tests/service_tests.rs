// ═══════════════════════════════════════════════════════════════════
// Service Tests — ledger, trade execution and reconciliation, holdings,
// directory, market + debouncing, coach, learn, auth, events
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use papertrade_core::backend::traits::BackendApi;
use papertrade_core::backend::types::{
    AuthResponse, CoachChatRequest, CoachChatResponse, CoachLogEntry, Credentials,
    PortfolioEnvelope, PortfolioHeader, TradeBody, TradeResponse, User,
};
use papertrade_core::errors::CoreError;
use papertrade_core::events::EventBus;
use papertrade_core::models::event::PortfolioEvent;
use papertrade_core::models::message::{CoachScope, Message, Role};
use papertrade_core::models::portfolio::{DataSource, HoldingView, PortfolioId, PortfolioInfo};
use papertrade_core::models::settings::Settings;
use papertrade_core::models::stock::Stock;
use papertrade_core::models::summary::{Holding, PortfolioSummary};
use papertrade_core::models::transaction::{CoachClass, TradeRequest, TradeSide, Transaction};
use papertrade_core::services::auth_service::{AuthService, SessionState};
use papertrade_core::services::coach_service::{self, CoachService, NO_RESPONSE_TEXT};
use papertrade_core::services::directory_service::PortfolioDirectory;
use papertrade_core::services::holdings_service::HoldingsService;
use papertrade_core::services::learn_service::LearnService;
use papertrade_core::services::market_service::{Debouncer, MarketService};
use papertrade_core::services::portfolio_service::PortfolioService;
use papertrade_core::services::trade_service::{ExecutionMode, TradeService};
use papertrade_core::storage::keys;
use papertrade_core::storage::manager::StorageManager;
use papertrade_core::storage::memory::MemoryStore;

// ═══════════════════════════════════════════════════════════════════
// Mock Backend
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Online,
    /// Every call answers 401
    Unauthorized,
    /// Every call fails at the transport level
    Offline,
}

struct MockBackend {
    mode: Mutex<Mode>,
    stocks: Vec<Stock>,
    portfolios: Mutex<Vec<PortfolioInfo>>,
    books: Mutex<HashMap<PortfolioId, PortfolioSummary>>,
    transactions: Mutex<HashMap<PortfolioId, Vec<Transaction>>>,
    rejected_tickers: Mutex<HashSet<String>>,
    unreachable_tickers: Mutex<HashSet<String>>,
    trade_calls: AtomicUsize,
    echo_created: Mutex<bool>,
    coach_reply: Mutex<Option<String>>,
    coach_requests: Mutex<Vec<CoachChatRequest>>,
    session_user: Mutex<Option<User>>,
    valid_token: Mutex<Option<String>>,
    bearer: Mutex<Option<String>>,
}

impl MockBackend {
    fn new() -> Self {
        let priced = |ticker: &str, name: &str, price: Option<f64>| {
            let mut s = Stock::new(ticker, name);
            s.price = price;
            s
        };
        Self {
            mode: Mutex::new(Mode::Online),
            stocks: vec![
                priced("TCS", "Tata Consultancy Services", Some(3500.0)),
                priced("INFY", "Infosys", Some(1500.0)),
                priced("RELIANCE", "Reliance Industries", Some(2500.0)),
                priced("HDFCBANK", "HDFC Bank", None),
            ],
            portfolios: Mutex::new(vec![PortfolioInfo {
                id: 1,
                name: "Main".into(),
                created_at: None,
            }]),
            books: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            rejected_tickers: Mutex::new(HashSet::new()),
            unreachable_tickers: Mutex::new(HashSet::new()),
            trade_calls: AtomicUsize::new(0),
            echo_created: Mutex::new(true),
            coach_reply: Mutex::new(Some("Stay diversified.".into())),
            coach_requests: Mutex::new(Vec::new()),
            session_user: Mutex::new(None),
            valid_token: Mutex::new(None),
            bearer: Mutex::new(None),
        }
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn gate(&self) -> Result<(), CoreError> {
        match *self.mode.lock().unwrap() {
            Mode::Online => Ok(()),
            Mode::Unauthorized => Err(CoreError::Unauthorized),
            Mode::Offline => Err(CoreError::Network("connection refused".into())),
        }
    }

    fn reject(&self, ticker: &str) {
        self.rejected_tickers.lock().unwrap().insert(ticker.to_string());
    }

    fn unreachable(&self, ticker: &str) {
        self.unreachable_tickers.lock().unwrap().insert(ticker.to_string());
    }

    fn seed_holdings(&self, id: PortfolioId, holdings: Vec<Holding>) {
        let mut book = PortfolioSummary::with_cash(1e12);
        book.holdings = holdings;
        self.books.lock().unwrap().insert(id, book);
    }

    fn server_holdings(&self, id: PortfolioId) -> Vec<Holding> {
        self.books
            .lock()
            .unwrap()
            .get(&id)
            .map(|b| b.holdings.clone())
            .unwrap_or_default()
    }

    fn trade_calls(&self) -> usize {
        self.trade_calls.load(Ordering::SeqCst)
    }

    fn bearer(&self) -> Option<String> {
        self.bearer.lock().unwrap().clone()
    }

    fn last_coach_request(&self) -> CoachChatRequest {
        self.coach_requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    fn name(&self) -> &str {
        "MockBackend"
    }

    fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer.lock().unwrap() = token;
    }

    async fn list_stocks(&self) -> Result<Vec<Stock>, CoreError> {
        self.gate()?;
        Ok(self
            .stocks
            .iter()
            .map(|s| Stock::new(s.ticker.clone(), s.name.clone()))
            .collect())
    }

    async fn stock(&self, ticker: &str) -> Result<Stock, CoreError> {
        self.gate()?;
        self.stocks
            .iter()
            .find(|s| s.ticker.eq_ignore_ascii_case(ticker))
            .cloned()
            .ok_or_else(|| CoreError::TickerNotFound(ticker.to_string()))
    }

    async fn search(&self, query: &str) -> Result<Vec<Stock>, CoreError> {
        self.gate()?;
        let q = query.to_lowercase();
        Ok(self
            .stocks
            .iter()
            .filter(|s| s.ticker.to_lowercase().contains(&q) || s.name.to_lowercase().contains(&q))
            .map(|s| Stock::new(s.ticker.clone(), s.name.clone()))
            .collect())
    }

    async fn list_portfolios(&self) -> Result<Vec<PortfolioInfo>, CoreError> {
        self.gate()?;
        Ok(self.portfolios.lock().unwrap().clone())
    }

    async fn create_portfolio(&self, name: &str) -> Result<Option<PortfolioInfo>, CoreError> {
        self.gate()?;
        let mut list = self.portfolios.lock().unwrap();
        let id = list.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let created = PortfolioInfo {
            id,
            name: name.to_string(),
            created_at: None,
        };
        list.push(created.clone());
        Ok(if *self.echo_created.lock().unwrap() { Some(created) } else { None })
    }

    async fn portfolio(&self, id: PortfolioId) -> Result<PortfolioEnvelope, CoreError> {
        self.gate()?;
        let list = self.portfolios.lock().unwrap();
        let info = list
            .iter()
            .find(|p| p.id == id)
            .ok_or(CoreError::PortfolioNotFound(id))?;
        Ok(PortfolioEnvelope {
            portfolio: Some(PortfolioHeader {
                name: Some(info.name.clone()),
            }),
            transactions: self
                .transactions
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn holdings(&self, id: PortfolioId) -> Result<Vec<Holding>, CoreError> {
        self.gate()?;
        Ok(self.server_holdings(id))
    }

    async fn trade(&self, id: PortfolioId, body: &TradeBody) -> Result<TradeResponse, CoreError> {
        self.gate()?;
        let n = self.trade_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unreachable_tickers.lock().unwrap().contains(&body.ticker) {
            return Err(CoreError::Network("connection reset".into()));
        }
        if self.rejected_tickers.lock().unwrap().contains(&body.ticker) {
            return Err(CoreError::Api {
                status: 400,
                message: format!("Market closed for {}", body.ticker),
            });
        }

        let request = TradeRequest::new(id, body.ticker.clone(), body.side, body.quantity, body.price);
        let mut books = self.books.lock().unwrap();
        let book = books
            .entry(id)
            .or_insert_with(|| PortfolioSummary::with_cash(1e12));
        PortfolioService::new()
            .apply_trade(book, &request)
            .map_err(|e| CoreError::Api {
                status: 400,
                message: e.to_string(),
            })?;

        let tx = Transaction {
            id: n.to_string(),
            portfolio_id: Some(id),
            ticker: request.ticker.clone(),
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            timestamp: None,
            coach_class: CoachClass::Normal,
        };
        self.transactions
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push(tx.clone());
        Ok(TradeResponse { transaction: Some(tx) })
    }

    async fn delete_portfolio(&self, id: PortfolioId) -> Result<(), CoreError> {
        self.gate()?;
        let mut list = self.portfolios.lock().unwrap();
        let before = list.len();
        list.retain(|p| p.id != id);
        if list.len() == before {
            return Err(CoreError::PortfolioNotFound(id));
        }
        Ok(())
    }

    async fn coach_chat(&self, request: &CoachChatRequest) -> Result<CoachChatResponse, CoreError> {
        self.gate()?;
        self.coach_requests.lock().unwrap().push(request.clone());
        Ok(CoachChatResponse {
            reply: self.coach_reply.lock().unwrap().clone().map(Value::String),
            ..CoachChatResponse::default()
        })
    }

    async fn coach_logs(&self, portfolio_id: Option<PortfolioId>) -> Result<Vec<CoachLogEntry>, CoreError> {
        self.gate()?;
        Ok(vec![CoachLogEntry {
            role: "assistant".into(),
            text: format!("log for {portfolio_id:?}"),
            ts: None,
        }])
    }

    async fn me(&self) -> Result<User, CoreError> {
        if *self.mode.lock().unwrap() == Mode::Offline {
            return Err(CoreError::Network("connection refused".into()));
        }
        self.session_user
            .lock()
            .unwrap()
            .clone()
            .ok_or(CoreError::Unauthorized)
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, CoreError> {
        self.gate()?;
        if credentials.password != "secret" {
            return Err(CoreError::Api {
                status: 400,
                message: "Invalid credentials".into(),
            });
        }
        let user = User {
            id: Some("1".into()),
            username: Some(credentials.username.clone()),
            email: None,
        };
        *self.session_user.lock().unwrap() = Some(user.clone());
        Ok(AuthResponse {
            token: Some(format!("tok-{}", credentials.username)),
            user: Some(user),
        })
    }

    async fn register(&self, credentials: &Credentials) -> Result<AuthResponse, CoreError> {
        self.gate()?;
        *self.session_user.lock().unwrap() = Some(User {
            id: Some("2".into()),
            username: Some(credentials.username.clone()),
            email: credentials.email.clone(),
        });
        Ok(AuthResponse {
            token: Some(format!("tok-{}", credentials.username)),
            user: None,
        })
    }

    async fn logout(&self) -> Result<(), CoreError> {
        self.gate()?;
        *self.session_user.lock().unwrap() = None;
        Ok(())
    }

    async fn verify_token(&self, token: &str) -> Result<User, CoreError> {
        if *self.mode.lock().unwrap() == Mode::Offline {
            return Err(CoreError::Network("connection refused".into()));
        }
        if self.valid_token.lock().unwrap().as_deref() == Some(token) {
            Ok(User {
                id: Some("7".into()),
                username: Some("asha".into()),
                email: None,
            })
        } else {
            Err(CoreError::Unauthorized)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════

fn test_settings() -> Settings {
    Settings {
        default_cash: 2000.0,
        debounce_ms: 20,
        ..Settings::default()
    }
}

struct Harness {
    backend: Arc<MockBackend>,
    storage: StorageManager,
    events: EventBus,
    settings: Arc<Settings>,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(test_settings())
    }

    fn with_settings(settings: Settings) -> Self {
        let storage = StorageManager::new(Arc::new(MemoryStore::new()), settings.default_cash);
        Self {
            backend: Arc::new(MockBackend::new()),
            storage,
            events: EventBus::new(),
            settings: Arc::new(settings),
        }
    }

    fn api(&self) -> Arc<dyn BackendApi> {
        self.backend.clone()
    }

    fn market(&self) -> MarketService {
        MarketService::new(self.api(), Arc::clone(&self.settings))
    }

    fn trades(&self) -> TradeService {
        TradeService::new(self.api(), self.storage.clone(), self.events.clone())
    }

    fn holdings(&self) -> HoldingsService {
        HoldingsService::new(self.api(), self.storage.clone(), self.events.clone(), self.market())
    }

    fn directory(&self) -> PortfolioDirectory {
        PortfolioDirectory::new(self.api(), self.storage.clone())
    }

    fn coach(&self) -> CoachService {
        CoachService::new(self.api(), self.storage.clone(), Arc::clone(&self.settings))
    }

    fn learn(&self) -> LearnService {
        LearnService::new(self.storage.clone(), Arc::clone(&self.settings))
    }

    fn auth(&self) -> AuthService {
        AuthService::new(self.api(), self.storage.clone())
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ═══════════════════════════════════════════════════════════════════
// PortfolioService (ledger rules)
// ═══════════════════════════════════════════════════════════════════

mod ledger {
    use super::*;

    #[test]
    fn buy_into_empty_portfolio() {
        let svc = PortfolioService::new();
        let mut s = PortfolioSummary::with_cash(2000.0);
        svc.apply_buy(&mut s, "TCS", 10.0, 100.0).unwrap();
        assert_eq!(s.cash, 1000.0);
        assert_eq!(s.holdings.len(), 1);
        assert_eq!(s.holdings[0].ticker, "TCS");
        assert_eq!(s.holdings[0].quantity, 10.0);
        assert_eq!(s.holdings[0].avg_cost, 100.0);
    }

    #[test]
    fn repeated_buys_average_the_cost() {
        let svc = PortfolioService::new();
        let mut s = PortfolioSummary::with_cash(10_000.0);
        svc.apply_buy(&mut s, "TCS", 10.0, 100.0).unwrap();
        svc.apply_buy(&mut s, "tcs", 10.0, 200.0).unwrap();
        assert_eq!(s.holdings.len(), 1);
        assert_eq!(s.holdings[0].quantity, 20.0);
        assert!(close(s.holdings[0].avg_cost, 150.0));
        assert_eq!(s.cash, 7000.0);
    }

    #[test]
    fn selling_everything_removes_the_holding() {
        let svc = PortfolioService::new();
        let mut s = PortfolioSummary::with_cash(0.0);
        s.holdings.push(Holding::new("INFY", 5.0, 1400.0));
        svc.apply_sell(&mut s, "INFY", 5.0, 1500.0).unwrap();
        assert!(s.holdings.is_empty());
        assert_eq!(s.cash, 7500.0);
    }

    #[test]
    fn partial_sell_keeps_average_cost() {
        let svc = PortfolioService::new();
        let mut s = PortfolioSummary::with_cash(0.0);
        s.holdings.push(Holding::new("INFY", 5.0, 1400.0));
        svc.apply_sell(&mut s, "infy", 2.0, 1500.0).unwrap();
        assert_eq!(s.holdings[0].quantity, 3.0);
        assert_eq!(s.holdings[0].avg_cost, 1400.0);
        assert_eq!(s.cash, 3000.0);
    }

    #[test]
    fn insufficient_cash_leaves_state_unchanged() {
        let svc = PortfolioService::new();
        let mut s = PortfolioSummary::with_cash(1000.0);
        s.holdings.push(Holding::new("TCS", 1.0, 100.0));
        let before = s.clone();
        let err = svc.apply_buy(&mut s, "TCS", 11.0, 100.0).unwrap_err();
        match err {
            CoreError::InsufficientCash { needed, available } => {
                assert_eq!(needed, 1100.0);
                assert_eq!(available, 1000.0);
            }
            other => panic!("Expected InsufficientCash, got {:?}", other),
        }
        assert_eq!(s, before);
    }

    #[test]
    fn overselling_leaves_state_unchanged() {
        let svc = PortfolioService::new();
        let mut s = PortfolioSummary::with_cash(50.0);
        s.holdings.push(Holding::new("TCS", 2.0, 100.0));
        let before = s.clone();
        assert!(matches!(
            svc.apply_sell(&mut s, "TCS", 3.0, 100.0),
            Err(CoreError::InsufficientShares { .. })
        ));
        assert!(matches!(
            svc.apply_sell(&mut s, "WIPRO", 1.0, 100.0),
            Err(CoreError::InsufficientShares { .. })
        ));
        assert_eq!(s, before);
    }

    #[test]
    fn validation_rejects_bad_inputs() {
        let svc = PortfolioService::new();
        for req in [
            TradeRequest::buy(1, "", 1.0, 1.0),
            TradeRequest::buy(1, "TCS", 0.0, 1.0),
            TradeRequest::buy(1, "TCS", -1.0, 1.0),
            TradeRequest::buy(1, "TCS", f64::NAN, 1.0),
            TradeRequest::sell(1, "TCS", 1.0, 0.0),
            TradeRequest::sell(1, "TCS", 1.0, f64::INFINITY),
        ] {
            assert!(
                matches!(svc.validate(&req), Err(CoreError::ValidationError(_))),
                "{req:?}"
            );
        }
    }

    #[test]
    fn sells_are_always_affordable() {
        let svc = PortfolioService::new();
        let s = PortfolioSummary::with_cash(0.0);
        assert!(svc.check_affordable(&s, &TradeRequest::sell(1, "TCS", 100.0, 100.0)).is_ok());
    }

    #[test]
    fn settle_cash_never_goes_negative() {
        let svc = PortfolioService::new();
        assert_eq!(svc.settle_cash(50.0, &TradeRequest::buy(1, "X", 1.0, 80.0)), 0.0);
        assert_eq!(svc.settle_cash(50.0, &TradeRequest::sell(1, "X", 1.0, 80.0)), 130.0);
    }

    #[test]
    fn max_buy_quantity_floors() {
        let svc = PortfolioService::new();
        assert_eq!(svc.max_buy_quantity(1000.0, 300.0), 3);
        assert_eq!(svc.max_buy_quantity(1000.0, 0.0), 0);
        assert_eq!(svc.max_buy_quantity(-5.0, 10.0), 0);
    }

    #[test]
    fn totals_sum_value_and_pl() {
        let svc = PortfolioService::new();
        let views = vec![
            HoldingView::new("TCS", 2.0, 3000.0, 3500.0),
            HoldingView::new("INFY", 10.0, 1600.0, 1500.0),
        ];
        let t = svc.totals(&views);
        assert_eq!(t.total_value, 22_000.0);
        assert_eq!(t.total_pl, 0.0);
    }
}

// ═══════════════════════════════════════════════════════════════════
// TradeService — execution
// ═══════════════════════════════════════════════════════════════════

mod trade_execution {
    use super::*;

    #[tokio::test]
    async fn online_trade_is_executed_by_server() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();

        let out = h.trades().execute(TradeRequest::buy(1, "tcs", 10.0, 100.0)).await.unwrap();

        assert_eq!(out.mode, ExecutionMode::Server);
        assert_eq!(out.summary.cash, 1000.0);
        assert_eq!(out.summary.holdings.len(), 1);
        assert_eq!(out.summary.holdings[0].quantity, 10.0);
        assert_eq!(out.transaction.as_ref().map(|t| t.id.as_str()), Some("1"));
        assert_eq!(out.message(), "Trade executed (server): BUY 10 TCS @ ₹100.00");

        assert_eq!(h.storage.summary(1).unwrap().unwrap().cash, 1000.0);
        assert_eq!(h.storage.sim_cash(1).unwrap(), Some(1000.0));
        assert!(h.storage.offline_trades(1).unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap(), PortfolioEvent::Updated { portfolio_id: 1 });
    }

    #[tokio::test]
    async fn offline_trade_is_simulated_and_queued() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Offline);
        let mut rx = h.events.subscribe();

        let out = h.trades().execute(TradeRequest::buy(1, "TCS", 10.0, 100.0)).await.unwrap();

        assert_eq!(out.mode, ExecutionMode::Simulated);
        assert!(out.transaction.as_ref().unwrap().is_local());
        assert_eq!(out.message(), "Simulated trade executed: BUY 10 TCS @ ₹100.00");
        assert_eq!(out.summary.cash, 1000.0);
        assert_eq!(out.summary.holdings[0].avg_cost, 100.0);

        let queued = h.trades().pending_offline_trades(1).unwrap();
        assert_eq!(queued, vec![TradeRequest::buy(1, "TCS", 10.0, 100.0)]);
        assert_eq!(h.storage.sim_cash(1).unwrap(), Some(1000.0));
        assert_eq!(rx.try_recv().unwrap(), PortfolioEvent::Updated { portfolio_id: 1 });
    }

    #[tokio::test]
    async fn unauthorized_trade_is_simulated() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Unauthorized);
        let out = h.trades().execute(TradeRequest::buy(1, "INFY", 1.0, 1500.0)).await.unwrap();
        assert_eq!(out.mode, ExecutionMode::Simulated);
        assert_eq!(out.summary.cash, 500.0);
    }

    #[tokio::test]
    async fn simulated_buys_average_and_sells_remove() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Offline);
        h.holdings().set_cash(1, 10_000.0).unwrap();
        let trades = h.trades();

        trades.execute(TradeRequest::buy(1, "TCS", 10.0, 100.0)).await.unwrap();
        let out = trades.execute(TradeRequest::buy(1, "TCS", 10.0, 200.0)).await.unwrap();
        assert!(close(out.summary.holding("TCS").unwrap().avg_cost, 150.0));
        assert_eq!(out.summary.cash, 7000.0);

        let out = trades.execute(TradeRequest::sell(1, "TCS", 20.0, 120.0)).await.unwrap();
        assert!(out.summary.holdings.is_empty());
        assert_eq!(out.summary.cash, 9400.0);
        assert_eq!(trades.pending_offline_trades(1).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn insufficient_cash_is_rejected_before_sending() {
        let h = Harness::new();
        let err = h
            .trades()
            .execute(TradeRequest::buy(1, "TCS", 30.0, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientCash { .. }));
        assert_eq!(h.backend.trade_calls(), 0);
        assert_eq!(h.storage.summary(1).unwrap(), None);
    }

    #[tokio::test]
    async fn oversell_is_rejected_before_sending() {
        let h = Harness::new();
        let err = h
            .trades()
            .execute(TradeRequest::sell(1, "TCS", 1.0, 100.0))
            .await
            .unwrap_err();
        match err {
            CoreError::InsufficientShares { ticker, requested, held } => {
                assert_eq!(ticker, "TCS");
                assert_eq!(requested, 1.0);
                assert_eq!(held, 0.0);
            }
            other => panic!("Expected InsufficientShares, got {:?}", other),
        }
        assert_eq!(h.backend.trade_calls(), 0);
        assert_eq!(h.storage.summary(1).unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_sending() {
        let h = Harness::new();
        let err = h
            .trades()
            .execute(TradeRequest::buy(1, "TCS", 0.0, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert_eq!(h.backend.trade_calls(), 0);
    }

    #[tokio::test]
    async fn server_rejection_is_returned_verbatim() {
        let h = Harness::new();
        h.backend.reject("TCS");
        let err = h
            .trades()
            .execute(TradeRequest::buy(1, "TCS", 1.0, 100.0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Market closed for TCS");
        assert_eq!(h.storage.summary(1).unwrap(), None);
        assert!(h.storage.offline_trades(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_oversell_changes_nothing() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Offline);
        let err = h
            .trades()
            .execute(TradeRequest::sell(1, "TCS", 1.0, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientShares { .. }));
        assert_eq!(h.storage.summary(1).unwrap(), None);
        assert!(h.storage.offline_trades(1).unwrap().is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// TradeService — reconciliation
// ═══════════════════════════════════════════════════════════════════

mod reconcile {
    use super::*;

    async fn queue(h: &Harness, tickers: &[&str]) {
        h.backend.set_mode(Mode::Offline);
        for t in tickers {
            h.trades().execute(TradeRequest::buy(1, *t, 1.0, 100.0)).await.unwrap();
        }
        h.backend.set_mode(Mode::Online);
    }

    #[tokio::test]
    async fn empty_outbox_is_a_no_op() {
        let h = Harness::new();
        let report = h.trades().reconcile(1).await.unwrap();
        assert_eq!(report.submitted, 0);
        assert!(report.is_complete());
        assert_eq!(h.backend.trade_calls(), 0);
    }

    #[tokio::test]
    async fn replays_and_drops_rejected() {
        let h = Harness::new();
        queue(&h, &["TCS", "RELIANCE", "INFY"]).await;
        h.backend.reject("RELIANCE");
        let mut rx = h.events.subscribe();

        let report = h.trades().reconcile(1).await.unwrap();

        assert_eq!(report.submitted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].request.ticker, "RELIANCE");
        assert_eq!(report.rejected[0].reason, "Market closed for RELIANCE");
        assert_eq!(report.remaining, 0);
        assert!(report.stopped.is_none());
        assert!(report.is_complete());
        assert_eq!(h.storage.store().get(&keys::offline_trades(1)).unwrap(), None);

        // Holdings mirror the server; the rejected buy is refunded.
        let s = h.storage.summary(1).unwrap().unwrap();
        let tickers: Vec<&str> = s.holdings.iter().map(|h| h.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["TCS", "INFY"]);
        assert_eq!(s.cash, 1800.0);
        assert_eq!(h.storage.sim_cash(1).unwrap(), Some(1800.0));

        assert_eq!(
            rx.try_recv().unwrap(),
            PortfolioEvent::Reconciled { portfolio_id: 1, submitted: 2 }
        );
    }

    #[tokio::test]
    async fn sole_rejected_trade_is_backed_out() {
        let h = Harness::new();
        queue(&h, &["RELIANCE"]).await;
        h.backend.reject("RELIANCE");

        let report = h.trades().reconcile(1).await.unwrap();

        assert_eq!(report.submitted, 0);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.remaining, 0);
        assert!(h.trades().pending_offline_trades(1).unwrap().is_empty());

        let s = h.storage.summary(1).unwrap().unwrap();
        assert!(s.holdings.is_empty());
        assert_eq!(s.cash, 2000.0);
        assert_eq!(h.storage.sim_cash(1).unwrap(), Some(2000.0));
        assert!(h.backend.server_holdings(1).is_empty());
    }

    #[tokio::test]
    async fn rejected_sell_restores_shares() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Offline);
        h.trades().execute(TradeRequest::buy(1, "INFY", 2.0, 100.0)).await.unwrap();
        h.trades().execute(TradeRequest::sell(1, "INFY", 2.0, 150.0)).await.unwrap();
        h.backend.set_mode(Mode::Online);
        h.backend.reject("INFY");

        let report = h.trades().reconcile(1).await.unwrap();
        assert_eq!(report.rejected.len(), 2);

        let s = h.storage.summary(1).unwrap().unwrap();
        assert!(s.holdings.is_empty());
        assert_eq!(s.cash, 2000.0);
    }

    #[tokio::test]
    async fn stops_when_backend_drops_out() {
        let h = Harness::new();
        queue(&h, &["TCS", "INFY", "RELIANCE"]).await;
        h.backend.unreachable("INFY");

        let report = h.trades().reconcile(1).await.unwrap();

        assert_eq!(report.submitted, 1);
        assert!(report.rejected.is_empty());
        assert_eq!(report.remaining, 2);
        assert!(report.stopped.as_deref().unwrap().contains("connection reset"));
        assert!(!report.is_complete());

        let pending: Vec<String> = h
            .trades()
            .pending_offline_trades(1)
            .unwrap()
            .into_iter()
            .map(|t| t.ticker)
            .collect();
        assert_eq!(pending, vec!["INFY", "RELIANCE"]);
    }

    #[tokio::test]
    async fn still_offline_keeps_everything() {
        let h = Harness::new();
        queue(&h, &["TCS"]).await;
        h.backend.set_mode(Mode::Offline);
        let report = h.trades().reconcile(1).await.unwrap();
        assert_eq!(report.submitted, 0);
        assert_eq!(report.remaining, 1);
    }
}

// ═══════════════════════════════════════════════════════════════════
// HoldingsService
// ═══════════════════════════════════════════════════════════════════

mod holdings_view {
    use super::*;

    #[tokio::test]
    async fn server_holdings_priced_live() {
        let h = Harness::new();
        h.backend.seed_holdings(1, vec![Holding::new("TCS", 2.0, 3000.0)]);
        let (views, source) = h.holdings().load_holdings(1).await.unwrap();
        assert_eq!(source, DataSource::Server);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].current_price, 3500.0);
        assert_eq!(views[0].pl, 1000.0);
    }

    #[tokio::test]
    async fn unpriced_holdings_show_zero() {
        let h = Harness::new();
        h.backend.seed_holdings(
            1,
            vec![Holding::new("ZZZ", 1.0, 10.0), Holding::new("HDFCBANK", 1.0, 1600.0)],
        );
        let (views, _) = h.holdings().load_holdings(1).await.unwrap();
        assert!(views.iter().all(|v| v.current_price == 0.0));
        assert_eq!(views[1].pl, -1600.0);
    }

    #[tokio::test]
    async fn offline_falls_back_to_stored_summary() {
        let h = Harness::new();
        let mut s = PortfolioSummary::with_cash(10.0);
        s.holdings.push(Holding::new("INFY", 3.0, 1400.0));
        h.storage.save_summary(1, &mut s).unwrap();
        h.backend.set_mode(Mode::Offline);

        let (views, source) = h.holdings().load_holdings(1).await.unwrap();
        assert_eq!(source, DataSource::Local);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].ticker, "INFY");
        assert_eq!(views[0].current_price, 0.0);
    }

    #[tokio::test]
    async fn detail_online_writes_through() {
        let h = Harness::new();
        h.backend.seed_holdings(1, vec![Holding::new("TCS", 2.0, 3000.0)]);
        h.backend.transactions.lock().unwrap().insert(
            1,
            vec![
                Transaction::simulated(1, "TCS", TradeSide::Buy, 1.0, 3000.0),
                Transaction {
                    coach_class: CoachClass::Fomo,
                    ..Transaction::simulated(1, "TCS", TradeSide::Buy, 1.0, 3000.0)
                },
            ],
        );

        let detail = h.holdings().load_detail(1).await.unwrap();

        assert_eq!(detail.name.as_deref(), Some("Main"));
        assert_eq!(detail.cash, 2000.0);
        assert_eq!(detail.source, DataSource::Server);
        assert_eq!(detail.totals.total_value, 7000.0);
        assert_eq!(detail.coach_counts.normal, 1);
        assert_eq!(detail.coach_counts.fomo, 1);

        let stored = h.storage.summary(1).unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Main"));
        assert_eq!(stored.holdings[0].current_price, 3500.0);
        assert_eq!(h.storage.last_summary_id().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn detail_offline_uses_local_name() {
        let h = Harness::new();
        h.storage
            .save_local_portfolios(&[PortfolioInfo {
                id: 9,
                name: "Offline Fund".into(),
                created_at: None,
            }])
            .unwrap();
        h.backend.set_mode(Mode::Offline);

        let detail = h.holdings().load_detail(9).await.unwrap();
        assert_eq!(detail.name.as_deref(), Some("Offline Fund"));
        assert!(detail.transactions.is_empty());
        assert_eq!(detail.source, DataSource::Local);
        assert_eq!(detail.cash, 2000.0);
    }

    #[tokio::test]
    async fn detail_of_unknown_portfolio_fails() {
        let h = Harness::new();
        assert!(matches!(
            h.holdings().load_detail(42).await,
            Err(CoreError::PortfolioNotFound(42))
        ));
    }

    #[test]
    fn set_cash_updates_and_notifies() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();
        let s = h.holdings().set_cash(3, 12_345.5).unwrap();
        assert_eq!(s.cash, 12_345.5);
        assert_eq!(h.storage.sim_cash(3).unwrap(), Some(12_345.5));
        assert_eq!(
            rx.try_recv().unwrap(),
            PortfolioEvent::CashChanged { portfolio_id: 3, cash: 12_345.5 }
        );
    }

    #[test]
    fn set_cash_rejects_negative() {
        let h = Harness::new();
        assert!(matches!(
            h.holdings().set_cash(3, -1.0),
            Err(CoreError::ValidationError(_))
        ));
        assert_eq!(h.storage.sim_cash(3).unwrap(), None);
    }

    #[tokio::test]
    async fn delete_online_purges() {
        let h = Harness::new();
        h.storage.save_summary(1, &mut PortfolioSummary::with_cash(5.0)).unwrap();
        h.storage.set_sim_cash(1, 5.0).unwrap();
        let mut rx = h.events.subscribe();

        h.holdings().delete_portfolio(1).await.unwrap();

        assert_eq!(h.storage.summary(1).unwrap(), None);
        assert_eq!(h.storage.sim_cash(1).unwrap(), None);
        assert!(h.backend.portfolios.lock().unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap(), PortfolioEvent::Deleted { portfolio_id: 1 });
    }

    #[tokio::test]
    async fn delete_offline_server_portfolio_fails_and_keeps_data() {
        let h = Harness::new();
        h.storage.save_summary(1, &mut PortfolioSummary::with_cash(5.0)).unwrap();
        h.backend.set_mode(Mode::Offline);
        assert!(matches!(
            h.holdings().delete_portfolio(1).await,
            Err(CoreError::Network(_))
        ));
        assert!(h.storage.summary(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_offline_local_portfolio_succeeds() {
        let h = Harness::new();
        h.storage
            .save_local_portfolios(&[PortfolioInfo { id: 4, name: "L".into(), created_at: None }])
            .unwrap();
        h.storage.save_summary(4, &mut PortfolioSummary::with_cash(5.0)).unwrap();
        h.backend.set_mode(Mode::Offline);

        h.holdings().delete_portfolio(4).await.unwrap();
        assert!(h.storage.local_portfolios().unwrap().is_empty());
        assert_eq!(h.storage.summary(4).unwrap(), None);
    }
}

// ═══════════════════════════════════════════════════════════════════
// PortfolioDirectory
// ═══════════════════════════════════════════════════════════════════

mod directory {
    use super::*;

    #[tokio::test]
    async fn online_list_comes_from_server() {
        let h = Harness::new();
        let listing = h.directory().list().await.unwrap();
        assert_eq!(listing.source, DataSource::Server);
        assert_eq!(listing.portfolios.len(), 1);
        assert_eq!(listing.portfolios[0].name, "Main");
    }

    #[tokio::test]
    async fn offline_list_merges_local_and_summaries() {
        let h = Harness::new();
        h.storage
            .save_local_portfolios(&[PortfolioInfo { id: 5, name: "Five".into(), created_at: None }])
            .unwrap();
        let mut named = PortfolioSummary::with_cash(1.0);
        named.name = Some("Two".into());
        h.storage.save_summary(2, &mut named).unwrap();
        h.storage.save_summary(7, &mut PortfolioSummary::with_cash(1.0)).unwrap();
        h.backend.set_mode(Mode::Unauthorized);

        let listing = h.directory().list().await.unwrap();
        assert_eq!(listing.source, DataSource::Local);
        let entries: Vec<(PortfolioId, &str)> =
            listing.portfolios.iter().map(|p| (p.id, p.name.as_str())).collect();
        assert_eq!(entries, vec![(2, "Two"), (5, "Five"), (7, "Portfolio 7")]);
    }

    #[tokio::test]
    async fn create_online_echoed() {
        let h = Harness::new();
        let (info, source) = h.directory().create("  Growth  ").await.unwrap();
        assert_eq!(source, DataSource::Server);
        assert_eq!(info.id, 2);
        assert_eq!(info.name, "Growth");
    }

    #[tokio::test]
    async fn create_online_not_echoed_is_looked_up() {
        let h = Harness::new();
        *h.backend.echo_created.lock().unwrap() = false;
        let (info, source) = h.directory().create("Growth").await.unwrap();
        assert_eq!(source, DataSource::Server);
        assert_eq!(info.id, 2);
    }

    #[tokio::test]
    async fn create_offline_picks_next_free_id() {
        let h = Harness::new();
        h.storage
            .save_local_portfolios(&[PortfolioInfo { id: 3, name: "Three".into(), created_at: None }])
            .unwrap();
        h.storage.save_summary(8, &mut PortfolioSummary::with_cash(1.0)).unwrap();
        h.backend.set_mode(Mode::Offline);

        let (info, source) = h.directory().create("Paper").await.unwrap();
        assert_eq!(source, DataSource::Local);
        assert_eq!(info.id, 9);
        assert!(info.created_at.is_some());
        assert_eq!(h.storage.local_portfolios().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_requires_name() {
        let h = Harness::new();
        assert!(matches!(
            h.directory().create("   ").await,
            Err(CoreError::ValidationError(_))
        ));
    }
}

// ═══════════════════════════════════════════════════════════════════
// MarketService
// ═══════════════════════════════════════════════════════════════════

mod market {
    use super::*;

    #[tokio::test]
    async fn list_merges_details() {
        let h = Harness::new();
        let stocks = h.market().list_stocks().await.unwrap();
        assert_eq!(stocks.len(), 4);
        assert_eq!(stocks[0].ticker, "TCS");
        assert_eq!(stocks[0].price, Some(3500.0));
        assert_eq!(stocks[3].price, None);
    }

    #[tokio::test]
    async fn short_queries_return_nothing() {
        let h = Harness::new();
        assert!(h.market().search("t").await.unwrap().is_empty());
        let hits = h.market().search("tata").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ticker, "TCS");
    }

    #[tokio::test]
    async fn empty_ticker_is_invalid() {
        let h = Harness::new();
        assert!(matches!(h.market().stock(" ").await, Err(CoreError::ValidationError(_))));
    }

    #[tokio::test]
    async fn resolve_ticker_variants() {
        let h = Harness::new();
        let m = h.market();
        assert_eq!(m.resolve_ticker(" tcs ").await.unwrap().as_deref(), Some("TCS"));
        assert_eq!(m.resolve_ticker("infosys").await.unwrap().as_deref(), Some("INFY"));
        assert_eq!(m.resolve_ticker("zzz").await.unwrap(), None);
        assert_eq!(m.resolve_ticker("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn resolve_ticker_offline_is_an_error() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Offline);
        assert!(matches!(
            h.market().resolve_ticker("tcs").await,
            Err(CoreError::Network(_))
        ));
    }

    #[tokio::test]
    async fn live_price_needs_a_usable_price() {
        let h = Harness::new();
        assert_eq!(h.market().live_price("INFY").await.unwrap(), Some(1500.0));
        assert_eq!(h.market().live_price("HDFCBANK").await.unwrap(), None);
    }
}

// ── Debouncing ──────────────────────────────────────────────────────

mod debouncing {
    use super::*;

    #[tokio::test]
    async fn only_the_last_submission_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let d: Debouncer<u32> = Debouncer::new(Duration::from_millis(50));
        for value in 1..=3u32 {
            let runs = Arc::clone(&runs);
            d.submit(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                value
            });
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(d.latest(), Some(3));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_drops_pending_work() {
        let d: Debouncer<u32> = Debouncer::new(Duration::from_millis(30));
        d.submit(async { 7 });
        d.cancel();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(d.latest(), None);
    }

    #[tokio::test]
    async fn dropping_the_debouncer_aborts_pending_work() {
        let runs = Arc::new(AtomicUsize::new(0));
        let d: Debouncer<u32> = Debouncer::new(Duration::from_millis(30));
        let counter = Arc::clone(&runs);
        d.submit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            1
        });
        drop(d);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscribers_see_the_result() {
        let d: Debouncer<u32> = Debouncer::new(Duration::from_millis(10));
        let mut rx = d.subscribe();
        d.submit(async { 42 });
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), Some(42));
    }

    #[tokio::test]
    async fn search_as_you_type_keeps_last_query() {
        let h = Harness::new();
        let market = h.market();
        let d = market.debouncer::<Vec<Stock>>();
        for q in ["i", "in", "inf"] {
            market.search_as_you_type(&d, q);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        let hits = d.latest().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ticker, "INFY");
    }

    #[tokio::test]
    async fn autofill_price_resolves_free_text() {
        let h = Harness::new();
        let market = h.market();
        let d = market.debouncer::<Option<f64>>();
        market.autofill_price(&d, "reliance");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(d.latest(), Some(Some(2500.0)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// CoachService
// ═══════════════════════════════════════════════════════════════════

mod coach {
    use super::*;

    #[tokio::test]
    async fn reply_is_persisted_with_question() {
        let h = Harness::new();
        let reply = h.coach().send(CoachScope::Portfolio(1), "  How am I doing?  ").await.unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.text, "Stay diversified.");

        let history = h.coach().history(CoachScope::Portfolio(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "How am I doing?");

        let req = h.backend.last_coach_request();
        assert_eq!(req.portfolio_id, Some(1));
        assert_eq!(req.portfolio_summary.cash, 2000.0);
        assert!(req.history.is_empty());
    }

    #[tokio::test]
    async fn context_window_sends_trailing_turns() {
        let h = Harness::new();
        let scope = CoachScope::Global;
        let prior: Vec<Message> = (0..10).map(|i| Message::user(format!("m{i}"))).collect();
        h.storage.save_coach_history(scope, &prior, 50).unwrap();

        h.coach().send(scope, "next").await.unwrap();

        let req = h.backend.last_coach_request();
        assert_eq!(req.portfolio_id, None);
        assert_eq!(req.history.len(), 6);
        assert_eq!(req.history[0].text, "m4");
        assert_eq!(req.history[5].text, "m9");
        assert_eq!(req.history[0].role, "user");
        assert_eq!(h.coach().history(scope).unwrap().len(), 12);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let h = Harness::with_settings(Settings {
            coach_history_cap: 4,
            ..test_settings()
        });
        let coach = h.coach();
        for i in 0..3 {
            coach.send(CoachScope::Global, &format!("q{i}")).await.unwrap();
        }
        let history = coach.history(CoachScope::Global).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text, "q1");
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn network_failure_becomes_a_message() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Offline);
        let reply = h.coach().send(CoachScope::Global, "hello").await.unwrap();
        assert_eq!(reply.text, "⚠️ Network error: connection refused");
        assert_eq!(h.coach().history(CoachScope::Global).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_failure_becomes_a_message() {
        let h = Harness::new();
        h.backend.set_mode(Mode::Unauthorized);
        let reply = h.coach().send(CoachScope::Global, "hello").await.unwrap();
        assert_eq!(reply.text, "⚠️ Not authenticated");
    }

    #[tokio::test]
    async fn empty_reply_uses_placeholder() {
        let h = Harness::new();
        *h.backend.coach_reply.lock().unwrap() = None;
        let reply = h.coach().send(CoachScope::Global, "hello").await.unwrap();
        assert_eq!(reply.text, NO_RESPONSE_TEXT);
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let h = Harness::new();
        assert!(matches!(
            h.coach().send(CoachScope::Global, "   ").await,
            Err(CoreError::ValidationError(_))
        ));
        assert!(h.coach().history(CoachScope::Global).unwrap().is_empty());
    }

    #[test]
    fn resolve_summary_prefers_last_viewed() {
        let h = Harness::new();
        h.storage.save_summary(10, &mut PortfolioSummary::with_cash(10.0)).unwrap();
        h.storage.save_summary(2, &mut PortfolioSummary::with_cash(2.0)).unwrap();
        let (id, s) = h.coach().resolve_summary(CoachScope::Global).unwrap().unwrap();
        assert_eq!(id, 2);
        assert_eq!(s.cash, 2.0);
    }

    #[test]
    fn resolve_summary_falls_back_to_highest_id() {
        let h = Harness::new();
        h.storage.save_summary(10, &mut PortfolioSummary::with_cash(10.0)).unwrap();
        h.storage.save_summary(2, &mut PortfolioSummary::with_cash(2.0)).unwrap();
        h.storage.store().remove(keys::LAST_SUMMARY_POINTER).unwrap();
        let (id, _) = h.coach().resolve_summary(CoachScope::Global).unwrap().unwrap();
        assert_eq!(id, 10);
    }

    #[test]
    fn resolve_summary_none_without_data() {
        let h = Harness::new();
        assert!(h.coach().resolve_summary(CoachScope::Global).unwrap().is_none());
        let (id, s) = h.coach().resolve_summary(CoachScope::Portfolio(5)).unwrap().unwrap();
        assert_eq!(id, 5);
        assert_eq!(s.cash, 2000.0);
    }

    #[tokio::test]
    async fn saved_logs_pass_portfolio_filter() {
        let h = Harness::new();
        let logs = h.coach().saved_logs(Some(3)).await.unwrap();
        assert_eq!(logs[0].text, "log for Some(3)");
    }

    #[test]
    fn clear_history_removes_conversation() {
        let h = Harness::new();
        h.storage
            .save_coach_history(CoachScope::Portfolio(1), &[Message::user("x")], 10)
            .unwrap();
        h.coach().clear_history(CoachScope::Portfolio(1)).unwrap();
        assert!(h.coach().history(CoachScope::Portfolio(1)).unwrap().is_empty());
    }

    #[test]
    fn parse_free_form_holdings() {
        let text = "TCS 10 3500 3600\ninfy,5,1500\nbad\nWIPRO 0 10\nHDFC abc\n\nITC 3";
        let parsed = coach_service::parse_holdings_text(text);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].ticker, "TCS");
        assert_eq!(parsed[0].current_price, 3600.0);
        assert_eq!(parsed[1].ticker, "INFY");
        assert_eq!(parsed[1].avg_cost, 1500.0);
        assert_eq!(parsed[1].current_price, 1500.0);
        assert_eq!(parsed[2].avg_cost, 0.0);

        let again = coach_service::parse_holdings_text(&coach_service::format_holdings_text(&parsed));
        assert_eq!(again, parsed);
    }
}

// ═══════════════════════════════════════════════════════════════════
// LearnService
// ═══════════════════════════════════════════════════════════════════

mod learn {
    use super::*;

    #[test]
    fn catalog_has_three_lessons_of_six() {
        let h = Harness::new();
        let lessons = h.learn().lessons();
        assert_eq!(lessons.len(), 3);
        let mut ids = HashSet::new();
        for lesson in lessons {
            assert_eq!(lesson.quiz.len(), 6);
            for q in &lesson.quiz {
                assert!(ids.insert(q.id.clone()), "duplicate {}", q.id);
                assert!(q.correct_index < q.options.len());
            }
        }
    }

    #[test]
    fn attempt_draws_unique_subset() {
        let h = Harness::new();
        let mut rng = StdRng::seed_from_u64(7);
        let attempt = h.learn().start_attempt(1, &mut rng).unwrap();
        assert_eq!(attempt.questions().len(), 5);
        let ids: HashSet<&str> = attempt.questions().iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|id| id.starts_with('1')));
    }

    #[test]
    fn attempt_size_capped_by_pool() {
        let h = Harness::with_settings(Settings {
            quiz_questions_per_attempt: 10,
            ..test_settings()
        });
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(h.learn().start_attempt(2, &mut rng).unwrap().questions().len(), 6);
    }

    #[test]
    fn unknown_lesson() {
        let h = Harness::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            h.learn().start_attempt(99, &mut rng),
            Err(CoreError::LessonNotFound(99))
        ));
    }

    #[test]
    fn answering_walks_the_attempt() {
        let h = Harness::new();
        let mut rng = StdRng::seed_from_u64(3);
        let mut attempt = h.learn().start_attempt(1, &mut rng).unwrap();

        let first = attempt.current().unwrap().clone();
        assert!(matches!(attempt.answer(99), Err(CoreError::ValidationError(_))));
        assert!(attempt.results().is_empty());

        let fb = attempt.answer(first.correct_index).unwrap();
        assert!(fb.correct);
        assert_eq!(fb.message(), "✅ Correct!");

        let second = attempt.current().unwrap().clone();
        let wrong = (second.correct_index + 1) % second.options.len();
        let fb = attempt.answer(wrong).unwrap();
        assert!(!fb.correct);
        assert!(fb.message().starts_with("❌ Wrong."));
        assert_eq!(attempt.score().correct, 1);
        assert_eq!(attempt.score().total, 2);

        while !attempt.is_finished() {
            attempt.answer(0).unwrap();
        }
        assert!(attempt.current().is_none());
        assert!(attempt.answer(0).is_err());
    }

    #[test]
    fn recording_needs_a_finished_attempt() {
        let h = Harness::new();
        let mut rng = StdRng::seed_from_u64(3);
        let mut attempt = h.learn().start_attempt(1, &mut rng).unwrap();
        attempt.answer(0).unwrap();
        assert!(matches!(
            h.learn().record_attempt(&attempt),
            Err(CoreError::QuizIncomplete { answered: 1, total: 5 })
        ));
    }

    #[test]
    fn attempts_do_not_complete_lessons() {
        let h = Harness::new();
        let learn = h.learn();
        let mut rng = StdRng::seed_from_u64(11);
        let mut attempt = learn.start_attempt(1, &mut rng).unwrap();
        while let Some(q) = attempt.current().cloned() {
            attempt.answer(q.correct_index).unwrap();
        }

        let entry = learn.record_attempt(&attempt).unwrap();
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_score_pct, 100);
        assert_eq!(entry.completed_count, 0);
        assert_eq!(learn.overall_progress_pct().unwrap(), 0.0);

        let entry = learn.mark_completed(1).unwrap();
        assert_eq!(entry.completed_count, 1);
        assert_eq!(entry.attempts, 1);
        assert!(close(learn.overall_progress_pct().unwrap(), 100.0 / 3.0));

        // Completed without a passing score does not count.
        learn.mark_completed(2).unwrap();
        assert!(close(learn.overall_progress_pct().unwrap(), 100.0 / 3.0));
        assert_eq!(learn.progress().unwrap().len(), 2);
    }

    #[test]
    fn mark_completed_unknown_lesson() {
        let h = Harness::new();
        assert!(matches!(h.learn().mark_completed(0), Err(CoreError::LessonNotFound(0))));
    }

    #[test]
    fn reset_clears_progress() {
        let h = Harness::new();
        h.learn().mark_completed(3).unwrap();
        assert!(h.learn().progress_for(3).unwrap().is_some());
        h.learn().reset_progress().unwrap();
        assert!(h.learn().progress().unwrap().is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// AuthService
// ═══════════════════════════════════════════════════════════════════

mod auth {
    use super::*;

    #[tokio::test]
    async fn cookie_session_wins() {
        let h = Harness::new();
        *h.backend.session_user.lock().unwrap() = Some(User {
            id: None,
            username: Some("meera".into()),
            email: None,
        });
        let state = h.auth().verify().await.unwrap();
        assert_eq!(state.user().and_then(|u| u.username.as_deref()), Some("meera"));
    }

    #[tokio::test]
    async fn stored_token_is_installed_and_verified() {
        let h = Harness::new();
        h.storage.set_auth_token("good").unwrap();
        *h.backend.valid_token.lock().unwrap() = Some("good".into());

        let auth = h.auth();
        assert_eq!(h.backend.bearer().as_deref(), Some("good"));
        let state = auth.verify().await.unwrap();
        assert!(state.is_authenticated());
        assert_eq!(h.backend.bearer().as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn rejected_token_is_removed() {
        let h = Harness::new();
        h.storage.set_auth_token("stale").unwrap();
        let auth = h.auth();
        assert_eq!(auth.verify().await.unwrap(), SessionState::Anonymous);
        assert_eq!(h.storage.auth_token().unwrap(), None);
        assert_eq!(h.backend.bearer(), None);
    }

    #[tokio::test]
    async fn unreachable_backend_keeps_token() {
        let h = Harness::new();
        h.storage.set_auth_token("maybe").unwrap();
        h.backend.set_mode(Mode::Offline);
        assert_eq!(h.auth().verify().await.unwrap(), SessionState::Anonymous);
        assert_eq!(h.storage.auth_token().unwrap().as_deref(), Some("maybe"));
    }

    #[tokio::test]
    async fn no_session_no_token() {
        let h = Harness::new();
        assert_eq!(h.auth().verify().await.unwrap(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn login_stores_token() {
        let h = Harness::new();
        let state = h.auth().login(" asha ", "secret").await.unwrap();
        assert_eq!(state.user().unwrap().label(), "asha");
        assert_eq!(h.storage.auth_token().unwrap().as_deref(), Some("tok-asha"));
        assert_eq!(h.backend.bearer().as_deref(), Some("tok-asha"));
    }

    #[tokio::test]
    async fn login_failure_surfaces_backend_message() {
        let h = Harness::new();
        let err = h.auth().login("asha", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(h.storage.auth_token().unwrap(), None);
    }

    #[tokio::test]
    async fn login_requires_credentials() {
        let h = Harness::new();
        assert!(matches!(
            h.auth().login("  ", "secret").await,
            Err(CoreError::ValidationError(_))
        ));
        assert!(matches!(
            h.auth().login("asha", "").await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn register_without_user_asks_me() {
        let h = Harness::new();
        let state = h.auth().register("ravi", "pw", Some(" r@x.io ")).await.unwrap();
        let user = state.user().unwrap();
        assert_eq!(user.username.as_deref(), Some("ravi"));
        assert_eq!(user.email.as_deref(), Some("r@x.io"));
    }

    #[tokio::test]
    async fn logout_clears_even_offline() {
        let h = Harness::new();
        h.auth().login("asha", "secret").await.unwrap();
        h.backend.set_mode(Mode::Offline);
        h.auth().logout().await.unwrap();
        assert_eq!(h.storage.auth_token().unwrap(), None);
        assert_eq!(h.backend.bearer(), None);
    }
}

// ═══════════════════════════════════════════════════════════════════
// EventBus
// ═══════════════════════════════════════════════════════════════════

mod event_bus {
    use super::*;

    #[test]
    fn publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(PortfolioEvent::Deleted { portfolio_id: 1 }), 0);
    }

    #[test]
    fn clones_share_the_channel() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.clone().publish(PortfolioEvent::Updated { portfolio_id: 4 }), 2);
        assert_eq!(a.try_recv().unwrap().portfolio_id(), 4);
        assert_eq!(b.try_recv().unwrap().portfolio_id(), 4);
    }
}
