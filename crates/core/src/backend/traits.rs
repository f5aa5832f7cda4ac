use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::portfolio::{PortfolioId, PortfolioInfo};
use crate::models::stock::Stock;
use crate::models::summary::Holding;

use super::types::{
    AuthResponse, CoachChatRequest, CoachChatResponse, CoachLogEntry, Credentials,
    PortfolioEnvelope, TradeBody, TradeResponse, User,
};

/// Abstraction over the backend REST API.
///
/// Implementations map failures onto the shared taxonomy: a 401 is
/// [`CoreError::Unauthorized`], a transport failure is [`CoreError::Network`],
/// and any other non-2xx is [`CoreError::Api`] carrying the backend's
/// `error` text verbatim. Services rely on that mapping to pick between the
/// server path and the local fallback.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Human-readable name of this backend (for logs).
    fn name(&self) -> &str;

    /// Install or clear the bearer token used when no session cookie exists.
    fn set_bearer_token(&self, _token: Option<String>) {}

    // ── Market ──────────────────────────────────────────────────────

    /// `GET /api/stocks`: tickers and names only.
    async fn list_stocks(&self) -> Result<Vec<Stock>, CoreError>;

    /// `GET /api/stock/{ticker}`: detail with price and history.
    async fn stock(&self, ticker: &str) -> Result<Stock, CoreError>;

    /// `GET /api/search/{query}`
    async fn search(&self, query: &str) -> Result<Vec<Stock>, CoreError>;

    // ── Portfolios ──────────────────────────────────────────────────

    /// `GET /api/portfolios`
    async fn list_portfolios(&self) -> Result<Vec<PortfolioInfo>, CoreError>;

    /// `POST /api/portfolios`. Returns the created portfolio when the
    /// backend echoes it.
    async fn create_portfolio(&self, name: &str) -> Result<Option<PortfolioInfo>, CoreError>;

    /// `GET /api/portfolio/{id}`: name and transaction log.
    async fn portfolio(&self, id: PortfolioId) -> Result<PortfolioEnvelope, CoreError>;

    /// `GET /api/portfolio/{id}/holdings`
    async fn holdings(&self, id: PortfolioId) -> Result<Vec<Holding>, CoreError>;

    /// `POST /api/portfolio/{id}/trade`
    async fn trade(&self, id: PortfolioId, body: &TradeBody) -> Result<TradeResponse, CoreError>;

    /// `DELETE /api/portfolio/{id}`
    async fn delete_portfolio(&self, id: PortfolioId) -> Result<(), CoreError>;

    // ── Coach ───────────────────────────────────────────────────────

    /// `POST /api/coach/chat`
    async fn coach_chat(&self, request: &CoachChatRequest) -> Result<CoachChatResponse, CoreError>;

    /// `GET /api/coach/logs[?portfolio_id=]`
    async fn coach_logs(&self, portfolio_id: Option<PortfolioId>) -> Result<Vec<CoachLogEntry>, CoreError>;

    // ── Auth ────────────────────────────────────────────────────────

    /// `GET /api/me` (cookie session)
    async fn me(&self) -> Result<User, CoreError>;

    /// `POST /api/login`
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, CoreError>;

    /// `POST /api/register`
    async fn register(&self, credentials: &Credentials) -> Result<AuthResponse, CoreError>;

    /// `POST /api/logout`
    async fn logout(&self) -> Result<(), CoreError>;

    /// `POST /api/verify-token` with the given bearer token.
    async fn verify_token(&self, token: &str) -> Result<User, CoreError>;
}
