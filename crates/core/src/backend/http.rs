use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::models::portfolio::{PortfolioId, PortfolioInfo};
use crate::models::settings::Settings;
use crate::models::stock::Stock;
use crate::models::summary::Holding;

use super::traits::BackendApi;
use super::types::{
    ApiErrorBody, AuthResponse, CoachChatRequest, CoachChatResponse, CoachLogEntry,
    CoachLogsResponse, CreatePortfolioBody, Credentials, PortfolioEnvelope, TradeBody,
    TradeResponse, User,
};

/// Backend client over HTTP.
///
/// - **Session**: cookie jar kept for the lifetime of the client; a bearer
///   token is attached as well when one has been installed.
/// - **Timeout**: `Settings::request_timeout_secs` per request.
pub struct HttpBackend {
    client: Client,
    base: String,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(settings: &Settings) -> Result<Self, CoreError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base: settings.api_base.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// `path` with one user-supplied segment appended, percent-encoded.
    fn segment_url(&self, path: &str, segment: &str) -> Result<Url, CoreError> {
        let mut url = Url::parse(&self.url(path))
            .map_err(|e| CoreError::ValidationError(format!("Invalid backend URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| CoreError::ValidationError(format!("Backend URL cannot take a path: {}", self.base)))?
            .pop_if_empty()
            .push(segment.trim());
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let token = self.token.read().ok().and_then(|t| t.clone());
        match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn send_raw(&self, req: RequestBuilder) -> Result<String, CoreError> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(CoreError::Unauthorized);
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("Server error {}", status.as_u16()));
            debug!(status = status.as_u16(), %message, "backend rejected request");
            return Err(CoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, CoreError> {
        let body = self.send_raw(req).await?;
        serde_json::from_str(&body)
            .map_err(|e| CoreError::Deserialization(format!("Unexpected backend response: {e}")))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    fn name(&self) -> &str {
        "HTTP backend"
    }

    fn set_bearer_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut slot) => *slot = token,
            Err(_) => warn!("bearer token lock poisoned; token not updated"),
        }
    }

    async fn list_stocks(&self) -> Result<Vec<Stock>, CoreError> {
        self.send_json(self.client.get(self.url("/api/stocks"))).await
    }

    async fn stock(&self, ticker: &str) -> Result<Stock, CoreError> {
        let url = self.segment_url("/api/stock", ticker)?;
        match self.send_json(self.client.get(url)).await {
            Err(CoreError::Api { status: 404, .. }) => {
                Err(CoreError::TickerNotFound(ticker.to_string()))
            }
            other => other,
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<Stock>, CoreError> {
        let url = self.segment_url("/api/search", query)?;
        self.send_json(self.client.get(url)).await
    }

    async fn list_portfolios(&self) -> Result<Vec<PortfolioInfo>, CoreError> {
        self.send_json(self.client.get(self.url("/api/portfolios")))
            .await
    }

    async fn create_portfolio(&self, name: &str) -> Result<Option<PortfolioInfo>, CoreError> {
        let body = CreatePortfolioBody {
            name: name.to_string(),
        };
        let raw = self
            .send_raw(self.client.post(self.url("/api/portfolios")).json(&body))
            .await?;
        // Some deployments echo the portfolio, others return `{ "ok": true }`.
        let created = serde_json::from_str::<Value>(&raw)
            .ok()
            .map(|v| v.get("portfolio").cloned().unwrap_or(v))
            .and_then(|v| serde_json::from_value::<PortfolioInfo>(v).ok());
        Ok(created)
    }

    async fn portfolio(&self, id: PortfolioId) -> Result<PortfolioEnvelope, CoreError> {
        let url = self.url(&format!("/api/portfolio/{id}"));
        match self.send_json(self.client.get(url)).await {
            Err(CoreError::Api { status: 404, .. }) => Err(CoreError::PortfolioNotFound(id)),
            other => other,
        }
    }

    async fn holdings(&self, id: PortfolioId) -> Result<Vec<Holding>, CoreError> {
        let url = self.url(&format!("/api/portfolio/{id}/holdings"));
        self.send_json(self.client.get(url)).await
    }

    async fn trade(&self, id: PortfolioId, body: &TradeBody) -> Result<TradeResponse, CoreError> {
        let url = self.url(&format!("/api/portfolio/{id}/trade"));
        self.send_json(self.client.post(url).json(body)).await
    }

    async fn delete_portfolio(&self, id: PortfolioId) -> Result<(), CoreError> {
        let url = self.url(&format!("/api/portfolio/{id}"));
        self.send_raw(self.client.delete(url)).await.map(|_| ())
    }

    async fn coach_chat(&self, request: &CoachChatRequest) -> Result<CoachChatResponse, CoreError> {
        self.send_json(self.client.post(self.url("/api/coach/chat")).json(request))
            .await
    }

    async fn coach_logs(&self, portfolio_id: Option<PortfolioId>) -> Result<Vec<CoachLogEntry>, CoreError> {
        let mut req = self.client.get(self.url("/api/coach/logs"));
        if let Some(id) = portfolio_id {
            req = req.query(&[("portfolio_id", id)]);
        }
        let resp: CoachLogsResponse = self.send_json(req).await?;
        Ok(resp.logs)
    }

    async fn me(&self) -> Result<User, CoreError> {
        // A 2xx means the session is valid even if no user object comes back.
        let value: Value = self.send_json(self.client.get(self.url("/api/me"))).await?;
        Ok(User::from_value(value).unwrap_or_default())
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, CoreError> {
        self.send_json(self.client.post(self.url("/api/login")).json(credentials))
            .await
    }

    async fn register(&self, credentials: &Credentials) -> Result<AuthResponse, CoreError> {
        self.send_json(self.client.post(self.url("/api/register")).json(credentials))
            .await
    }

    async fn logout(&self) -> Result<(), CoreError> {
        self.send_raw(self.client.post(self.url("/api/logout")))
            .await
            .map(|_| ())
    }

    async fn verify_token(&self, token: &str) -> Result<User, CoreError> {
        // Explicit token: the installed one may be stale or absent.
        let resp = self
            .client
            .post(self.url("/api/verify-token"))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(CoreError::Unauthorized);
        }
        if !status.is_success() {
            return Err(CoreError::Api {
                status: status.as_u16(),
                message: format!("Token rejected ({})", status.as_u16()),
            });
        }
        Ok(serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(User::from_value)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        let settings = Settings {
            api_base: base.to_string(),
            ..Settings::default()
        };
        HttpBackend::new(&settings).unwrap()
    }

    #[test]
    fn segments_are_encoded() {
        let api = backend("http://127.0.0.1:5000/");
        let url = |s: &str| api.segment_url("/api/stock", s).unwrap().to_string();
        assert_eq!(url("TCS"), "http://127.0.0.1:5000/api/stock/TCS");
        assert_eq!(url(" BAJAJ-AUTO.NS "), "http://127.0.0.1:5000/api/stock/BAJAJ-AUTO.NS");
        assert_eq!(url("tata motors"), "http://127.0.0.1:5000/api/stock/tata%20motors");
        assert_eq!(url("a/b?c#d"), "http://127.0.0.1:5000/api/stock/a%2Fb%3Fc%23d");
    }

    #[test]
    fn base_path_is_kept() {
        let api = backend("http://localhost/proxy");
        assert_eq!(
            api.segment_url("/api/search", "infy").unwrap().as_str(),
            "http://localhost/proxy/api/search/infy"
        );
    }
}
