//! Request/response bodies of the backend REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::portfolio::PortfolioId;
use crate::models::summary::Holding;
use crate::models::transaction::{string_or_number, TradeSide, Transaction};

// ── Auth ────────────────────────────────────────────────────────────

/// Authenticated user as reported by `/api/me` or `/api/verify-token`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    /// Extract the user from either `{ "user": {...} }` or a bare user object.
    pub fn from_value(value: Value) -> Option<Self> {
        let inner = match value {
            Value::Object(mut map) => match map.remove("user") {
                Some(u @ Value::Object(_)) => u,
                Some(_) | None => Value::Object(map),
            },
            _ => return None,
        };
        let user: User = serde_json::from_value(inner).ok()?;
        if user.id.is_none() && user.username.is_none() && user.email.is_none() {
            return None;
        }
        Some(user)
    }

    /// Best display label.
    #[must_use]
    pub fn label(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.email.clone())
            .or_else(|| self.id.as_ref().map(|id| format!("user #{id}")))
            .unwrap_or_else(|| "unknown user".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Login/register response. The session cookie is set by the server; the
/// token is only present for bearer-token deployments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

// ── Portfolios & trades ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePortfolioBody {
    pub name: String,
}

/// Header part of `GET /api/portfolio/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioHeader {
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /api/portfolio/{id}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioEnvelope {
    #[serde(default)]
    pub portfolio: Option<PortfolioHeader>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// `POST /api/portfolio/{id}/trade` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeBody {
    pub ticker: String,
    #[serde(rename = "type")]
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
}

/// `POST /api/portfolio/{id}/trade` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeResponse {
    #[serde(default)]
    pub transaction: Option<Transaction>,
}

// ── Coach ───────────────────────────────────────────────────────────

/// Portfolio snapshot sent along with each coach message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachPortfolioSnapshot {
    pub cash: f64,
    pub holdings: Vec<Holding>,
}

/// One prior turn of the conversation, as context for the coach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachTurn {
    pub role: String,
    pub text: String,
}

/// `POST /api/coach/chat` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachChatRequest {
    pub message: String,
    pub portfolio_summary: CoachPortfolioSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<PortfolioId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<CoachTurn>,
}

/// `POST /api/coach/chat` response. Deployments disagree on the field name
/// carrying the answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachChatResponse {
    #[serde(default)]
    pub reply: Option<Value>,
    #[serde(default)]
    pub model: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl CoachChatResponse {
    /// Reply text: `reply`, else `model`, else `result`. Non-string
    /// payloads are rendered as JSON.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        [&self.reply, &self.model, &self.result]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())),
            })
    }
}

/// Server-side saved coach log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachLogEntry {
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachLogsResponse {
    #[serde(default)]
    pub logs: Vec<CoachLogEntry>,
}

// ── Errors ──────────────────────────────────────────────────────────

/// Error body the backend sends with non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
}
