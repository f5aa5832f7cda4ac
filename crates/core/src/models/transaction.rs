use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::portfolio::PortfolioId;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side '{other}' (expected BUY or SELL)")),
        }
    }
}

/// Behavioural label the backend coach attaches to each trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoachClass {
    #[default]
    Normal,
    /// Bought into a sharp rise vs. the recent average
    Fomo,
    /// Sold into a sharp drop vs. the recent average
    Panic,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for CoachClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoachClass::Normal => write!(f, "NORMAL"),
            CoachClass::Fomo => write!(f, "FOMO"),
            CoachClass::Panic => write!(f, "PANIC"),
            CoachClass::Other => write!(f, "OTHER"),
        }
    }
}

/// Display-only record of a trade. Either relayed from the backend or
/// synthesized locally for a simulated trade; never used to rebuild state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<PortfolioId>,

    pub ticker: String,

    #[serde(rename = "type")]
    pub side: TradeSide,

    pub quantity: f64,

    pub price: f64,

    /// Backend timestamps arrive in several formats; kept verbatim for display.
    #[serde(default, alias = "created_at", alias = "date")]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub coach_class: CoachClass,
}

impl Transaction {
    /// Build the locally synthesized record for a simulated trade.
    pub fn simulated(
        portfolio_id: PortfolioId,
        ticker: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> Self {
        Self {
            id: format!("local-{}", Uuid::new_v4()),
            portfolio_id: Some(portfolio_id),
            ticker: ticker.trim().to_uppercase(),
            side,
            quantity,
            price,
            timestamp: Some(Utc::now().to_rfc3339()),
            coach_class: CoachClass::Normal,
        }
    }

    /// `true` for records synthesized by the offline path.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.id.starts_with("local-")
    }
}

/// A trade as submitted by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub portfolio_id: PortfolioId,
    pub ticker: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
}

impl TradeRequest {
    pub fn new(
        portfolio_id: PortfolioId,
        ticker: impl Into<String>,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> Self {
        Self {
            portfolio_id,
            ticker: ticker.into().trim().to_uppercase(),
            side,
            quantity,
            price,
        }
    }

    pub fn buy(portfolio_id: PortfolioId, ticker: impl Into<String>, quantity: f64, price: f64) -> Self {
        Self::new(portfolio_id, ticker, TradeSide::Buy, quantity, price)
    }

    pub fn sell(portfolio_id: PortfolioId, ticker: impl Into<String>, quantity: f64, price: f64) -> Self {
        Self::new(portfolio_id, ticker, TradeSide::Sell, quantity, price)
    }

    /// Cash moved by this trade.
    #[must_use]
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

/// The backend sends ids as either JSON numbers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}
