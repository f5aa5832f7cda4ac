use serde::{Deserialize, Deserializer, Serialize};

use super::summary::Holding;
use super::transaction::{CoachClass, Transaction};

/// Numeric portfolio identifier, shared by the backend and the local store.
pub type PortfolioId = i64;

/// Where a piece of data came from. Everything shown to the user is labelled
/// so that simulated (offline) state is never mistaken for server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Authoritative backend response
    Server,
    /// Local store fallback (unauthenticated or backend unreachable)
    Local,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Server => write!(f, "server"),
            DataSource::Local => write!(f, "local"),
        }
    }
}

/// A portfolio as listed in the portfolio directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioInfo {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: PortfolioId,

    pub name: String,

    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A holding enriched with a live price for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingView {
    pub ticker: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    /// `(current_price - avg_cost) * quantity`
    pub pl: f64,
}

impl HoldingView {
    pub fn new(ticker: impl Into<String>, quantity: f64, avg_cost: f64, current_price: f64) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            avg_cost,
            current_price,
            pl: (current_price - avg_cost) * quantity,
        }
    }

    /// Project back onto the stored holding shape.
    #[must_use]
    pub fn to_holding(&self) -> Holding {
        Holding {
            ticker: self.ticker.to_uppercase(),
            quantity: self.quantity,
            avg_cost: self.avg_cost,
            current_price: self.current_price,
        }
    }
}

/// Aggregate value of a set of holdings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    pub total_value: f64,
    pub total_pl: f64,
}

/// Count of transactions per coach label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachClassCounts {
    pub normal: usize,
    pub fomo: usize,
    pub panic: usize,
    pub other: usize,
}

impl CoachClassCounts {
    pub fn record(&mut self, class: CoachClass) {
        match class {
            CoachClass::Normal => self.normal += 1,
            CoachClass::Fomo => self.fomo += 1,
            CoachClass::Panic => self.panic += 1,
            CoachClass::Other => self.other += 1,
        }
    }
}

/// Everything the portfolio detail view shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioDetail {
    pub id: PortfolioId,
    pub name: Option<String>,
    pub cash: f64,
    pub holdings: Vec<HoldingView>,
    pub transactions: Vec<Transaction>,
    pub totals: PortfolioTotals,
    pub coach_counts: CoachClassCounts,
    /// Source of the holdings list
    pub source: DataSource,
}

/// The portfolio directory, labelled with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioListing {
    pub portfolios: Vec<PortfolioInfo>,
    pub source: DataSource,
}

pub(crate) fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<PortfolioId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(i) => Ok(i),
        Raw::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid portfolio id '{s}'"))),
    }
}
