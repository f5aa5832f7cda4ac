use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A position in a single ticker.
///
/// `ticker` is always stored uppercased; a [`PortfolioSummary`] holds at most
/// one `Holding` per ticker and drops it once `quantity` reaches zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    /// Uppercased ticker symbol (e.g., "TCS", "INFY")
    pub ticker: String,

    /// Number of shares held (always > 0 inside a summary)
    #[serde(alias = "qty")]
    pub quantity: f64,

    /// Weighted average purchase price
    #[serde(default, alias = "avgCost", alias = "avg")]
    pub avg_cost: f64,

    /// Last observed market price. Advisory only, never used by the ledger.
    #[serde(default, alias = "currentPrice")]
    pub current_price: f64,
}

impl Holding {
    pub fn new(ticker: impl Into<String>, quantity: f64, avg_cost: f64) -> Self {
        Self {
            ticker: ticker.into().trim().to_uppercase(),
            quantity,
            avg_cost,
            current_price: avg_cost,
        }
    }

    /// Market value at the last observed price.
    #[must_use]
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    /// Unrealised profit/loss at the last observed price.
    #[must_use]
    pub fn profit_loss(&self) -> f64 {
        (self.current_price - self.avg_cost) * self.quantity
    }
}

/// Locally persisted snapshot of one portfolio's simulated cash and holdings.
///
/// Stored as JSON under `portfolioSummary:<id>` and overwritten wholesale on
/// every cash/holdings change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Simulated cash balance (never negative after a simulated trade)
    #[serde(default)]
    pub cash: f64,

    /// Holdings, one entry per uppercased ticker
    #[serde(default)]
    pub holdings: Vec<Holding>,

    /// Display name, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// When this snapshot was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl PortfolioSummary {
    /// Empty summary seeded with a starting cash balance.
    pub fn with_cash(cash: f64) -> Self {
        Self {
            cash,
            holdings: Vec::new(),
            name: None,
            saved_at: None,
        }
    }

    /// Find a holding by ticker (case-insensitive).
    #[must_use]
    pub fn holding(&self, ticker: &str) -> Option<&Holding> {
        let upper = ticker.trim().to_uppercase();
        self.holdings.iter().find(|h| h.ticker == upper)
    }

    /// Quantity held for a ticker, or 0 when not held.
    #[must_use]
    pub fn quantity_of(&self, ticker: &str) -> f64 {
        self.holding(ticker).map_or(0.0, |h| h.quantity)
    }

    /// Normalise data written by older views: uppercase tickers, merge
    /// duplicates (weighted average cost) and drop empty positions.
    pub fn normalize(&mut self) {
        let mut merged: Vec<Holding> = Vec::with_capacity(self.holdings.len());
        for mut h in std::mem::take(&mut self.holdings) {
            h.ticker = h.ticker.trim().to_uppercase();
            if h.ticker.is_empty() || !(h.quantity > 0.0) {
                continue;
            }
            match merged.iter_mut().find(|m| m.ticker == h.ticker) {
                Some(existing) => {
                    let qty = existing.quantity + h.quantity;
                    existing.avg_cost =
                        (existing.avg_cost * existing.quantity + h.avg_cost * h.quantity) / qty;
                    existing.quantity = qty;
                    if h.current_price > 0.0 {
                        existing.current_price = h.current_price;
                    }
                }
                None => merged.push(h),
            }
        }
        self.holdings = merged;
        if !self.cash.is_finite() || self.cash < 0.0 {
            self.cash = 0.0;
        }
    }
}

impl Default for PortfolioSummary {
    fn default() -> Self {
        Self::with_cash(0.0)
    }
}
