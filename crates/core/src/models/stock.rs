use serde::{Deserialize, Serialize};

/// A single point of a stock's intraday/daily price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Label as sent by the backend (time or date string)
    pub time: String,
    pub price: f64,
}

/// A listed stock. List and search endpoints fill only `ticker` and `name`;
/// the detail endpoint adds price data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub ticker: String,

    #[serde(default)]
    pub name: String,

    #[serde(
        default,
        alias = "currentPrice",
        alias = "regularMarketPrice",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,

    #[serde(default, alias = "changePercent", skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<PricePoint>,
}

impl Stock {
    pub fn new(ticker: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            name: name.into(),
            price: None,
            change: None,
            change_percent: None,
            history: Vec::new(),
        }
    }

    /// Overlay detail fields onto a bare list entry. Detail values win when present.
    #[must_use]
    pub fn merged_with(mut self, detail: Stock) -> Self {
        if !detail.name.is_empty() {
            self.name = detail.name;
        }
        self.price = detail.price.or(self.price);
        self.change = detail.change.or(self.change);
        self.change_percent = detail.change_percent.or(self.change_percent);
        if !detail.history.is_empty() {
            self.history = detail.history;
        }
        self
    }

    /// Live price if the backend reported a usable one.
    #[must_use]
    pub fn live_price(&self) -> Option<f64> {
        self.price.filter(|p| p.is_finite() && *p > 0.0)
    }
}
