use crate::errors::CoreError;
use crate::models::portfolio::{CoachClassCounts, HoldingView, PortfolioTotals};
use crate::models::summary::{Holding, PortfolioSummary};
use crate::models::transaction::{TradeRequest, TradeSide, Transaction};

/// Slack allowed when comparing cash and share quantities.
pub const TOLERANCE: f64 = 1e-6;

/// Ledger rules for simulated trades against a [`PortfolioSummary`].
///
/// Pure business logic: no I/O, no API calls. Every `apply_*` validates
/// before touching the summary, so a rejected trade leaves it unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortfolioService;

impl PortfolioService {
    pub fn new() -> Self {
        Self
    }

    /// Shape checks shared by the server and simulated paths.
    pub fn validate(&self, request: &TradeRequest) -> Result<(), CoreError> {
        if request.ticker.trim().is_empty() {
            return Err(CoreError::ValidationError("Ticker must not be empty".into()));
        }
        if !request.quantity.is_finite() || request.quantity <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Quantity must be a positive number, got {}",
                request.quantity
            )));
        }
        if !request.price.is_finite() || request.price <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Price must be a positive number, got {}",
                request.price
            )));
        }
        Ok(())
    }

    /// Reject a BUY whose cost exceeds the summary's cash.
    pub fn check_affordable(&self, summary: &PortfolioSummary, request: &TradeRequest) -> Result<(), CoreError> {
        if request.side == TradeSide::Buy {
            let cost = request.notional();
            if cost > summary.cash + TOLERANCE {
                return Err(CoreError::InsufficientCash {
                    needed: cost,
                    available: summary.cash,
                });
            }
        }
        Ok(())
    }

    /// Reject a SELL of more shares than the summary holds.
    pub fn check_sellable(&self, summary: &PortfolioSummary, request: &TradeRequest) -> Result<(), CoreError> {
        if request.side == TradeSide::Sell {
            let held = summary.quantity_of(&request.ticker);
            if request.quantity > held + TOLERANCE {
                return Err(CoreError::InsufficientShares {
                    ticker: request.ticker.clone(),
                    requested: request.quantity,
                    held,
                });
            }
        }
        Ok(())
    }

    /// Buy `quantity` shares at `price`: weighted average cost on an existing
    /// position, a new position otherwise; cash decreases by the cost.
    pub fn apply_buy(
        &self,
        summary: &mut PortfolioSummary,
        ticker: &str,
        quantity: f64,
        price: f64,
    ) -> Result<(), CoreError> {
        let request = TradeRequest::buy(0, ticker, quantity, price);
        self.validate(&request)?;
        self.check_affordable(summary, &request)?;

        let cost = request.notional();
        match summary.holdings.iter_mut().find(|h| h.ticker == request.ticker) {
            Some(h) => {
                let new_qty = h.quantity + quantity;
                h.avg_cost = (h.avg_cost * h.quantity + price * quantity) / new_qty;
                h.quantity = new_qty;
                h.current_price = price;
            }
            None => summary
                .holdings
                .push(Holding::new(request.ticker.clone(), quantity, price)),
        }
        summary.cash = (summary.cash - cost).max(0.0);
        Ok(())
    }

    /// Sell `quantity` shares at `price`. The position is removed once empty;
    /// average cost is unchanged.
    pub fn apply_sell(
        &self,
        summary: &mut PortfolioSummary,
        ticker: &str,
        quantity: f64,
        price: f64,
    ) -> Result<(), CoreError> {
        let request = TradeRequest::sell(0, ticker, quantity, price);
        self.validate(&request)?;
        self.check_sellable(summary, &request)?;

        if let Some(idx) = summary.holdings.iter().position(|h| h.ticker == request.ticker) {
            let remaining = summary.holdings[idx].quantity - quantity;
            if remaining <= TOLERANCE {
                summary.holdings.remove(idx);
            } else {
                summary.holdings[idx].quantity = remaining;
                summary.holdings[idx].current_price = price;
            }
        }
        summary.cash += request.notional();
        Ok(())
    }

    pub fn apply_trade(&self, summary: &mut PortfolioSummary, request: &TradeRequest) -> Result<(), CoreError> {
        match request.side {
            TradeSide::Buy => self.apply_buy(summary, &request.ticker, request.quantity, request.price),
            TradeSide::Sell => self.apply_sell(summary, &request.ticker, request.quantity, request.price),
        }
    }

    /// Cash movement of a trade the server already executed. BUY never
    /// takes the balance below zero.
    pub fn settle_cash(&self, cash: f64, request: &TradeRequest) -> f64 {
        match request.side {
            TradeSide::Buy => (cash - request.notional()).max(0.0),
            TradeSide::Sell => cash + request.notional(),
        }
    }

    /// Cash movement that undoes a simulated trade. Cash never goes negative.
    pub fn reverse_cash(&self, cash: f64, request: &TradeRequest) -> f64 {
        match request.side {
            TradeSide::Buy => cash + request.notional(),
            TradeSide::Sell => (cash - request.notional()).max(0.0),
        }
    }

    /// Undo a simulated trade's effect on the holdings.
    ///
    /// A reversed BUY backs its lot out of the weighted average; a reversed
    /// SELL puts the shares back, at the sale price if the position was
    /// closed.
    pub fn reverse_holding(&self, summary: &mut PortfolioSummary, request: &TradeRequest) {
        let ticker = request.ticker.trim().to_uppercase();
        let idx = summary.holdings.iter().position(|h| h.ticker == ticker);
        match (request.side, idx) {
            (TradeSide::Buy, Some(i)) => {
                let h = &mut summary.holdings[i];
                let remaining = h.quantity - request.quantity;
                if remaining <= TOLERANCE {
                    summary.holdings.remove(i);
                } else {
                    h.avg_cost = ((h.avg_cost * h.quantity - request.notional()) / remaining).max(0.0);
                    h.quantity = remaining;
                }
            }
            (TradeSide::Buy, None) => {}
            (TradeSide::Sell, Some(i)) => summary.holdings[i].quantity += request.quantity,
            (TradeSide::Sell, None) => summary
                .holdings
                .push(Holding::new(ticker, request.quantity, request.price)),
        }
    }

    /// Whole shares affordable with `cash` at `price`.
    #[must_use]
    pub fn max_buy_quantity(&self, cash: f64, price: f64) -> u64 {
        if !price.is_finite() || price <= 0.0 || !cash.is_finite() || cash <= 0.0 {
            return 0;
        }
        (cash / price).floor() as u64
    }

    pub fn totals(&self, holdings: &[HoldingView]) -> PortfolioTotals {
        holdings.iter().fold(PortfolioTotals::default(), |mut acc, h| {
            acc.total_value += h.current_price * h.quantity;
            acc.total_pl += h.pl;
            acc
        })
    }

    pub fn coach_class_counts(&self, transactions: &[Transaction]) -> CoachClassCounts {
        let mut counts = CoachClassCounts::default();
        for tx in transactions {
            counts.record(tx.coach_class);
        }
        counts
    }
}
