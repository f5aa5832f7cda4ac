//! Key layout of the client store. Kept compatible with what the browser
//! client wrote to local storage.

use crate::models::message::CoachScope;
use crate::models::portfolio::PortfolioId;

/// Bearer token fallback when no session cookie is available.
pub const AUTH_TOKEN: &str = "authToken";

/// Pointer to the most recently viewed summary; the value is a full key
/// such as `portfolioSummary:7`.
pub const LAST_SUMMARY_POINTER: &str = "portfolioSummary:last";

/// Portfolios created while unauthenticated or offline.
pub const LOCAL_PORTFOLIOS: &str = "localPortfolios_v1";

/// Per-lesson quiz progress.
pub const LEARN_PROGRESS: &str = "learn_progress_v2";

const SUMMARY_PREFIX: &str = "portfolioSummary:";
const SIM_CASH_PREFIX: &str = "simCash:portfolio:";
const COACH_HISTORY_PREFIX: &str = "aiCoach:history:";
const OFFLINE_TRADES_PREFIX: &str = "offlineTrades:";

pub fn portfolio_summary(id: PortfolioId) -> String {
    format!("{SUMMARY_PREFIX}{id}")
}

pub fn sim_cash(id: PortfolioId) -> String {
    format!("{SIM_CASH_PREFIX}{id}")
}

pub fn coach_history(scope: CoachScope) -> String {
    format!("{COACH_HISTORY_PREFIX}{scope}")
}

pub fn offline_trades(id: PortfolioId) -> String {
    format!("{OFFLINE_TRADES_PREFIX}{id}")
}

/// Portfolio id of a `portfolioSummary:<id>` key. `None` for the `last`
/// pointer and anything non-numeric.
pub fn parse_summary_key(key: &str) -> Option<PortfolioId> {
    let rest = key.strip_prefix(SUMMARY_PREFIX)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}
