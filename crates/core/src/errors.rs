use thiserror::Error;

/// Unified error type for the entire papertrade-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Storage ─────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid store format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported store version: {0}")]
    UnsupportedVersion(u16),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),

    #[error("Concurrent modification of '{0}', gave up after retries")]
    Conflict(String),

    // ── Backend / Network ───────────────────────────────────────────
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    Api { status: u16, message: String },

    // ── Business Logic ──────────────────────────────────────────────
    #[error("{0}")]
    ValidationError(String),

    #[error("Insufficient simulated cash. You need ₹{needed:.2} but have ₹{available:.2}.")]
    InsufficientCash { needed: f64, available: f64 },

    #[error("Cannot sell {requested} {ticker}: you only hold {held}")]
    InsufficientShares {
        ticker: String,
        requested: f64,
        held: f64,
    },

    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(i64),

    #[error("Ticker not found: {0}")]
    TickerNotFound(String),

    #[error("Lesson not found: {0}")]
    LessonNotFound(u32),

    #[error("Quiz attempt is not finished ({answered}/{total} answered)")]
    QuizIncomplete { answered: usize, total: usize },
}

impl CoreError {
    /// `true` when the failure means "the backend cannot serve this caller right now":
    /// an expired/missing session or a transport failure. Only these errors
    /// switch an operation to its local (offline) path.
    #[must_use]
    pub fn allows_offline_fallback(&self) -> bool {
        matches!(self, CoreError::Unauthorized | CoreError::Network(_))
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors embed the full URL; drop the query string.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}
