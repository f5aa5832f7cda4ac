use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::CoreError;

/// Client configuration. Defaults match the hosted backend's local dev setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend base URL, without a trailing slash (e.g., "http://127.0.0.1:5000").
    pub api_base: String,

    /// Simulated cash a portfolio starts with when nothing is stored yet.
    pub default_cash: f64,

    /// Maximum number of coach messages kept per conversation.
    pub coach_history_cap: usize,

    /// Number of prior messages sent along with each coach request.
    pub coach_context_window: usize,

    /// Questions drawn per quiz attempt (fewer if the pool is smaller).
    pub quiz_questions_per_attempt: usize,

    /// Minimum query length before search-as-you-type hits the backend.
    pub search_min_chars: usize,

    /// Debounce delay for search and price autofill, in milliseconds.
    pub debounce_ms: u64,

    /// HTTP request timeout, in seconds.
    pub request_timeout_secs: u64,

    /// Minimum last score for a completed lesson to count towards overall progress.
    pub lesson_pass_pct: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:5000".to_string(),
            default_cash: 100_000.0,
            coach_history_cap: 50,
            coach_context_window: 6,
            quiz_questions_per_attempt: 5,
            search_min_chars: 2,
            debounce_ms: 300,
            request_timeout_secs: 30,
            lesson_pass_pct: 60,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `PAPERTRADE_*` environment variables.
    ///
    /// Recognised: `PAPERTRADE_API_BASE`, `PAPERTRADE_DEFAULT_CASH`,
    /// `PAPERTRADE_COACH_HISTORY_CAP`, `PAPERTRADE_COACH_CONTEXT_WINDOW`,
    /// `PAPERTRADE_QUIZ_QUESTIONS`, `PAPERTRADE_DEBOUNCE_MS`,
    /// `PAPERTRADE_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut settings = Self::default();

        if let Ok(base) = std::env::var("PAPERTRADE_API_BASE") {
            settings.api_base = base;
        }
        if let Some(v) = env_parse::<f64>("PAPERTRADE_DEFAULT_CASH")? {
            settings.default_cash = v;
        }
        if let Some(v) = env_parse::<usize>("PAPERTRADE_COACH_HISTORY_CAP")? {
            settings.coach_history_cap = v;
        }
        if let Some(v) = env_parse::<usize>("PAPERTRADE_COACH_CONTEXT_WINDOW")? {
            settings.coach_context_window = v;
        }
        if let Some(v) = env_parse::<usize>("PAPERTRADE_QUIZ_QUESTIONS")? {
            settings.quiz_questions_per_attempt = v;
        }
        if let Some(v) = env_parse::<u64>("PAPERTRADE_DEBOUNCE_MS")? {
            settings.debounce_ms = v;
        }
        if let Some(v) = env_parse::<u64>("PAPERTRADE_REQUEST_TIMEOUT_SECS")? {
            settings.request_timeout_secs = v;
        }

        settings.api_base = settings.api_base.trim().trim_end_matches('/').to_string();
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the services cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.api_base.trim().is_empty() {
            return Err(CoreError::ValidationError("api_base must not be empty".into()));
        }
        if !self.default_cash.is_finite() || self.default_cash < 0.0 {
            return Err(CoreError::ValidationError(format!(
                "default_cash must be a non-negative number, got {}",
                self.default_cash
            )));
        }
        if self.coach_history_cap == 0 {
            return Err(CoreError::ValidationError("coach_history_cap must be greater than 0".into()));
        }
        if self.quiz_questions_per_attempt == 0 {
            return Err(CoreError::ValidationError(
                "quiz_questions_per_attempt must be greater than 0".into(),
            ));
        }
        if self.lesson_pass_pct > 100 {
            return Err(CoreError::ValidationError(format!(
                "lesson_pass_pct must be within 0..=100, got {}",
                self.lesson_pass_pct
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join a path such as `/api/stocks` onto the base URL.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        let base = self.api_base.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CoreError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CoreError::ValidationError(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}
