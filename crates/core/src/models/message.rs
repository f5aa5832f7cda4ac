use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a coach chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of the coach conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            ts: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Which conversation a message belongs to: a specific portfolio or the
/// general coach page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoachScope {
    Global,
    Portfolio(i64),
}

impl std::fmt::Display for CoachScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoachScope::Global => write!(f, "global"),
            CoachScope::Portfolio(id) => write!(f, "{id}"),
        }
    }
}

impl CoachScope {
    #[must_use]
    pub fn portfolio_id(&self) -> Option<i64> {
        match self {
            CoachScope::Global => None,
            CoachScope::Portfolio(id) => Some(*id),
        }
    }
}
