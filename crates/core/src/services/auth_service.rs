use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::traits::BackendApi;
use crate::backend::types::{AuthResponse, Credentials, User};
use crate::errors::CoreError;
use crate::storage::manager::StorageManager;

/// Whether the backend currently recognises the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Authenticated { user: User },
    Anonymous,
}

impl SessionState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated { user } => Some(user),
            SessionState::Anonymous => None,
        }
    }
}

/// Session handling: the backend's cookie session first, a stored bearer
/// token second.
pub struct AuthService {
    backend: Arc<dyn BackendApi>,
    storage: StorageManager,
}

impl AuthService {
    /// Installs any stored bearer token on the backend.
    pub fn new(backend: Arc<dyn BackendApi>, storage: StorageManager) -> Self {
        match storage.auth_token() {
            Ok(token) => backend.set_bearer_token(token),
            Err(e) => warn!(error = %e, "could not read stored auth token"),
        }
        Self { backend, storage }
    }

    /// Check the cookie session, then the stored token.
    ///
    /// A token the backend rejects is removed. A token that could not be
    /// checked because the backend is unreachable is kept.
    pub async fn verify(&self) -> Result<SessionState, CoreError> {
        match self.backend.me().await {
            Ok(user) => return Ok(SessionState::Authenticated { user }),
            Err(e) => debug!(error = %e, "no cookie session"),
        }

        let Some(token) = self.storage.auth_token()? else {
            return Ok(SessionState::Anonymous);
        };

        match self.backend.verify_token(&token).await {
            Ok(user) => {
                self.backend.set_bearer_token(Some(token));
                Ok(SessionState::Authenticated { user })
            }
            Err(CoreError::Network(msg)) => {
                warn!(error = %msg, "could not verify stored token");
                Ok(SessionState::Anonymous)
            }
            Err(e) => {
                info!(error = %e, "stored token rejected, removing it");
                self.storage.clear_auth_token()?;
                self.backend.set_bearer_token(None);
                Ok(SessionState::Anonymous)
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionState, CoreError> {
        let credentials = Self::credentials(username, password, None)?;
        let resp = self.backend.login(&credentials).await?;
        info!(username = %credentials.username, "logged in");
        self.establish(resp).await
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<SessionState, CoreError> {
        let credentials = Self::credentials(username, password, email)?;
        let resp = self.backend.register(&credentials).await?;
        info!(username = %credentials.username, "registered");
        self.establish(resp).await
    }

    /// Forget the stored token and end the backend session. The backend
    /// call is best effort.
    pub async fn logout(&self) -> Result<(), CoreError> {
        self.storage.clear_auth_token()?;
        self.backend.set_bearer_token(None);
        if let Err(e) = self.backend.logout().await {
            warn!(error = %e, "backend logout failed");
        }
        info!("logged out");
        Ok(())
    }

    async fn establish(&self, resp: AuthResponse) -> Result<SessionState, CoreError> {
        if let Some(token) = resp.token.filter(|t| !t.trim().is_empty()) {
            self.storage.set_auth_token(&token)?;
            self.backend.set_bearer_token(Some(token));
        }
        let user = match resp.user {
            Some(user) => user,
            None => self.backend.me().await.unwrap_or_default(),
        };
        Ok(SessionState::Authenticated { user })
    }

    fn credentials(username: &str, password: &str, email: Option<&str>) -> Result<Credentials, CoreError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(CoreError::ValidationError(
                "Username and password are required".into(),
            ));
        }
        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
            email: email
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        })
    }
}
