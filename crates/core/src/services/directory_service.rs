use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::traits::BackendApi;
use crate::errors::CoreError;
use crate::models::portfolio::{DataSource, PortfolioInfo, PortfolioListing};
use crate::storage::manager::StorageManager;

/// The list of portfolios, from the backend or, when it cannot serve the
/// caller, from the local directory.
pub struct PortfolioDirectory {
    backend: Arc<dyn BackendApi>,
    storage: StorageManager,
}

impl PortfolioDirectory {
    pub fn new(backend: Arc<dyn BackendApi>, storage: StorageManager) -> Self {
        Self { backend, storage }
    }

    pub async fn list(&self) -> Result<PortfolioListing, CoreError> {
        match self.backend.list_portfolios().await {
            Ok(portfolios) => Ok(PortfolioListing {
                portfolios,
                source: DataSource::Server,
            }),
            Err(e) if e.allows_offline_fallback() => {
                warn!(error = %e, "portfolio list unavailable, using local-only mode");
                Ok(PortfolioListing {
                    portfolios: self.local_listing()?,
                    source: DataSource::Local,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Local directory plus any portfolio that only has a stored summary.
    fn local_listing(&self) -> Result<Vec<PortfolioInfo>, CoreError> {
        let mut list = self.storage.local_portfolios()?;
        for id in self.storage.summary_ids()? {
            if list.iter().any(|p| p.id == id) {
                continue;
            }
            let name = self
                .storage
                .summary(id)?
                .and_then(|s| s.name)
                .unwrap_or_else(|| format!("Portfolio {id}"));
            list.push(PortfolioInfo {
                id,
                name,
                created_at: None,
            });
        }
        list.sort_by_key(|p| p.id);
        Ok(list)
    }

    /// Create a portfolio on the backend, or locally when it cannot serve
    /// the caller.
    pub async fn create(&self, name: &str) -> Result<(PortfolioInfo, DataSource), CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::ValidationError("Portfolio name must not be empty".into()));
        }

        match self.backend.create_portfolio(name).await {
            Ok(Some(created)) => {
                info!(portfolio_id = created.id, "portfolio created");
                Ok((created, DataSource::Server))
            }
            Ok(None) => {
                // Not echoed back: find it in the refreshed list.
                let created = self
                    .backend
                    .list_portfolios()
                    .await?
                    .into_iter()
                    .filter(|p| p.name == name)
                    .max_by_key(|p| p.id)
                    .ok_or_else(|| {
                        CoreError::Deserialization(format!(
                            "backend did not report the created portfolio '{name}'"
                        ))
                    })?;
                info!(portfolio_id = created.id, "portfolio created");
                Ok((created, DataSource::Server))
            }
            Err(e) if e.allows_offline_fallback() => {
                warn!(error = %e, "creating portfolio locally");
                Ok((self.create_local(name)?, DataSource::Local))
            }
            Err(e) => Err(e),
        }
    }

    fn create_local(&self, name: &str) -> Result<PortfolioInfo, CoreError> {
        let mut local = self.storage.local_portfolios()?;
        // Stored summaries may belong to portfolios missing from the list.
        let id = local
            .iter()
            .map(|p| p.id)
            .chain(self.storage.summary_ids()?)
            .max()
            .unwrap_or(0)
            + 1;
        let created = PortfolioInfo {
            id,
            name: name.to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
        };
        local.push(created.clone());
        self.storage.save_local_portfolios(&local)?;
        info!(portfolio_id = id, "portfolio created locally");
        Ok(created)
    }
}
