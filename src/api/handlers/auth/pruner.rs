//! Background cleanup of spent refresh tokens.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::storage::CredentialStore;

#[derive(Clone, Copy, Debug)]
pub struct PrunerConfig {
    pub retention: ChronoDuration,
    pub interval: Duration,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            retention: ChronoDuration::days(30),
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Delete tokens that expired or were revoked more than `retention` ago.
///
/// # Errors
/// Returns the store error; the background loop logs it and carries on.
pub async fn prune_once(
    store: &dyn CredentialStore,
    retention: ChronoDuration,
) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - retention;
    store.prune_refresh_tokens(cutoff).await
}

pub fn spawn_refresh_token_pruner(
    store: Arc<dyn CredentialStore>,
    config: PrunerConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        loop {
            ticker.tick().await;
            match prune_once(store.as_ref(), config.retention).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "Pruned refresh tokens"),
                Err(err) => error!("Refresh token pruning failed: {err:#}"),
            }
        }
    })
}
