use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::KvStore;

/// Purges expired cache entries. Wakes every hour.
pub async fn cleanup_loop(store: Arc<dyn KvStore>, cancel: CancellationToken) {
    info!("cleanup job started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cleanup job shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(3600)) => {}
        }

        match store.purge_expired().await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, "purged expired cache entries");
                }
            }
            Err(e) => {
                error!(error = %e, "cache cleanup failed");
            }
        }
    }
}
