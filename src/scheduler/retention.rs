//! Retention manager for cleaning up old metric values.

use crate::db::Store;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How often expired values are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Manager for deleting values past the retention period.
pub struct RetentionManager {
    store: Arc<Store>,
    retention: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let retention = self.retention;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, retention);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn process_retention(store: &Store, retention: Duration) -> usize {
    let retention = match ChronoDuration::from_std(retention) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("RetentionManager: Retention period out of range: {}", e);
            return 0;
        }
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
        return 0;
    };

    match store.delete_metric_values_before(cutoff) {
        Ok(n) => {
            if n > 0 {
                tracing::info!("RetentionManager: Deleted {} values older than {}", n, cutoff);
            }
            n
        }
        Err(e) => {
            tracing::error!("RetentionManager: Failed to delete expired values: {}", e);
            0
        }
    }
}
