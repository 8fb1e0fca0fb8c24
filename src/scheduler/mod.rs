//! Background tasks: alert evaluation and value retention.

mod alerts;
mod retention;

pub use alerts::*;
pub use retention::*;

use crate::config::MonitoringConfig;

use std::sync::Arc;

/// Owns the engine's background managers.
pub struct Scheduler {
    engine: Arc<AlertEngine>,
    retention_manager: RetentionManager,
    config: MonitoringConfig,
}

impl Scheduler {
    pub fn new(engine: Arc<AlertEngine>, retention_manager: RetentionManager, config: MonitoringConfig) -> Self {
        Self {
            engine,
            retention_manager,
            config,
        }
    }

    /// Start retention and, when enabled, the alert evaluation loop.
    pub fn start(&self) {
        if self.config.enable_alerts {
            self.engine.start(self.config.scrape_interval);
        } else {
            tracing::info!("Scheduler: Alert evaluation disabled");
        }
        self.retention_manager.start();
    }

    /// Stop all background managers.
    pub async fn stop(&self) {
        self.engine.stop().await;
        self.retention_manager.stop().await;
    }
}
