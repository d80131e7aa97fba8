use std::{sync::Arc, time::Duration};

use tokio::time::{MissedTickBehavior, interval};

use crate::{core::GatewayService, utils::ShutdownToken};

/// Background task that keeps the advertised OpenAPI document current.
pub struct SchemaUpdater {
    gateway: Arc<GatewayService>,
    period: Duration,
}

impl SchemaUpdater {
    pub fn new(gateway: Arc<GatewayService>, period: Duration) -> Self {
        Self { gateway, period }
    }

    /// Refresh immediately, then once per period until shutdown.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        tracing::info!("Starting schema updater with interval: {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.gateway.refresh_schema().await;
                }
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Schema updater stopped");
                    return;
                }
            }
        }
    }
}
