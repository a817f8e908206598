//! Periodic evaluation of balancers and hand-off of their commands.

use super::{BalanceCommand, StoreBalancer};
use crate::config::BalanceControllerConfig;
use crate::error::Result;
use crate::metrics::BalanceMetrics;
use crate::types::StoreDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives balance commands for execution, typically through the cluster's
/// membership-change path.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn submit(&self, command: BalanceCommand) -> Result<()>;
}

/// Drives an ordered list of balancers.
///
/// Every round asks each balancer in turn and submits the first command
/// produced; later balancers are not consulted in that round.
pub struct BalanceController {
    config: BalanceControllerConfig,
    balancers: Vec<Arc<dyn StoreBalancer>>,
    metrics: Arc<BalanceMetrics>,
}

impl BalanceController {
    pub fn new(
        config: BalanceControllerConfig,
        balancers: Vec<Arc<dyn StoreBalancer>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            balancers,
            metrics: Arc::new(BalanceMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<BalanceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Feed the latest descriptor set to every balancer.
    pub fn update(&self, stores: &[StoreDescriptor]) {
        for balancer in &self.balancers {
            balancer.update(stores);
        }
    }

    /// Run one round without submitting anything.
    pub fn evaluate_once(&self) -> Option<BalanceCommand> {
        self.metrics.evaluations.inc();
        for balancer in &self.balancers {
            if let Some(command) = balancer.balance() {
                self.metrics.commands.inc([balancer.name(), command.kind()]);
                debug!(
                    balancer = balancer.name(),
                    kind = command.kind(),
                    range_id = %command.range_id(),
                    "Balancer produced a command"
                );
                return Some(command);
            }
        }
        None
    }

    /// Run one round and submit the command, if any.
    pub async fn submit_once(&self, sink: &dyn CommandSink) -> Result<Option<BalanceCommand>> {
        let Some(command) = self.evaluate_once() else {
            return Ok(None);
        };
        match sink.submit(command.clone()).await {
            Ok(()) => {
                info!(
                    kind = command.kind(),
                    range_id = %command.range_id(),
                    to_store = command.to_store(),
                    "Balance command submitted"
                );
                Ok(Some(command))
            }
            Err(e) => {
                self.metrics.sink_rejections.inc();
                Err(e)
            }
        }
    }

    /// Start the control loop. It stops when `cancel` fires.
    pub fn run(self: Arc<Self>, sink: Arc<dyn CommandSink>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = cancel.cancelled() => break,
                }

                if let Err(e) = self.submit_once(sink.as_ref()).await {
                    warn!(error = %e, "Balance command rejected, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                    interval.reset();
                }
            }
            info!("Balance controller shutting down");
        })
    }
}

impl std::fmt::Debug for BalanceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.balancers.iter().map(|b| b.name()).collect();
        f.debug_struct("BalanceController")
            .field("config", &self.config)
            .field("balancers", &names)
            .finish()
    }
}
