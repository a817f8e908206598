//! Removal of replicas left behind by a repeated range bootstrap.
//!
//! When the same key space gets bootstrapped twice, two generations of ranges
//! (distinguished by their `RangeId::epoch`) coexist. The balancer keeps the
//! oldest generation and asks the local leaders of the newest one to quit, one
//! range per evaluation.

use super::{organize_by_epoch, BalanceCommand, ChangeConfigCommand, DescriptorSnapshot, StoreBalancer};
use crate::types::{StoreDescriptor, StoreId};
use tracing::{debug, info};

/// Proposes removing local leader ranges of a redundant epoch.
#[derive(Debug)]
pub struct RedundantEpochRemovalBalancer {
    local_store_id: StoreId,
    snapshot: DescriptorSnapshot,
}

impl RedundantEpochRemovalBalancer {
    pub fn new(local_store_id: impl Into<StoreId>) -> Self {
        Self {
            local_store_id: local_store_id.into(),
            snapshot: DescriptorSnapshot::default(),
        }
    }
}

impl StoreBalancer for RedundantEpochRemovalBalancer {
    fn name(&self) -> &'static str {
        "redundant_epoch_removal"
    }

    fn local_store_id(&self) -> &str {
        &self.local_store_id
    }

    fn update(&self, stores: &[StoreDescriptor]) {
        self.snapshot.replace(stores);
    }

    fn balance(&self) -> Option<BalanceCommand> {
        let stores = self.snapshot.load();
        let by_epoch = organize_by_epoch(&stores);
        if by_epoch.len() < 2 {
            return None;
        }

        let (epoch, newest) = by_epoch.iter().next_back()?;
        let Some(local) = newest.iter().find(|s| s.store_id == self.local_store_id) else {
            debug!(
                store_id = %self.local_store_id,
                epoch,
                "Local store hosts nothing of the redundant epoch"
            );
            return None;
        };
        let range = local.leader_ranges().next()?;

        info!(
            store_id = %self.local_store_id,
            range_id = %range.id,
            epoch,
            epochs = by_epoch.len(),
            "Proposing removal of redundant epoch range"
        );
        Some(BalanceCommand::ChangeConfig(ChangeConfigCommand::quit(
            self.local_store_id.clone(),
            range,
        )))
    }
}
