//! Inventory-driven reconciliation of a tree branch.
//!
//! An [`Inventory`] enumerates the resources that should exist under one
//! group node (a cloud API listing instances, a config file listing URLs).
//! [`reconcile`] diffs that listing against the group's current children by
//! resource identity and adds or removes leaves to match. Grouping children
//! without workers are never touched; they belong to someone else.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, instrument};

use crate::engine::WorkerRegistry;
use crate::probes::Probe;
use crate::tree::{MonitorTree, NodeId};

/// A source of truth for which resources one group should monitor.
#[async_trait]
pub trait Inventory: Send + Sync {
    type Probe: Probe;

    /// Current desired resources. Each probe's display name becomes the
    /// leaf label.
    async fn resources(&self) -> Result<Vec<Arc<Self::Probe>>>;
}

/// What one reconciliation pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    /// Resources the inventory wanted that could not be started. They are
    /// retried on the next pass.
    pub failed: usize,
}

/// Bring `group`'s monitored children in line with `inventory`.
///
/// A failure to start one resource's worker is logged and counted, never
/// fatal to the pass; the listing itself failing is.
#[instrument(skip(tree, registry, inventory))]
pub async fn reconcile<I: Inventory>(
    tree: &Arc<MonitorTree>,
    registry: &Arc<WorkerRegistry>,
    group: NodeId,
    inventory: &I,
) -> Result<ReconcileSummary> {
    let desired = inventory.resources().await?;
    let desired_identities: HashSet<_> = desired
        .iter()
        .map(|probe| probe.spec().identity)
        .collect();

    let mut summary = ReconcileSummary::default();

    let mut present = HashSet::new();
    for child in tree.children(group) {
        let Some(identity) = tree.worker_identity(child) else {
            continue;
        };
        if desired_identities.contains(&identity) {
            present.insert(identity);
        } else {
            debug!("removing {identity}: no longer in inventory");
            tree.remove(child)?;
            summary.removed += 1;
        }
    }

    for probe in desired {
        let spec = probe.spec();
        if present.contains(&spec.identity) {
            continue;
        }
        match registry.acquire(probe).await {
            Ok(worker) => {
                tree.add_leaf(group, spec.display.clone(), worker)?;
                debug!("added {} as {}", spec.identity, spec.display);
                summary.added += 1;
            }
            Err(err) => {
                error!("failed to start worker for {}: {err:#}", spec.identity);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
