//! Deduplicating registry of sampling workers.
//!
//! Resource identity, not tree placement, decides how many workers exist:
//! any number of tree nodes referencing the same [`ResourceId`] share one
//! worker, one history, one alert state. The registry holds only weak
//! references, so worker lifetime follows the handles the tree (and tests)
//! hold, not the registry itself.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::ResourceId;
use crate::history::{DEFAULT_HISTORY_CAPACITY, HistoryStore};
use crate::hub::NotificationHub;
use crate::probes::Probe;
use crate::tree::MonitorTree;

use super::worker::{SamplingWorker, WorkerHandle};

/// Where history logs live and how much history each worker retains.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub data_dir: PathBuf,
    pub history_capacity: usize,
}

impl RegistryConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

pub struct WorkerRegistry {
    config: RegistryConfig,
    hub: Arc<NotificationHub>,
    tree: Weak<MonitorTree>,
    workers: Mutex<HashMap<ResourceId, Weak<WorkerHandle>>>,
}

impl WorkerRegistry {
    pub fn new(
        config: RegistryConfig,
        hub: Arc<NotificationHub>,
        tree: &Arc<MonitorTree>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            tree: Arc::downgrade(tree),
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Get the worker for this probe's identity, starting it if needed.
    ///
    /// Two nodes referencing the same identity get the same handle back.
    /// A live worker whose spec disagrees with the probe's is a programming
    /// error in the caller (identity attributes are immutable) and panics.
    #[instrument(skip(self, probe), fields(resource = %probe.spec().identity))]
    pub async fn acquire<P: Probe>(self: &Arc<Self>, probe: Arc<P>) -> Result<Arc<WorkerHandle>> {
        let spec = probe.spec();

        if let Some(existing) = self.lookup(&spec.identity) {
            if *existing.spec() != spec {
                panic!(
                    "conflicting specs for resource {}: worker has {:?}, caller wants {:?}",
                    spec.identity,
                    existing.spec(),
                    spec
                );
            }
            debug!("reusing running worker");
            return Ok(existing);
        }

        // Build the history store outside the lock; the open is async and
        // may take a while on a cold disk.
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create history directory {}",
                    self.config.data_dir.display()
                )
            })?;
        let path = self.config.data_dir.join(log_file_name(&spec.identity));
        let history = HistoryStore::open(spec.identity.clone(), path, self.config.history_capacity)
            .await
            .with_context(|| format!("failed to open history store for {}", spec.identity))?;

        let mut workers = self.workers.lock().expect("worker map lock poisoned");

        // Someone may have raced us while we were opening the store. Their
        // worker wins; ours (not yet spawned) is discarded with the history
        // store we opened.
        if let Some(existing) = workers.get(&spec.identity).and_then(Weak::upgrade) {
            if *existing.spec() != spec {
                panic!(
                    "conflicting specs for resource {}: worker has {:?}, caller wants {:?}",
                    spec.identity,
                    existing.spec(),
                    spec
                );
            }
            debug!("lost creation race, reusing the winner");
            return Ok(existing);
        }

        debug!("starting new sampling worker");
        let handle = SamplingWorker::spawn(
            probe,
            history,
            Arc::clone(&self.hub),
            self.tree.clone(),
            Arc::downgrade(self),
        );
        workers.insert(spec.identity.clone(), Arc::downgrade(&handle));

        Ok(handle)
    }

    /// Look up a live worker without creating one.
    pub fn lookup(&self, identity: &ResourceId) -> Option<Arc<WorkerHandle>> {
        self.workers
            .lock()
            .expect("worker map lock poisoned")
            .get(identity)
            .and_then(Weak::upgrade)
    }

    /// Number of currently live workers. Prunes dead entries as it counts.
    pub fn active_workers(&self) -> usize {
        let mut workers = self.workers.lock().expect("worker map lock poisoned");
        workers.retain(|_, weak| weak.strong_count() > 0);
        workers.len()
    }

    /// Called from [`WorkerHandle::drop`]: remove the entry for `identity`
    /// if it has expired. An entry that is live again belongs to a fresh
    /// worker that re-acquired the identity mid-teardown and must stay.
    pub(crate) fn forget_expired(&self, identity: &ResourceId) {
        let mut workers = self.workers.lock().expect("worker map lock poisoned");
        if let Some(weak) = workers.get(identity) {
            if weak.strong_count() == 0 {
                workers.remove(identity);
                debug!("forgot stopped worker for {identity}");
            }
        }
    }
}

/// Identities can contain separators and URL characters; flatten them into
/// one safe file name per resource.
fn log_file_name(identity: &ResourceId) -> String {
    let mut name: String = identity
        .as_str()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' | '?' | '#' => '-',
            other => other,
        })
        .collect();
    name.push_str(".hist");
    name
}
