//! Bounded per-resource sample history with durable backing.
//!
//! The in-memory ring is authoritative: a record is part of history the
//! moment it is appended, whether or not the durable write succeeds. Failed
//! durable writes queue up and are retried on the next append, so a blip in
//! the filesystem costs durability for a window, never correctness.

use std::collections::VecDeque;
use std::path::PathBuf;

use tracing::warn;

use crate::ResourceId;

use super::error::PersistenceResult;
use super::log::HistoryLog;
use super::record::{MetricPayload, ResultRecord};

/// Default bound on retained samples per resource.
pub const DEFAULT_HISTORY_CAPACITY: usize = 2000;

/// Ordered, capacity-bounded history of one resource's samples.
pub struct HistoryStore<P: MetricPayload> {
    identity: ResourceId,
    entries: VecDeque<ResultRecord<P>>,
    capacity: usize,
    log: HistoryLog,
    /// Encoded frames whose durable write failed; retried front-first.
    pending: VecDeque<Vec<u8>>,
    #[cfg(test)]
    pub(crate) fail_writes: bool,
}

impl<P: MetricPayload> HistoryStore<P> {
    /// Open the store, reloading the most recent `capacity` records from
    /// the durable log. A missing or unreadable log yields empty history;
    /// failing to open the log for append is a real error, surfaced so the
    /// caller can refuse to start the resource.
    pub async fn open(
        identity: ResourceId,
        path: PathBuf,
        capacity: usize,
    ) -> PersistenceResult<Self> {
        let loaded = HistoryLog::load::<P>(&path, capacity).await;
        let log = HistoryLog::open(path).await?;

        Ok(Self {
            identity,
            entries: VecDeque::from(loaded),
            capacity,
            log,
            pending: VecDeque::new(),
            #[cfg(test)]
            fail_writes: false,
        })
    }

    pub fn identity(&self) -> &ResourceId {
        &self.identity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest record; defines the resource's current alert level.
    pub fn latest(&self) -> Option<&ResultRecord<P>> {
        self.entries.back()
    }

    pub fn records(&self) -> &VecDeque<ResultRecord<P>> {
        &self.entries
    }

    /// Append a record: in-memory first (evicting the oldest past capacity),
    /// then durably, retrying anything still pending from earlier failures.
    pub async fn append(&mut self, record: ResultRecord<P>) {
        let mut frame = Vec::new();
        record.encode(&mut frame);

        self.entries.push_back(record);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        self.pending.push_back(frame);
        // anything older than the in-memory window is not worth persisting
        while self.pending.len() > self.capacity {
            self.pending.pop_front();
            warn!(
                "dropping oldest unpersisted sample for {}: retry queue full at {}",
                self.identity, self.capacity
            );
        }

        self.flush_pending().await;
    }

    /// Number of records awaiting a durable write.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    async fn flush_pending(&mut self) {
        #[cfg(test)]
        if self.fail_writes {
            warn!(
                "failed to persist sample for {}: write failure injected (will retry)",
                self.identity
            );
            return;
        }

        while let Some(frame) = self.pending.front() {
            match self.log.append(frame).await {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(err) => {
                    warn!(
                        "failed to persist sample for {}: {} ({} pending, will retry)",
                        self.identity,
                        err,
                        self.pending.len()
                    );
                    break;
                }
            }
        }
    }
}
