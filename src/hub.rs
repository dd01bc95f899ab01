//! Fan-out of monitor events to registered observers.
//!
//! Every observer gets its own bounded channel. The publisher never waits:
//! an observer whose channel is full or closed is dropped on the spot, so a
//! stuck console can never stall the sampling engine. Within one resource,
//! events arrive in the order the underlying changes occurred; across
//! resources no ordering is promised.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::alert::AlertState;
use crate::engine::messages::SampleEvent;
use crate::tree::NodeId;

/// Per-observer channel capacity.
const EVENT_BUFFER: usize = 256;

/// Something observers care about.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A node's aggregate alert state changed. Emitted for every tree level
    /// whose aggregate actually changed, leaf first.
    AlertChanged {
        node: NodeId,
        path: String,
        previous: AlertState,
        current: AlertState,
    },

    /// A node joined the tree.
    NodeAdded { node: NodeId, path: String },

    /// A node (and its subtree, as separate events) left the tree.
    NodeRemoved { node: NodeId, path: String },

    /// A sampling worker recorded a new sample. Fired on every sample, not
    /// just alert changes, so live charts can follow raw measurements.
    SampleRecorded { sample: SampleEvent },
}

struct Observer {
    id: u64,
    tx: mpsc::Sender<MonitorEvent>,
    /// Subscribed via [`NotificationHub::subscribe_samples`]; only receives
    /// `SampleRecorded` events.
    samples_only: bool,
}

/// Registry of observers plus the publish side.
///
/// Publishing is synchronous and non-blocking; it is safe to call while
/// holding the tree lock, which is what keeps per-resource event order
/// aligned with the order the changes were applied.
#[derive(Default)]
pub struct NotificationHub {
    observers: Mutex<Vec<Observer>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for all events.
    pub fn subscribe(&self) -> mpsc::Receiver<MonitorEvent> {
        self.register(false)
    }

    /// Register an observer that only wants raw samples (live charting).
    pub fn subscribe_samples(&self) -> mpsc::Receiver<MonitorEvent> {
        self.register(true)
    }

    fn register(&self, samples_only: bool) -> mpsc::Receiver<MonitorEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .push(Observer {
                id,
                tx,
                samples_only,
            });
        debug!("observer {id} subscribed (samples_only: {samples_only})");
        rx
    }

    /// Deliver an event to every interested observer, dropping any observer
    /// that cannot take it.
    pub fn publish(&self, event: MonitorEvent) {
        let is_sample = matches!(event, MonitorEvent::SampleRecorded { .. });

        let mut observers = self.observers.lock().expect("observer list lock poisoned");
        observers.retain(|observer| {
            if observer.samples_only && !is_sample {
                return true;
            }
            match observer.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("dropping observer {}: channel full", observer.id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("removing observer {}: channel closed", observer.id);
                    false
                }
            }
        });
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .len()
    }
}
