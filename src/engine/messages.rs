//! Message types for the sampling engine.
//!
//! Commands travel over each worker's mpsc channel with oneshot reply
//! channels where a response is expected. [`SampleEvent`] is the
//! type-erased view of a record that can cross the engine boundary without
//! dragging the payload's concrete type along.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::ResourceId;
use crate::alert::AlertLevel;
use crate::history::{MetricPayload, ResultRecord, SampleOutcome};

/// Commands accepted by a [`SamplingWorker`](super::worker::SamplingWorker).
#[derive(Debug)]
pub enum WorkerCommand {
    /// Run one sample cycle immediately, bypassing the interval timer, and
    /// reply with the recorded sample. Used by tests and manual refresh.
    SampleNow {
        respond_to: oneshot::Sender<SampleEvent>,
    },

    /// Reply with the in-memory history, newest last.
    Snapshot {
        respond_to: oneshot::Sender<Vec<SampleEvent>>,
    },

    /// Stop sampling. Idempotent; cancels future ticks and ends the loop.
    /// History already persisted stays on disk.
    Stop,
}

/// One recorded sample, stripped of its concrete payload type.
///
/// The metric payload rides along as JSON so observers (live charts, logs)
/// can use it without knowing the resource kind at compile time.
#[derive(Debug, Clone, Serialize)]
pub struct SampleEvent {
    pub identity: ResourceId,
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: i64,
    pub level: AlertLevel,
    pub error: Option<String>,
    pub metrics: Option<serde_json::Value>,
}

impl SampleEvent {
    pub fn from_record<P: MetricPayload>(identity: &ResourceId, record: &ResultRecord<P>) -> Self {
        let (error, metrics) = match &record.outcome {
            SampleOutcome::Failed(message) => (Some(message.clone()), None),
            SampleOutcome::Metrics(payload) => (None, serde_json::to_value(payload).ok()),
        };

        Self {
            identity: identity.clone(),
            kind: P::KIND,
            timestamp: record.timestamp,
            latency_ms: record.latency_ms,
            level: record.level,
            error,
            metrics,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
