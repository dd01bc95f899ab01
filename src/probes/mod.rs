//! The per-resource-kind plug-in contract.
//!
//! Everything kind-specific about monitoring one resource — how to take a
//! sample, how to judge it, what its metric payload looks like on the wire —
//! lives behind the [`Probe`] trait. The engine is generic over it; adding a
//! new resource kind means implementing this trait and nothing else.

pub mod http;
pub mod memory;

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::ResourceId;
use crate::alert::AlertState;
use crate::history::{MetricPayload, ResultRecord, SampleOutcome};

/// Why a sample could not be taken.
///
/// This is data, not a fault: the worker records it as an error record and
/// keeps sampling. Classification decides what alert level it maps to.
#[derive(Debug)]
pub struct SampleError {
    message: String,
}

impl SampleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SampleError {}

impl From<anyhow::Error> for SampleError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Immutable attributes of a monitored resource.
///
/// Every tree node referencing the same identity must agree on these;
/// disagreement is a collaborator bug and the registry treats it as fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Stable key for the monitored thing, independent of tree placement.
    pub identity: ResourceId,

    /// Payload kind name (matches [`MetricPayload::KIND`]).
    pub kind: &'static str,

    /// Human-readable name for tree labels and logs.
    pub display: String,
}

/// One resource kind's sampling and classification logic.
///
/// `interval` and whatever configuration `classify` consults are re-read on
/// every cycle, so threshold edits apply without restarting the worker.
/// `sample` may block on network or subprocess I/O; it runs on the worker's
/// own task and never delays other resources.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    type Payload: MetricPayload;

    fn spec(&self) -> ProbeSpec;

    /// Current sampling interval. Re-read after every tick.
    fn interval(&self) -> Duration;

    /// Take one measurement. Failure becomes an error record, never a
    /// process fault.
    async fn sample(&self) -> Result<Self::Payload, SampleError>;

    /// Judge one outcome against current thresholds. `history` holds the
    /// retained records from before this sample, oldest first, for
    /// trend-based rules.
    fn classify(
        &self,
        outcome: &SampleOutcome<Self::Payload>,
        history: &VecDeque<ResultRecord<Self::Payload>>,
    ) -> AlertState;
}

/// Consecutive trailing failures in `history`, counting back from the end.
///
/// Shared helper for probes with "N failures in a row" escalation rules.
pub fn trailing_failures<P>(history: &VecDeque<ResultRecord<P>>) -> usize {
    history
        .iter()
        .rev()
        .take_while(|record| record.outcome.is_failure())
        .count()
}
