//! fleetwatch — hierarchical infrastructure monitoring.
//!
//! Monitored resources are sampled by per-resource worker tasks
//! ([`engine`]), judged into alert levels ([`alert`]), recorded into
//! bounded durable histories ([`history`]), arranged into a tree whose
//! inner nodes aggregate their children's worst state ([`tree`]), and
//! fanned out to observers ([`hub`]). Resource kinds plug in through the
//! [`probes::Probe`] trait; [`inventory`] reconciles a tree branch against
//! an external source of truth.

pub mod alert;
pub mod engine;
pub mod history;
pub mod hub;
pub mod inventory;
pub mod probes;
pub mod tree;


use serde::{Deserialize, Serialize};

pub use alert::{AlertLevel, AlertState};
pub use engine::{RegistryConfig, SampleEvent, WorkerHandle, WorkerRegistry};
pub use hub::{MonitorEvent, NotificationHub};
pub use inventory::{Inventory, ReconcileSummary, reconcile};
pub use tree::{MonitorTree, NodeId};

/// Stable identity of a monitored resource, independent of where (or how
/// often) it appears in the tree. By convention `kind:locator`, e.g.
/// `http:GET:https://example.com/health` or `memory:web-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ResourceId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
