//! The monitor tree: hierarchy, aggregation, escalation propagation.
//!
//! Nodes live in an arena keyed by [`NodeId`]; parents and children refer to
//! each other by id. A node can carry a worker handle (a leaf, or a group
//! with its own probe), child nodes, or both. Each node holds two alert
//! states: `own`, fed by its worker, and `aggregate`, the escalation of
//! `own` with the children's aggregates. Aggregates are recomputed eagerly
//! on every change and propagated upward only as far as they actually
//! change.
//!
//! All mutation happens under one `RwLock`; alert-change events are
//! published while the lock is held, which keeps per-node event order
//! consistent with the order changes were applied (the hub never blocks).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, trace};

use crate::ResourceId;
use crate::alert::{AlertLevel, AlertState};
use crate::engine::worker::WorkerHandle;
use crate::hub::{MonitorEvent, NotificationHub};

/// Path segment separator in [`MonitorTree::full_path`] output.
const PATH_SEPARATOR: &str = "/";

/// Opaque, tree-unique node handle. Never reused within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    #[cfg(test)]
    pub(crate) fn test_id(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Node {
    label: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    worker: Option<Arc<WorkerHandle>>,
    /// Alert state from this node's own worker; NONE for plain groups.
    own: AlertState,
    /// `own` escalated with the children's aggregates.
    aggregate: AlertState,
}

struct TreeInner {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl TreeInner {
    fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn path_of(&self, id: NodeId) -> Option<String> {
        let mut labels = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.nodes.get(&current)?;
            labels.push(node.label.as_str());
            cursor = node.parent;
        }
        labels.reverse();
        Some(labels.join(PATH_SEPARATOR))
    }

    /// Escalate `own` with the children's aggregates. The node's own state
    /// seeds the pass, so on equal levels the node's own message wins, then
    /// children in insertion order.
    fn compute_aggregate(&self, id: NodeId) -> AlertState {
        let Some(node) = self.nodes.get(&id) else {
            return AlertState::default();
        };
        let mut aggregate = node.own.clone();
        for child in &node.children {
            if let Some(child_node) = self.nodes.get(child) {
                aggregate.escalate(child_node.aggregate.level, || {
                    child_node.aggregate.message.clone()
                });
            }
        }
        aggregate
    }
}

/// The shared monitor hierarchy.
pub struct MonitorTree {
    hub: Arc<NotificationHub>,
    inner: RwLock<TreeInner>,
}

impl MonitorTree {
    pub fn new(hub: Arc<NotificationHub>, root_label: impl Into<String>) -> Arc<Self> {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                label: root_label.into(),
                parent: None,
                children: Vec::new(),
                worker: None,
                own: AlertState::default(),
                aggregate: AlertState::default(),
            },
        );

        Arc::new(Self {
            hub,
            inner: RwLock::new(TreeInner {
                nodes,
                root,
                next_id: 1,
            }),
        })
    }

    pub fn root(&self) -> NodeId {
        self.read().root
    }

    /// Add a grouping node with no worker of its own.
    pub fn add_group(&self, parent: NodeId, label: impl Into<String>) -> Result<NodeId> {
        self.insert(parent, label.into(), None)
    }

    /// Add a node monitoring one resource via `worker`.
    pub fn add_leaf(
        &self,
        parent: NodeId,
        label: impl Into<String>,
        worker: Arc<WorkerHandle>,
    ) -> Result<NodeId> {
        self.insert(parent, label.into(), Some(worker))
    }

    fn insert(
        &self,
        parent: NodeId,
        label: String,
        worker: Option<Arc<WorkerHandle>>,
    ) -> Result<NodeId> {
        let mut inner = self.write();
        if !inner.nodes.contains_key(&parent) {
            bail!("no such node: {parent}");
        }

        let own = worker
            .as_ref()
            .map(|w| w.alert_state())
            .unwrap_or_default();

        let id = inner.allocate();
        inner.nodes.insert(
            id,
            Node {
                label,
                parent: Some(parent),
                children: Vec::new(),
                worker,
                own: own.clone(),
                aggregate: own,
            },
        );
        if let Some(node) = inner.nodes.get_mut(&parent) {
            node.children.push(id);
        }

        let path = inner.path_of(id).unwrap_or_default();
        debug!("added node {id} at {path}");
        self.hub.publish(MonitorEvent::NodeAdded { node: id, path });

        // a leaf that arrives already alerting must raise its ancestors
        self.propagate_from(&mut inner, parent);

        Ok(id)
    }

    /// Attach a worker to an existing node (turning a group into a hybrid).
    pub fn attach_worker(&self, id: NodeId, worker: Arc<WorkerHandle>) -> Result<()> {
        let mut inner = self.write();
        let own = worker.alert_state();
        match inner.nodes.get_mut(&id) {
            Some(node) => {
                node.worker = Some(worker);
                node.own = own;
            }
            None => bail!("no such node: {id}"),
        }
        self.propagate_from(&mut inner, id);
        Ok(())
    }

    /// Remove a node and its whole subtree. Each removed node gets its own
    /// `NodeRemoved` event, parents before children. Worker handles held by
    /// the subtree are dropped; a worker whose last reference this was stops.
    pub fn remove(&self, id: NodeId) -> Result<()> {
        let mut inner = self.write();
        if id == inner.root {
            bail!("cannot remove the root node");
        }
        let Some(parent) = inner.nodes.get(&id).and_then(|node| node.parent) else {
            bail!("no such node: {id}");
        };

        // collect parent-first so events read top-down
        let mut doomed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let path = inner.path_of(current).unwrap_or_default();
            doomed.push((current, path));
            if let Some(node) = inner.nodes.get(&current) {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        if let Some(node) = inner.nodes.get_mut(&parent) {
            node.children.retain(|child| *child != id);
        }
        for (node, path) in doomed {
            inner.nodes.remove(&node);
            debug!("removed node {node} at {path}");
            self.hub.publish(MonitorEvent::NodeRemoved { node, path });
        }

        // the subtree may have been what kept an ancestor escalated
        self.propagate_from(&mut inner, parent);
        Ok(())
    }

    pub fn label(&self, id: NodeId) -> Option<String> {
        self.read().nodes.get(&id).map(|node| node.label.clone())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.read().nodes.get(&id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.read()
            .nodes
            .get(&id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// The node's aggregate alert level, or `None` if the node is gone.
    pub fn alert_level(&self, id: NodeId) -> Option<AlertLevel> {
        self.read().nodes.get(&id).map(|node| node.aggregate.level)
    }

    pub fn alert_state(&self, id: NodeId) -> Option<AlertState> {
        self.read().nodes.get(&id).map(|node| node.aggregate.clone())
    }

    /// Labels from the root down to `id`, joined with `/`.
    pub fn full_path(&self, id: NodeId) -> Option<String> {
        self.read().path_of(id)
    }

    pub fn worker_identity(&self, id: NodeId) -> Option<ResourceId> {
        self.read()
            .nodes
            .get(&id)
            .and_then(|node| node.worker.as_ref())
            .map(|worker| worker.identity().clone())
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Worker callback: a resource's alert state changed. Updates every node
    /// referencing that identity and propagates upward.
    pub(crate) fn worker_alert_changed(&self, identity: &ResourceId, state: AlertState) {
        let mut inner = self.write();
        let affected: Vec<NodeId> = inner
            .nodes
            .iter()
            .filter(|(_, node)| {
                node.worker
                    .as_ref()
                    .is_some_and(|worker| worker.identity() == identity)
            })
            .map(|(id, _)| *id)
            .collect();

        trace!(
            "alert change for {identity} -> {state} touches {} node(s)",
            affected.len()
        );

        for id in affected {
            if let Some(node) = inner.nodes.get_mut(&id) {
                node.own = state.clone();
            }
            self.propagate_from(&mut inner, id);
        }
    }

    /// Recompute aggregates from `start` toward the root, publishing an
    /// `AlertChanged` per node whose aggregate actually changed and stopping
    /// at the first node where nothing changed.
    fn propagate_from(&self, inner: &mut TreeInner, start: NodeId) {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let fresh = inner.compute_aggregate(id);
            let Some(node) = inner.nodes.get_mut(&id) else {
                break;
            };
            if fresh == node.aggregate {
                break;
            }

            let previous = std::mem::replace(&mut node.aggregate, fresh.clone());
            let parent = node.parent;
            let path = inner.path_of(id).unwrap_or_default();
            debug!("alert at {path}: {previous} -> {fresh}");
            self.hub.publish(MonitorEvent::AlertChanged {
                node: id,
                path,
                previous,
                current: fresh,
            });
            cursor = parent;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TreeInner> {
        self.inner.read().expect("monitor tree lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TreeInner> {
        self.inner.write().expect("monitor tree lock poisoned")
    }
}
