//! SamplingWorker — owns one resource's sample→classify→record→notify cycle.
//!
//! Each worker is an independent tokio task driven by an interval ticker and
//! an mpsc command channel. A tick that fires while a sample is still
//! outstanding is skipped, never queued: per resource there is at most one
//! classification cycle at a time, and a slow sample delays the next tick
//! rather than duplicating it.
//!
//! ## Cycle
//!
//! ```text
//! tick → sample() → classify against current thresholds and history
//!      → rebuild alert state via escalation (NONE/"" is the per-cycle seed)
//!      → append ResultRecord to history (memory, then durable log)
//!      → publish SampleRecorded
//!      → if the alert state changed: update every referencing tree node
//! ```
//!
//! Sampling and classification failures become data — an error record and a
//! degraded alert — and never crash the loop. Persistence failures are
//! retried by the history store on the next cycle.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant as TokioInstant, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, trace, warn};

use crate::ResourceId;
use crate::alert::AlertState;
use crate::history::{HistoryStore, ResultRecord, SampleOutcome};
use crate::hub::{MonitorEvent, NotificationHub};
use crate::probes::{Probe, ProbeSpec};
use crate::tree::MonitorTree;

use super::messages::{SampleEvent, WorkerCommand};
use super::registry::WorkerRegistry;

/// Floor for sampling intervals; guards against a misconfigured zero.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// The per-resource sampling task.
pub(crate) struct SamplingWorker<P: Probe> {
    probe: Arc<P>,
    spec: ProbeSpec,
    history: HistoryStore<P::Payload>,
    state: AlertState,
    command_rx: mpsc::Receiver<WorkerCommand>,
    alert_tx: watch::Sender<AlertState>,
    hub: Arc<NotificationHub>,
    tree: Weak<MonitorTree>,
    interval_duration: Duration,
}

impl<P: Probe> SamplingWorker<P> {
    /// Spawn the worker task and hand back its control handle.
    ///
    /// The newest reloaded record seeds the alert state, so a restart does
    /// not flap alerts for resources that were already bad.
    pub(crate) fn spawn(
        probe: Arc<P>,
        history: HistoryStore<P::Payload>,
        hub: Arc<NotificationHub>,
        tree: Weak<MonitorTree>,
        registry: Weak<WorkerRegistry>,
    ) -> Arc<WorkerHandle> {
        let spec = probe.spec();
        let initial = match history.latest() {
            Some(record) => AlertState::new(
                record.level,
                record.outcome.error().unwrap_or_default(),
            ),
            None => AlertState::default(),
        };

        let (command_tx, command_rx) = mpsc::channel(32);
        let (alert_tx, alert_rx) = watch::channel(initial.clone());
        let interval_duration = probe.interval().max(MIN_SAMPLE_INTERVAL);

        let worker = SamplingWorker {
            probe,
            spec: spec.clone(),
            history,
            state: initial,
            command_rx,
            alert_tx,
            hub,
            tree,
            interval_duration,
        };

        let task = tokio::spawn(worker.run());

        Arc::new(WorkerHandle {
            spec,
            commands: command_tx,
            alert_rx,
            task: Mutex::new(Some(task)),
            registry,
        })
    }

    #[instrument(skip(self), fields(resource = %self.spec.identity))]
    async fn run(mut self) {
        debug!("starting sampling worker");

        // first scheduled tick lands one full interval out; the reloaded
        // history (or an explicit SampleNow) covers the startup window
        let mut ticker = Self::ticker(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;

                    // interval is mutable configuration; pick up edits
                    // without a restart
                    let wanted = self.probe.interval().max(MIN_SAMPLE_INTERVAL);
                    if wanted != self.interval_duration {
                        debug!("sampling interval changed to {wanted:?}");
                        self.interval_duration = wanted;
                        ticker = Self::ticker(wanted);
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    match command {
                        WorkerCommand::SampleNow { respond_to } => {
                            debug!("received SampleNow command");
                            let event = self.cycle().await;
                            let _ = respond_to.send(event);
                        }

                        WorkerCommand::Snapshot { respond_to } => {
                            let _ = respond_to.send(self.snapshot());
                        }

                        WorkerCommand::Stop => {
                            debug!("received stop command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("sampling worker stopped");
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        let mut ticker = interval_at(TokioInstant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// One full sample→classify→record→notify cycle.
    async fn cycle(&mut self) -> SampleEvent {
        let timestamp = Utc::now();
        let started = Instant::now();

        let outcome = match self.probe.sample().await {
            Ok(payload) => SampleOutcome::Metrics(payload),
            Err(err) => {
                debug!("sample failed: {err}");
                SampleOutcome::Failed(err.to_string())
            }
        };
        let latency_ms = started.elapsed().as_millis().min(i64::MAX as u128) as i64;

        let classified = self.probe.classify(&outcome, self.history.records());

        // rebuild from the identity element each cycle: escalation never
        // downgrades within a pass, recovery happens by starting fresh
        let mut next = AlertState::default();
        next.escalate(classified.level, || classified.message.clone());
        let changed = next != self.state;

        let record = ResultRecord::new(timestamp, latency_ms, next.level, outcome);
        let event = SampleEvent::from_record(&self.spec.identity, &record);

        trace!(
            "sampled in {}ms -> {} (changed: {})",
            latency_ms, next, changed
        );

        self.history.append(record).await;

        self.hub.publish(MonitorEvent::SampleRecorded {
            sample: event.clone(),
        });

        if changed {
            self.state = next.clone();
            let _ = self.alert_tx.send(next.clone());
            if let Some(tree) = self.tree.upgrade() {
                tree.worker_alert_changed(&self.spec.identity, next);
            }
        }

        event
    }

    fn snapshot(&self) -> Vec<SampleEvent> {
        self.history
            .records()
            .iter()
            .map(|record| SampleEvent::from_record(&self.spec.identity, record))
            .collect()
    }
}

/// Shared, reference-counted handle to one resource's sampling worker.
///
/// All tree nodes referencing a resource identity share one handle via
/// `Arc`. When the last reference drops, the worker task is aborted — an
/// in-flight sample at that point is discarded — and the identity is
/// removed from the registry's dedup cache. [`stop`](Self::stop) is the
/// graceful alternative: it lets an in-flight sample finish and be
/// recorded, then ends the loop.
pub struct WorkerHandle {
    spec: ProbeSpec,
    commands: mpsc::Sender<WorkerCommand>,
    alert_rx: watch::Receiver<AlertState>,
    task: Mutex<Option<JoinHandle<()>>>,
    registry: Weak<WorkerRegistry>,
}

impl WorkerHandle {
    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    pub fn identity(&self) -> &ResourceId {
        &self.spec.identity
    }

    /// The worker's current alert state.
    pub fn alert_state(&self) -> AlertState {
        self.alert_rx.borrow().clone()
    }

    /// Watch alert-state changes without going through the hub.
    pub fn watch_alerts(&self) -> watch::Receiver<AlertState> {
        self.alert_rx.clone()
    }

    /// Run one cycle immediately and return the recorded sample.
    pub async fn sample_now(&self) -> Result<SampleEvent> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::SampleNow { respond_to: tx })
            .await
            .context("worker is not running")?;
        rx.await.context("worker stopped before responding")
    }

    /// In-memory history, oldest first, as type-erased sample events.
    pub async fn snapshot(&self) -> Result<Vec<SampleEvent>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::Snapshot { respond_to: tx })
            .await
            .context("worker is not running")?;
        rx.await.context("worker stopped before responding")
    }

    /// Stop sampling. Idempotent. An in-flight sample completes and its
    /// result is recorded before the loop exits.
    pub async fn stop(&self) {
        let _ = self.commands.send(WorkerCommand::Stop).await;
    }

    /// Whether the worker task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("identity", &self.spec.identity)
            .field("kind", &self.spec.kind)
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // last reference gone: tear the task down. A sample still in flight
        // is discarded, which is exactly the contract for late results after
        // the worker left the dedup cache.
        if let Some(task) = self
            .task
            .lock()
            .expect("worker task lock poisoned")
            .take()
        {
            task.abort();
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.forget_expired(&self.spec.identity);
        }
    }
}
