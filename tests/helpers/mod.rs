//! Test helpers shared by the integration and end-to-end tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use fleetwatch::ResourceId;
use fleetwatch::alert::{AlertLevel, AlertState};
use fleetwatch::engine::{RegistryConfig, WorkerRegistry};
use fleetwatch::history::{DecodeError, MetricPayload, ResultRecord, SampleOutcome, WireReader, codec};
use fleetwatch::hub::{MonitorEvent, NotificationHub};
use fleetwatch::probes::{Probe, ProbeSpec, SampleError};
use fleetwatch::tree::MonitorTree;

/// Single-value metric payload for driving the engine without real probes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StubSample {
    pub value: u64,
}

impl MetricPayload for StubSample {
    const KIND: &'static str = "stub";
    const VERSION: u32 = 1;

    fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_u64(buf, self.value);
    }

    fn decode(_version: u32, reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            value: reader.read_u64()?,
        })
    }
}

/// A controllable probe: tests set the measured value, the failure mode, and
/// the alert thresholds while the worker keeps running.
pub struct StubProbe {
    identity: String,
    pub display: String,
    value: AtomicU64,
    high_threshold: AtomicU64,
    critical_threshold: AtomicU64,
    fail_message: Mutex<Option<String>>,
    sample_delay: Mutex<Duration>,
    sample_count: AtomicUsize,
}

impl StubProbe {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            display: identity.to_string(),
            value: AtomicU64::new(0),
            high_threshold: AtomicU64::new(100),
            critical_threshold: AtomicU64::new(1000),
            fail_message: Mutex::new(None),
            sample_delay: Mutex::new(Duration::ZERO),
            sample_count: AtomicUsize::new(0),
        }
    }

    pub fn set_value(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn set_high_threshold(&self, threshold: u64) {
        self.high_threshold.store(threshold, Ordering::SeqCst);
    }

    /// Make every following sample fail until cleared with [`Self::recover`].
    pub fn fail_with(&self, message: &str) {
        *self.fail_message.lock().unwrap() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.fail_message.lock().unwrap() = None;
    }

    /// Delay every following sample, for cancellation tests.
    pub fn set_sample_delay(&self, delay: Duration) {
        *self.sample_delay.lock().unwrap() = delay;
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for StubProbe {
    type Payload = StubSample;

    fn spec(&self) -> ProbeSpec {
        ProbeSpec {
            identity: ResourceId::new(self.identity.clone()),
            kind: StubSample::KIND,
            display: self.display.clone(),
        }
    }

    fn interval(&self) -> Duration {
        // tests drive samples explicitly; the ticker must never interfere
        Duration::from_secs(3600)
    }

    async fn sample(&self) -> Result<StubSample, SampleError> {
        self.sample_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.sample_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.fail_message.lock().unwrap().clone() {
            return Err(SampleError::new(message));
        }

        Ok(StubSample {
            value: self.value.load(Ordering::SeqCst),
        })
    }

    fn classify(
        &self,
        outcome: &SampleOutcome<StubSample>,
        _history: &VecDeque<ResultRecord<StubSample>>,
    ) -> AlertState {
        match outcome {
            SampleOutcome::Failed(message) => {
                AlertState::new(AlertLevel::Unknown, format!("sample failed: {message}"))
            }
            SampleOutcome::Metrics(sample) => {
                let high = self.high_threshold.load(Ordering::SeqCst);
                let critical = self.critical_threshold.load(Ordering::SeqCst);
                if sample.value >= critical {
                    AlertState::new(AlertLevel::Critical, format!("value {} critical", sample.value))
                } else if sample.value >= high {
                    AlertState::new(AlertLevel::High, format!("value {} too high", sample.value))
                } else {
                    AlertState::default()
                }
            }
        }
    }
}

/// Hub, empty tree, and registry wired together over `data_dir`.
pub fn test_stack(
    data_dir: &Path,
) -> (Arc<NotificationHub>, Arc<MonitorTree>, Arc<WorkerRegistry>) {
    test_stack_with_capacity(data_dir, fleetwatch::history::DEFAULT_HISTORY_CAPACITY)
}

pub fn test_stack_with_capacity(
    data_dir: &Path,
    history_capacity: usize,
) -> (Arc<NotificationHub>, Arc<MonitorTree>, Arc<WorkerRegistry>) {
    let hub = Arc::new(NotificationHub::new());
    let tree = MonitorTree::new(Arc::clone(&hub), "root");
    let config = RegistryConfig {
        data_dir: data_dir.to_path_buf(),
        history_capacity,
    };
    let registry = WorkerRegistry::new(config, Arc::clone(&hub), &tree);
    (hub, tree, registry)
}

/// Install a test subscriber once; controlled via `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Pull every event already sitting in the channel.
pub fn drain_events(rx: &mut tokio::sync::mpsc::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
