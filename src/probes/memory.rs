//! Local memory-pressure probe backed by sysinfo.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sysinfo::System;

use crate::ResourceId;
use crate::alert::{AlertLevel, AlertState};
use crate::history::{DecodeError, MetricPayload, ResultRecord, SampleOutcome, WireReader, codec};

use super::{Probe, ProbeSpec, SampleError};

/// One memory measurement. Byte counts plus the derived percentage, so
/// observers need no arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub total: u64,
    pub used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub used_percent: f32,
}

impl MetricPayload for MemorySample {
    const KIND: &'static str = "memory";
    const VERSION: u32 = 1;

    fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_u64(buf, self.total);
        codec::put_u64(buf, self.used);
        codec::put_u64(buf, self.swap_total);
        codec::put_u64(buf, self.swap_used);
        codec::put_f32(buf, self.used_percent);
    }

    fn decode(_version: u32, reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            total: reader.read_u64()?,
            used: reader.read_u64()?,
            swap_total: reader.read_u64()?,
            swap_used: reader.read_u64()?,
            used_percent: reader.read_f32()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryProbeConfig {
    pub interval: Duration,
    pub medium_percent: f32,
    pub high_percent: f32,
    pub critical_percent: f32,
}

impl Default for MemoryProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            medium_percent: 80.0,
            high_percent: 90.0,
            critical_percent: 95.0,
        }
    }
}

pub struct MemoryProbe {
    host_label: String,
    system: Mutex<System>,
    config: Arc<RwLock<MemoryProbeConfig>>,
}

impl MemoryProbe {
    pub fn new(host_label: impl Into<String>, config: MemoryProbeConfig) -> Self {
        Self {
            host_label: host_label.into(),
            system: Mutex::new(System::new()),
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn config(&self) -> Arc<RwLock<MemoryProbeConfig>> {
        Arc::clone(&self.config)
    }

    fn read_config(&self) -> MemoryProbeConfig {
        self.config
            .read()
            .expect("memory probe config lock poisoned")
            .clone()
    }
}

#[async_trait]
impl Probe for MemoryProbe {
    type Payload = MemorySample;

    fn spec(&self) -> ProbeSpec {
        ProbeSpec {
            identity: ResourceId::new(format!("memory:{}", self.host_label)),
            kind: MemorySample::KIND,
            display: format!("{} memory", self.host_label),
        }
    }

    fn interval(&self) -> Duration {
        self.read_config().interval
    }

    async fn sample(&self) -> Result<MemorySample, SampleError> {
        let mut system = self.system.lock().expect("sysinfo lock poisoned");
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(SampleError::new("memory statistics unavailable"));
        }
        let used = system.used_memory();

        Ok(MemorySample {
            total,
            used,
            swap_total: system.total_swap(),
            swap_used: system.used_swap(),
            used_percent: used as f32 / total as f32 * 100.0,
        })
    }

    fn classify(
        &self,
        outcome: &SampleOutcome<MemorySample>,
        _history: &VecDeque<ResultRecord<MemorySample>>,
    ) -> AlertState {
        let config = self.read_config();
        let mut state = AlertState::default();

        match outcome {
            SampleOutcome::Failed(err) => {
                state.escalate(AlertLevel::Unknown, || {
                    format!("memory sampling failed: {err}")
                });
            }
            SampleOutcome::Metrics(sample) => {
                let percent = sample.used_percent;
                let level = if percent >= config.critical_percent {
                    AlertLevel::Critical
                } else if percent >= config.high_percent {
                    AlertLevel::High
                } else if percent >= config.medium_percent {
                    AlertLevel::Medium
                } else {
                    AlertLevel::None
                };
                state.escalate(level, || format!("memory usage at {percent:.1}%"));
            }
        }

        state
    }
}
