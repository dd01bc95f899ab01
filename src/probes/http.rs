//! HTTP endpoint probe.
//!
//! One request per cycle; the sample records status, latency, and whether
//! the body matched the configured pattern. Classification distinguishes a
//! slow-but-alive endpoint (latency thresholds) from a wrong one (status,
//! body) from an unreachable one, and escalates repeated unreachability to
//! critical once the failure grace is used up.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::trace;

use crate::ResourceId;
use crate::alert::{AlertLevel, AlertState};
use crate::history::{DecodeError, MetricPayload, ResultRecord, SampleOutcome, WireReader, codec};

use super::{Probe, ProbeSpec, SampleError, trailing_failures};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// One HTTP measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpSample {
    pub status: u16,
    pub response_ms: i64,
    pub body_matched: bool,
}

impl MetricPayload for HttpSample {
    const KIND: &'static str = "http";
    const VERSION: u32 = 1;

    fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_u16(buf, self.status);
        codec::put_i64(buf, self.response_ms);
        codec::put_u8(buf, self.body_matched as u8);
    }

    fn decode(_version: u32, reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            status: reader.read_u16()?,
            response_ms: reader.read_i64()?,
            body_matched: reader.read_u8()? != 0,
        })
    }
}

/// Mutable thresholds; picked up on the next cycle without a restart.
#[derive(Debug, Clone)]
pub struct HttpProbeConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
    /// Latency above this is a low alert.
    pub degraded_ms: i64,
    /// Latency above this is a high alert.
    pub critical_ms: i64,
    /// Acceptable status codes; `None` accepts any 2xx.
    pub expected_status: Option<Vec<u16>>,
    /// When set, the response body must match.
    pub body_pattern: Option<Regex>,
    /// Consecutive failures tolerated at medium before escalating to
    /// critical.
    pub failure_grace: usize,
}

impl Default for HttpProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            degraded_ms: 1_000,
            critical_ms: 5_000,
            expected_status: None,
            body_pattern: None,
            failure_grace: 3,
        }
    }
}

pub struct HttpProbe {
    name: String,
    url: String,
    method: HttpMethod,
    client: reqwest::Client,
    config: Arc<RwLock<HttpProbeConfig>>,
}

impl HttpProbe {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        method: HttpMethod,
        config: HttpProbeConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build http client");

        Self {
            name: name.into(),
            url: url.into(),
            method,
            client,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Shared handle to the live configuration.
    pub fn config(&self) -> Arc<RwLock<HttpProbeConfig>> {
        Arc::clone(&self.config)
    }

    fn read_config(&self) -> HttpProbeConfig {
        self.config
            .read()
            .expect("http probe config lock poisoned")
            .clone()
    }

    fn status_is_expected(config: &HttpProbeConfig, status: u16) -> bool {
        match &config.expected_status {
            Some(accepted) => accepted.contains(&status),
            None => (200..300).contains(&status),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    type Payload = HttpSample;

    fn spec(&self) -> ProbeSpec {
        // the method is part of what is being monitored: HEAD and GET on
        // one URL are distinct resources with distinct workers
        ProbeSpec {
            identity: ResourceId::new(format!("http:{}:{}", self.method.as_str(), self.url)),
            kind: HttpSample::KIND,
            display: self.name.clone(),
        }
    }

    fn interval(&self) -> Duration {
        self.read_config().interval
    }

    async fn sample(&self) -> Result<HttpSample, SampleError> {
        let pattern = {
            self.config
                .read()
                .expect("http probe config lock poisoned")
                .body_pattern
                .clone()
        };

        let request = match self.method {
            HttpMethod::Get => self.client.get(&self.url),
            HttpMethod::Post => self.client.post(&self.url),
            HttpMethod::Head => self.client.head(&self.url),
        };

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|err| SampleError::new(format!("request failed: {err}")))?;
        let status = response.status().as_u16();

        let body_matched = match &pattern {
            Some(pattern) => {
                let body = response
                    .text()
                    .await
                    .map_err(|err| SampleError::new(format!("failed to read body: {err}")))?;
                pattern.is_match(&body)
            }
            None => true,
        };
        let response_ms = started.elapsed().as_millis().min(i64::MAX as u128) as i64;

        trace!("{} responded {status} in {response_ms}ms", self.url);

        Ok(HttpSample {
            status,
            response_ms,
            body_matched,
        })
    }

    fn classify(
        &self,
        outcome: &SampleOutcome<HttpSample>,
        history: &VecDeque<ResultRecord<HttpSample>>,
    ) -> AlertState {
        let config = self.read_config();
        let mut state = AlertState::default();

        match outcome {
            SampleOutcome::Failed(err) => {
                let failures = trailing_failures(history) + 1;
                if failures >= config.failure_grace {
                    state.escalate(AlertLevel::Critical, || {
                        format!("unreachable ({failures} consecutive failures): {err}")
                    });
                } else {
                    state.escalate(AlertLevel::Medium, || format!("sample failed: {err}"));
                }
            }

            SampleOutcome::Metrics(sample) => {
                if !Self::status_is_expected(&config, sample.status) {
                    state.escalate(AlertLevel::High, || {
                        format!("unexpected status {}", sample.status)
                    });
                }
                if !sample.body_matched {
                    state.escalate(AlertLevel::Medium, || {
                        "response body did not match expected pattern".to_string()
                    });
                }
                if sample.response_ms > config.critical_ms {
                    state.escalate(AlertLevel::High, || {
                        format!("slow response: {}ms", sample.response_ms)
                    });
                } else if sample.response_ms > config.degraded_ms {
                    state.escalate(AlertLevel::Low, || {
                        format!("degraded response time: {}ms", sample.response_ms)
                    });
                }
            }
        }

        state
    }
}
