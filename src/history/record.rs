//! Sample records and the per-kind payload contract.
//!
//! A [`ResultRecord`] is one measurement of one resource: when it was taken,
//! how long it took, what alert level it classified to, and either the
//! kind-specific metric payload or an error string — never both. The
//! [`SampleOutcome`] enum makes that mutual exclusion a type-level fact.
//!
//! ## Wire layout
//!
//! ```text
//! varint  version tag (payload schema version)
//! i64     timestamp, UTC milliseconds
//! i64     sample latency, milliseconds (DURATION_NA = not applicable)
//! u8      alert level ordinal
//! u8      error flag
//!         1 → varint-length UTF-8 error string, nothing after it
//!         0 → payload fields in the payload's fixed schema order
//! ```
//!
//! A reader that sees a version tag newer than it understands must fail
//! with [`DecodeError::UnsupportedVersion`] rather than guess at the
//! payload layout.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::AlertLevel;

use super::codec::{self, WireReader};
use super::error::DecodeError;

/// Metric payload of one resource kind.
///
/// Implementations own their wire schema: `encode` writes the fields in a
/// fixed order, `decode` dispatches on the version tag that was current
/// when the record was written. `Serialize` provides the JSON rendering
/// carried by "new sample" notifications for live charting.
pub trait MetricPayload: Clone + Send + Sync + Serialize + 'static {
    /// Stable kind name, used for log identification and events.
    const KIND: &'static str;

    /// Current schema version. Bump when fields change; `decode` keeps
    /// accepting every version it ever wrote.
    const VERSION: u32;

    fn encode(&self, buf: &mut Vec<u8>);

    fn decode(version: u32, reader: &mut WireReader<'_>) -> Result<Self, DecodeError>;
}

/// What a sampling attempt produced: metrics, or an explanation of why not.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome<P> {
    Metrics(P),
    Failed(String),
}

impl<P> SampleOutcome<P> {
    pub fn metrics(&self) -> Option<&P> {
        match self {
            SampleOutcome::Metrics(payload) => Some(payload),
            SampleOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SampleOutcome::Metrics(_) => None,
            SampleOutcome::Failed(message) => Some(message),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SampleOutcome::Failed(_))
    }
}

/// One immutable sample of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord<P> {
    /// When the sample was taken (millisecond precision — the wire format
    /// carries milliseconds, so finer precision would not survive a reload).
    pub timestamp: DateTime<Utc>,

    /// How long the sample took, or [`codec::DURATION_NA`].
    pub latency_ms: i64,

    /// Alert level this sample classified to.
    pub level: AlertLevel,

    /// Metric payload or error string.
    pub outcome: SampleOutcome<P>,
}

impl<P: MetricPayload> ResultRecord<P> {
    /// Build a record, truncating the timestamp to wire precision.
    pub fn new(
        timestamp: DateTime<Utc>,
        latency_ms: i64,
        level: AlertLevel,
        outcome: SampleOutcome<P>,
    ) -> Self {
        let truncated =
            DateTime::<Utc>::from_timestamp_millis(timestamp.timestamp_millis()).unwrap_or(timestamp);
        Self {
            timestamp: truncated,
            latency_ms,
            level,
            outcome,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_varint(buf, P::VERSION);
        codec::put_i64(buf, self.timestamp.timestamp_millis());
        codec::put_i64(buf, self.latency_ms);
        codec::put_u8(buf, self.level.ordinal());

        match &self.outcome {
            SampleOutcome::Failed(message) => {
                codec::put_u8(buf, 1);
                codec::put_string(buf, message);
            }
            SampleOutcome::Metrics(payload) => {
                codec::put_u8(buf, 0);
                payload.encode(buf);
            }
        }
    }

    /// Decode one record from a frame. The frame must contain exactly one
    /// record; leftover bytes are treated as corruption.
    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let version = reader.read_varint()?;
        if version == 0 || version > P::VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let millis = reader.read_i64()?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(DecodeError::InvalidTimestamp(millis))?;
        let latency_ms = reader.read_i64()?;
        let level_ordinal = reader.read_u8()?;
        let level =
            AlertLevel::from_ordinal(level_ordinal).ok_or(DecodeError::InvalidLevel(level_ordinal))?;

        let outcome = if reader.read_u8()? == 1 {
            SampleOutcome::Failed(reader.read_string()?)
        } else {
            SampleOutcome::Metrics(P::decode(version, reader)?)
        };

        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            timestamp,
            latency_ms,
            level,
            outcome,
        })
    }
}
