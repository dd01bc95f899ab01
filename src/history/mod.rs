//! Durable, bounded sample history.
//!
//! Layering, leaves first: [`codec`] defines the wire primitives,
//! [`record`] the versioned record format and per-kind payload contract,
//! [`log`] the append-only length-prefixed file, and [`store`] the bounded
//! in-memory history that keeps the log in sync.

pub mod codec;
pub mod error;
pub mod log;
pub mod record;
pub mod store;

pub use codec::{DURATION_NA, WireReader};
pub use error::{DecodeError, PersistenceError, PersistenceResult};
pub use record::{MetricPayload, ResultRecord, SampleOutcome};
pub use store::{DEFAULT_HISTORY_CAPACITY, HistoryStore};
