//! The sampling engine: one tokio task per monitored resource.
//!
//! [`WorkerRegistry`] deduplicates workers by resource identity and starts
//! them on demand; [`worker`] runs the periodic sample→classify→record
//! cycle; [`messages`] carries commands and type-erased sample events
//! across the boundary.

pub mod messages;
pub mod registry;
pub mod worker;

pub use messages::{SampleEvent, WorkerCommand};
pub use registry::{RegistryConfig, WorkerRegistry};
pub use worker::WorkerHandle;
