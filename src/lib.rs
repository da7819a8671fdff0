// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod context;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod telemetry;
pub mod types;

// ---- Re-exports for a stable public API ----
pub use crate::config::{FullConfig, InstanceConfig};
pub use crate::context::AppContext;
pub use crate::dedup::{fingerprint, DedupStore, MemoryDedupStore, SqliteDedupStore};
pub use crate::error::PipelineError;
pub use crate::ingest::Source;
pub use crate::notify::Sink;
pub use crate::orchestrator::{Orchestrator, RunReport, RunState};
pub use crate::registry::{SinkRegistry, SourceRegistry};
pub use crate::types::Item;
