//! Run-level errors.
//!
//! Everything an individual adapter does wrong is contained inside the
//! orchestrator and only shows up as `success = false`. The variants here are
//! the few conditions that make a run meaningless.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// No adapter type was registered at all, so nothing can be instantiated.
    #[error("{kind} registry is empty")]
    EmptyRegistry { kind: &'static str },

    /// The seen-item store could not be read or written.
    #[error("dedup store unavailable: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn store(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}
