// src/context.rs
//! Process-wide state, built once at startup and handed to the orchestrator.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::FullConfig;
use crate::dedup::{DedupStore, SqliteDedupStore};
use crate::registry::{SinkRegistry, SourceRegistry};

pub struct AppContext {
    pub config: FullConfig,
    pub store: Arc<dyn DedupStore>,
    pub sources: SourceRegistry,
    pub sinks: SinkRegistry,
}

impl AppContext {
    /// Open the SQLite store at `config.store.path` and register the
    /// built-in adapters.
    pub async fn init(config: FullConfig) -> Result<Self> {
        let store = SqliteDedupStore::open(&config.store.path)
            .await
            .with_context(|| format!("opening dedup store {}", config.store.path.display()))?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Built-in registries around an already opened store.
    pub fn with_store(config: FullConfig, store: Arc<dyn DedupStore>) -> Self {
        Self {
            config,
            store,
            sources: SourceRegistry::with_builtin(),
            sinks: SinkRegistry::with_builtin(),
        }
    }
}
