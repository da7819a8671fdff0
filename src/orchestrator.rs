// src/orchestrator.rs
//! The fetch → dedup → render → route → dispatch pipeline.
//!
//! Every adapter call runs as its own tokio task holding one permit of a
//! shared semaphore, so at most `max_workers` adapters are in flight in
//! either phase. Adapter failures (errors, `false`, panics) are logged and
//! counted; only the dedup store can fail a run.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::InstanceConfig;
use crate::context::AppContext;
use crate::dedup::DedupStore;
use crate::digest;
use crate::error::PipelineError;
use crate::ingest::Source;
use crate::notify::Sink;
use crate::telemetry::describe_metrics;
use crate::types::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Deduping,
    Rendering,
    Routing,
    Dispatching,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Deduping => "deduping",
            RunState::Rendering => "rendering",
            RunState::Routing => "routing",
            RunState::Dispatching => "dispatching",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub state: RunState,
    /// Items returned by all successful sources.
    pub fetched: usize,
    /// Items left after dedup.
    pub new_items: usize,
    /// Sinks actually invoked.
    pub dispatched: usize,
    pub failed_sinks: Vec<String>,
    pub success: bool,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            fetched: 0,
            new_items: 0,
            dispatched: 0,
            failed_sinks: Vec::new(),
            success: false,
        }
    }
}

/// What one sink gets in a run.
#[derive(Debug, Clone)]
pub struct Route {
    pub sink: usize,
    pub items: Vec<Item>,
    pub digest: String,
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub dispatched: usize,
    pub failed: Vec<String>,
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Orchestrator {
    sources: Vec<Arc<dyn Source>>,
    sinks: Vec<(InstanceConfig, Arc<dyn Sink>)>,
    store: Arc<dyn DedupStore>,
    pool: Arc<Semaphore>,
    digest_title: String,
    state: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        sinks: Vec<(InstanceConfig, Arc<dyn Sink>)>,
        store: Arc<dyn DedupStore>,
        max_workers: usize,
        digest_title: impl Into<String>,
    ) -> Self {
        Self {
            sources,
            sinks,
            store,
            pool: Arc::new(Semaphore::new(max_workers.max(1))),
            digest_title: digest_title.into(),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Instantiate every configured source and sink through the context's
    /// registries. Fails only when a registry has no registrations at all.
    pub fn from_context(ctx: &AppContext) -> Result<Self, PipelineError> {
        if ctx.sources.is_empty() {
            return Err(PipelineError::EmptyRegistry { kind: ctx.sources.kind() });
        }
        if ctx.sinks.is_empty() {
            return Err(PipelineError::EmptyRegistry { kind: ctx.sinks.kind() });
        }
        let title = ctx.config.digest.title.as_str();
        let sources = ctx
            .sources
            .instantiate(&ctx.config.spiders, title)
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        let sinks = ctx.sinks.instantiate(&ctx.config.notifiers, title);
        Ok(Self::new(
            sources,
            sinks,
            Arc::clone(&ctx.store),
            ctx.config.max_workers(),
            title,
        ))
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    fn enter(&self, next: RunState) {
        let mut state = self.state.lock();
        let prev = *state;
        tracing::debug!(from = %prev, to = %next, "run state");
        *state = next;
    }

    /// One full pass. Never panics and never returns an adapter error; the
    /// report carries the outcome.
    pub async fn run(&self) -> RunReport {
        describe_metrics();
        counter!("relay_runs_total").increment(1);

        let mut report = RunReport::new();
        if let Err(e) = self.run_phases(&mut report).await {
            tracing::error!(error = %e, "run failed");
            self.enter(RunState::Failed);
            report.success = false;
        }
        report.state = self.state();
        gauge!("relay_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        tracing::info!(
            state = %report.state,
            fetched = report.fetched,
            new_items = report.new_items,
            dispatched = report.dispatched,
            failed_sinks = report.failed_sinks.len(),
            success = report.success,
            "run finished"
        );
        report
    }

    async fn run_phases(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        self.enter(RunState::Fetching);
        let fetched = self.fetch().await;
        report.fetched = fetched.len();

        self.enter(RunState::Deduping);
        let fresh = self.dedup(fetched).await?;
        report.new_items = fresh.len();
        if fresh.is_empty() {
            tracing::info!("no new items, nothing to dispatch");
            self.enter(RunState::Done);
            report.success = true;
            return Ok(());
        }

        self.enter(RunState::Rendering);
        let digest = self.render(&fresh);

        self.enter(RunState::Routing);
        let routes = self.route(&fresh, &digest);

        self.enter(RunState::Dispatching);
        let outcome = self.notify(routes).await;
        report.dispatched = outcome.dispatched;
        report.success = outcome.success();
        report.failed_sinks = outcome.failed;

        self.enter(RunState::Done);
        Ok(())
    }

    /// Fetch from every source concurrently. Failing or panicking sources
    /// are logged and contribute nothing.
    pub async fn fetch(&self) -> Vec<Item> {
        let mut handles: Vec<(String, JoinHandle<anyhow::Result<Vec<Item>>>)> =
            Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let source = Arc::clone(source);
            let pool = Arc::clone(&self.pool);
            let name = source.name().to_string();
            handles.push((
                name,
                tokio::spawn(async move {
                    let _permit = pool.acquire_owned().await?;
                    source.fetch().await
                }),
            ));
        }

        let mut items = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(batch)) => {
                    tracing::info!(source = %name, count = batch.len(), "source fetched");
                    counter!("relay_items_fetched_total").increment(batch.len() as u64);
                    items.extend(batch);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        source = %name,
                        error = %format!("{e:#}"),
                        "source fetch failed"
                    );
                    counter!("relay_source_errors_total").increment(1);
                }
                Err(e) => {
                    tracing::error!(source = %name, error = %e, "source task aborted");
                    counter!("relay_source_errors_total").increment(1);
                }
            }
        }
        items
    }

    /// Drop malformed and already-seen items, then record the survivors in
    /// the store as one batch. Within the batch the first occurrence of a
    /// title wins.
    pub async fn dedup(&self, items: Vec<Item>) -> Result<Vec<Item>, PipelineError> {
        let mut batch_titles: HashSet<String> = HashSet::with_capacity(items.len());
        let mut fresh = Vec::with_capacity(items.len());
        let (mut malformed, mut duplicate) = (0u64, 0u64);

        for item in items {
            if !item.has_title() {
                tracing::warn!(
                    source = %item.source,
                    url = ?item.url,
                    "item without title dropped"
                );
                malformed += 1;
                continue;
            }
            if batch_titles.contains(&item.title) {
                duplicate += 1;
                continue;
            }
            if self.store.exists(&item.title).await.map_err(PipelineError::store)? {
                batch_titles.insert(item.title.clone());
                duplicate += 1;
                continue;
            }
            batch_titles.insert(item.title.clone());
            fresh.push(item);
        }

        let titles: Vec<String> = fresh.iter().map(|i| i.title.clone()).collect();
        let inserted = self
            .store
            .insert_batch(&titles)
            .await
            .map_err(PipelineError::store)?;

        counter!("relay_items_new_total").increment(fresh.len() as u64);
        counter!("relay_items_duplicate_total").increment(duplicate);
        counter!("relay_items_malformed_total").increment(malformed);
        tracing::info!(new = fresh.len(), inserted, duplicate, malformed, "dedup done");
        Ok(fresh)
    }

    pub fn render(&self, items: &[Item]) -> String {
        digest::render(items, &self.digest_title)
    }

    /// Work out what each sink receives. Sinks whose filter matches nothing
    /// get no route. A filtered subset gets its own digest.
    pub fn route(&self, items: &[Item], digest: &str) -> Vec<Route> {
        let mut routes = Vec::with_capacity(self.sinks.len());
        for (idx, (cfg, sink)) in self.sinks.iter().enumerate() {
            let subset: Vec<Item> = items
                .iter()
                .filter(|i| cfg.accepts(&i.source))
                .cloned()
                .collect();
            if subset.is_empty() {
                tracing::info!(
                    sink = %sink.name(),
                    filter = ?cfg.sources,
                    "no matching items, sink skipped"
                );
                continue;
            }
            let digest = if subset.len() == items.len() {
                digest.to_string()
            } else {
                self.render(&subset)
            };
            routes.push(Route {
                sink: idx,
                items: subset,
                digest,
            });
        }
        routes
    }

    /// Dispatch every route concurrently. A sink fails when it returns
    /// `false`, errors or panics; the others still run.
    pub async fn notify(&self, routes: Vec<Route>) -> DispatchOutcome {
        let mut handles: Vec<(String, JoinHandle<anyhow::Result<bool>>)> =
            Vec::with_capacity(routes.len());
        for route in routes {
            let Some((_, sink)) = self.sinks.get(route.sink) else {
                continue;
            };
            let sink = Arc::clone(sink);
            let pool = Arc::clone(&self.pool);
            let name = sink.name().to_string();
            handles.push((
                name,
                tokio::spawn(async move {
                    let _permit = pool.acquire_owned().await?;
                    sink.notify(&route.items, &route.digest).await
                }),
            ));
        }

        let mut outcome = DispatchOutcome {
            dispatched: handles.len(),
            failed: Vec::new(),
        };
        for (name, handle) in handles {
            let ok = match handle.await {
                Ok(Ok(true)) => true,
                Ok(Ok(false)) => {
                    tracing::warn!(sink = %name, "sink reported delivery failure");
                    false
                }
                Ok(Err(e)) => {
                    tracing::error!(sink = %name, error = %format!("{e:#}"), "sink errored");
                    false
                }
                Err(e) => {
                    tracing::error!(sink = %name, error = %e, "sink task aborted");
                    false
                }
            };
            if !ok {
                counter!("relay_sink_failures_total").increment(1);
                outcome.failed.push(name);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryDedupStore;

    struct Null;

    #[async_trait::async_trait]
    impl Sink for Null {
        async fn notify(&self, _items: &[Item], _digest: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn name(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn route_rerenders_only_for_subsets() {
        let sinks: Vec<(InstanceConfig, Arc<dyn Sink>)> = vec![
            (InstanceConfig::new("null"), Arc::new(Null)),
            (InstanceConfig::new("null").with_sources(["A"]), Arc::new(Null)),
            (InstanceConfig::new("null").with_sources(["C"]), Arc::new(Null)),
        ];
        let orch = Orchestrator::new(Vec::new(), sinks, Arc::new(MemoryDedupStore::new()), 2, "T");
        let items = vec![Item::new("a", "A"), Item::new("b", "B")];
        let digest = orch.render(&items);
        let routes = orch.route(&items, &digest);

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].sink, 0);
        assert_eq!(routes[0].digest, digest);
        assert_eq!(routes[1].sink, 1);
        assert_eq!(routes[1].items, vec![Item::new("a", "A")]);
        assert!(!routes[1].digest.contains("### B"));
    }

    #[test]
    fn new_orchestrator_is_idle() {
        let store = Arc::new(MemoryDedupStore::new());
        let orch = Orchestrator::new(Vec::new(), Vec::new(), store, 0, "T");
        assert_eq!(orch.state(), RunState::Idle);
        assert_eq!(orch.pool.available_permits(), 1);
    }
}
