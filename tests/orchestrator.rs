// tests/orchestrator.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use newsrelay::config::{FullConfig, InstanceConfig};
use newsrelay::registry::{SinkRegistry, SourceRegistry};
use newsrelay::{
    AppContext, DedupStore, Item, MemoryDedupStore, Orchestrator, PipelineError, RunState, Sink,
    Source,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------- mocks ----------

struct StaticSource {
    name: String,
    items: Vec<Item>,
}

#[async_trait]
impl Source for StaticSource {
    async fn fetch(&self) -> Result<Vec<Item>> {
        Ok(self.items.clone())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

struct FailingSource;

#[async_trait]
impl Source for FailingSource {
    async fn fetch(&self) -> Result<Vec<Item>> {
        Err(anyhow!("connection refused"))
    }
    fn name(&self) -> &str {
        "failing"
    }
}

struct PanickingSource;

#[async_trait]
impl Source for PanickingSource {
    async fn fetch(&self) -> Result<Vec<Item>> {
        panic!("parser blew up")
    }
    fn name(&self) -> &str {
        "panicking"
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Deliver,
    Refuse,
    Error,
    Panic,
}

struct RecordingSink {
    name: String,
    behaviour: Behaviour,
    calls: Mutex<Vec<(Vec<Item>, String)>>,
}

impl RecordingSink {
    fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Vec<Item>, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn notify(&self, items: &[Item], digest: &str) -> Result<bool> {
        self.calls.lock().push((items.to_vec(), digest.to_string()));
        match self.behaviour {
            Behaviour::Deliver => Ok(true),
            Behaviour::Refuse => Ok(false),
            Behaviour::Error => Err(anyhow!("smtp exploded")),
            Behaviour::Panic => panic!("sink bug"),
        }
    }
    fn name(&self) -> &str {
        &self.name
    }
}

struct BrokenStore;

#[async_trait]
impl DedupStore for BrokenStore {
    async fn exists(&self, _title: &str) -> Result<bool> {
        Err(anyhow!("disk gone"))
    }
    async fn insert_batch(&self, _titles: &[String]) -> Result<u64> {
        Err(anyhow!("disk gone"))
    }
}

fn src(name: &str, items: Vec<Item>) -> Arc<dyn Source> {
    Arc::new(StaticSource {
        name: name.to_string(),
        items,
    })
}

fn sink(filter: &[&str], s: &Arc<RecordingSink>) -> (InstanceConfig, Arc<dyn Sink>) {
    (
        InstanceConfig::new("recording").with_sources(filter.iter().copied()),
        Arc::clone(s) as Arc<dyn Sink>,
    )
}

fn memory() -> Arc<dyn DedupStore> {
    Arc::new(MemoryDedupStore::new())
}

// ---------- tests ----------

#[tokio::test]
async fn one_failing_source_of_three_does_not_hurt_the_run() {
    let all = RecordingSink::new("all", Behaviour::Deliver);
    let orch = Orchestrator::new(
        vec![
            src("a", vec![Item::new("a1", "A"), Item::new("a2", "A")]),
            Arc::new(FailingSource),
            src("b", vec![Item::new("b1", "B")]),
        ],
        vec![sink(&[], &all)],
        memory(),
        5,
        "News",
    );

    let report = orch.run().await;
    assert!(report.success);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.new_items, 3);
    assert_eq!(all.calls()[0].0.len(), 3);
}

#[tokio::test]
async fn panicking_source_is_contained() {
    let all = RecordingSink::new("all", Behaviour::Deliver);
    let orch = Orchestrator::new(
        vec![Arc::new(PanickingSource), src("a", vec![Item::new("a1", "A")])],
        vec![sink(&[], &all)],
        memory(),
        2,
        "News",
    );
    let report = orch.run().await;
    assert!(report.success);
    assert_eq!(report.fetched, 1);
}

#[tokio::test]
async fn filtered_sink_sees_only_its_sources() {
    let only_a = RecordingSink::new("only-a", Behaviour::Deliver);
    let all = RecordingSink::new("all", Behaviour::Deliver);
    let orch = Orchestrator::new(
        vec![
            src("a", vec![Item::new("a1", "A").with_url("https://a.test/1")]),
            src("b", vec![Item::new("b1", "B")]),
        ],
        vec![sink(&["A"], &only_a), sink(&[], &all)],
        memory(),
        5,
        "News",
    );

    let report = orch.run().await;
    assert!(report.success);
    assert_eq!(report.dispatched, 2);

    let (items, digest) = &only_a.calls()[0];
    assert_eq!(items, &vec![Item::new("a1", "A").with_url("https://a.test/1")]);
    assert!(digest.contains("### A"));
    assert!(!digest.contains("### B"));
    assert!(digest.contains("1. [a1](https://a.test/1)"));

    let (items, digest) = &all.calls()[0];
    assert_eq!(items.len(), 2);
    assert!(digest.contains("### A") && digest.contains("### B"));
    assert!(digest.starts_with("# News\n\n"));
}

#[tokio::test]
async fn sink_with_no_matches_is_not_invoked() {
    let only_c = RecordingSink::new("only-c", Behaviour::Deliver);
    let orch = Orchestrator::new(
        vec![src("a", vec![Item::new("a1", "A")])],
        vec![sink(&["C"], &only_c)],
        memory(),
        5,
        "News",
    );
    let report = orch.run().await;
    assert!(report.success);
    assert_eq!(report.dispatched, 0);
    assert!(only_c.calls().is_empty());
}

#[tokio::test]
async fn failing_sinks_do_not_stop_the_others() {
    let refuse = RecordingSink::new("refuse", Behaviour::Refuse);
    let error = RecordingSink::new("error", Behaviour::Error);
    let panic = RecordingSink::new("panic", Behaviour::Panic);
    let ok = RecordingSink::new("ok", Behaviour::Deliver);
    let orch = Orchestrator::new(
        vec![src("a", vec![Item::new("a1", "A")])],
        vec![
            sink(&[], &refuse),
            sink(&[], &error),
            sink(&[], &panic),
            sink(&[], &ok),
        ],
        memory(),
        2,
        "News",
    );

    let report = orch.run().await;
    assert!(!report.success);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.dispatched, 4);
    let mut failed = report.failed_sinks.clone();
    failed.sort();
    assert_eq!(failed, vec!["error", "panic", "refuse"]);
    assert_eq!(ok.calls().len(), 1);
}

#[tokio::test]
async fn duplicates_across_runs_and_within_a_batch() {
    let store = memory();
    let all = RecordingSink::new("all", Behaviour::Deliver);

    let first = Orchestrator::new(
        vec![src(
            "a",
            vec![
                Item::new("same", "A").with_url("https://a.test/first"),
                Item::new("same", "A").with_url("https://a.test/second"),
                Item::new("   ", "A"),
                Item::new("other", "A"),
            ],
        )],
        vec![sink(&[], &all)],
        Arc::clone(&store),
        5,
        "News",
    );
    let report = first.run().await;
    assert_eq!(report.fetched, 4);
    assert_eq!(report.new_items, 2);
    let (items, _) = &all.calls()[0];
    assert_eq!(items[0].url.as_deref(), Some("https://a.test/first"));

    let second = Orchestrator::new(
        vec![src("a", vec![Item::new("same", "B"), Item::new("fresh", "A")])],
        vec![sink(&[], &all)],
        store,
        5,
        "News",
    );
    let report = second.run().await;
    assert_eq!(report.new_items, 1);
    let calls = all.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, vec![Item::new("fresh", "A")]);
}

#[tokio::test]
async fn nothing_new_means_no_dispatch() {
    let all = RecordingSink::new("all", Behaviour::Refuse);
    let orch = Orchestrator::new(
        vec![src("empty", Vec::new())],
        vec![sink(&[], &all)],
        memory(),
        5,
        "News",
    );
    let report = orch.run().await;
    assert!(report.success);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.dispatched, 0);
    assert!(all.calls().is_empty());
}

#[tokio::test]
async fn store_failure_fails_the_run() {
    let all = RecordingSink::new("all", Behaviour::Deliver);
    let orch = Orchestrator::new(
        vec![src("a", vec![Item::new("a1", "A")])],
        vec![sink(&[], &all)],
        Arc::new(BrokenStore),
        5,
        "News",
    );
    let report = orch.run().await;
    assert!(!report.success);
    assert_eq!(report.state, RunState::Failed);
    assert!(all.calls().is_empty());

    let err = orch.dedup(vec![Item::new("a1", "A")]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));
}

#[tokio::test]
async fn pool_bounds_concurrent_fetches() {
    struct Slow {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Source for Slow {
        async fn fetch(&self) -> Result<Vec<Item>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let sources: Vec<Arc<dyn Source>> = (0..6)
        .map(|_| {
            Arc::new(Slow {
                active: Arc::clone(&active),
                peak: Arc::clone(&peak),
            }) as Arc<dyn Source>
        })
        .collect();
    let orch = Orchestrator::new(sources, Vec::new(), memory(), 2, "News");
    orch.fetch().await;
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn context_builds_adapters_and_rejects_empty_registries() {
    let mut config = FullConfig::default();
    config.spiders = vec![
        InstanceConfig::new("rss").with_field("url", "https://feed.test/rss"),
        InstanceConfig::new("nope"),
    ];
    config.notifiers = vec![
        InstanceConfig::new("webhook").with_field("url", "https://hook.test"),
        InstanceConfig::new("dingtalk"),
    ];

    let ctx = AppContext::with_store(config.clone(), memory());
    let orch = Orchestrator::from_context(&ctx).unwrap();
    assert_eq!(orch.source_count(), 1);
    // dingtalk without webhook/secret is skipped
    assert_eq!(orch.sink_count(), 1);

    let empty = AppContext {
        config,
        store: memory(),
        sources: SourceRegistry::new("source"),
        sinks: SinkRegistry::with_builtin(),
    };
    match Orchestrator::from_context(&empty) {
        Err(PipelineError::EmptyRegistry { kind }) => assert_eq!(kind, "source"),
        _ => panic!("expected an empty registry error"),
    }
}
