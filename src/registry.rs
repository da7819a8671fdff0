// src/registry.rs
//! Explicit adapter registration: type identifier → factory.
//!
//! Registries are filled once at startup (`with_builtin`) and then only read.
//! A config entry whose `type` is not registered is logged and skipped.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::InstanceConfig;
use crate::ingest::{providers::rss::RssSource, Source};
use crate::notify::{
    bark::BarkSink, dingtalk::DingTalkSink, email::EmailSink, webhook::WebhookSink, Sink,
};

/// Everything a factory gets to build one instance.
#[derive(Debug, Clone, Copy)]
pub struct AdapterSpec<'a> {
    pub config: &'a InstanceConfig,
    /// Log label, see [`InstanceConfig::display_name`].
    pub name: &'a str,
    /// Heading used in message titles/subjects.
    pub digest_title: &'a str,
}

pub type Factory<T> = Box<dyn Fn(&AdapterSpec<'_>) -> Result<Arc<T>> + Send + Sync>;

pub struct Registry<T: ?Sized> {
    kind: &'static str,
    factories: BTreeMap<String, Factory<T>>,
}

pub type SourceRegistry = Registry<dyn Source>;
pub type SinkRegistry = Registry<dyn Sink>;

impl<T: ?Sized> Registry<T> {
    /// `kind` names the registry in logs and errors ("source", "sink").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) the factory for `type_id`.
    pub fn register<F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&AdapterSpec<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let type_id = type_id.into();
        if self.factories.insert(type_id.clone(), Box::new(factory)).is_some() {
            tracing::warn!(registry = self.kind, type_id = %type_id, "factory replaced");
        }
        self
    }

    pub fn lookup(&self, type_id: &str) -> Option<&Factory<T>> {
        self.factories.get(type_id)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build every instance in `configs`. Unknown types and factory errors
    /// are logged and the instance is skipped.
    pub fn instantiate(
        &self,
        configs: &[InstanceConfig],
        digest_title: &str,
    ) -> Vec<(InstanceConfig, Arc<T>)> {
        let mut out = Vec::with_capacity(configs.len());
        for (idx, cfg) in configs.iter().enumerate() {
            let name = cfg.display_name(idx);
            let Some(factory) = self.lookup(&cfg.kind) else {
                tracing::warn!(
                    registry = self.kind,
                    instance = %name,
                    type_id = %cfg.kind,
                    "unregistered type, skipped"
                );
                continue;
            };
            let spec = AdapterSpec {
                config: cfg,
                name: &name,
                digest_title,
            };
            match factory(&spec) {
                Ok(adapter) => out.push((cfg.clone(), adapter)),
                Err(e) => {
                    tracing::warn!(
                        registry = self.kind,
                        instance = %name,
                        error = %format!("{e:#}"),
                        "construction failed, skipped"
                    );
                }
            }
        }
        tracing::info!(
            registry = self.kind,
            built = out.len(),
            configured = configs.len(),
            "adapters instantiated"
        );
        out
    }
}

impl SourceRegistry {
    /// Registry with every built-in source adapter.
    pub fn with_builtin() -> Self {
        let mut r = Self::new("source");
        r.register("rss", |spec| {
            Ok(Arc::new(RssSource::from_config(spec.config, spec.name)?) as Arc<dyn Source>)
        });
        r
    }
}

impl SinkRegistry {
    /// Registry with every built-in sink adapter.
    pub fn with_builtin() -> Self {
        let mut r = Self::new("sink");
        r.register("dingtalk", |spec| {
            Ok(Arc::new(DingTalkSink::from_spec(spec)?) as Arc<dyn Sink>)
        })
        .register("bark", |spec| {
            Ok(Arc::new(BarkSink::from_spec(spec)?) as Arc<dyn Sink>)
        })
        .register("email", |spec| {
            Ok(Arc::new(EmailSink::from_spec(spec)?) as Arc<dyn Sink>)
        })
        .register("webhook", |spec| {
            Ok(Arc::new(WebhookSink::from_spec(spec)?) as Arc<dyn Sink>)
        });
        r
    }
}
