// src/config/mod.rs
//! Configuration: a base file (TOML or JSON) with the environment overlay on top.

pub mod env;

use anyhow::{anyhow, Context, Result};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use self::env::{apply_overlay, normalize_sections, EnvBinding, ENV_BINDINGS};

pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/newsrelay.toml";

pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_STORE_PATH: &str = "data/article_hashes.db";
pub const DEFAULT_DIGEST_TITLE: &str = "News Digest";

/// One concrete source or sink instance.
///
/// The core only reads `type` and (for sinks) `sources`. Everything else is
/// passed through to the adapter, which decodes it into its own typed config
/// with [`InstanceConfig::decode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Source tags a sink accepts; empty means everything.
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sources: Vec<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

pub type SourceInstanceConfig = InstanceConfig;
pub type SinkInstanceConfig = InstanceConfig;

impl InstanceConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Label used in logs: explicit `name`/`id`, else `<type>#<index>`.
    pub fn display_name(&self, index: usize) -> String {
        self.str_field("name")
            .or_else(|| self.str_field("id"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}#{}", self.kind, index))
    }

    /// Decode the adapter-specific fields into a typed config.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .with_context(|| format!("invalid `{}` config", self.kind))
    }

    /// Whether an item tagged `source` should reach this sink.
    pub fn accepts(&self, source: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source)
    }
}

fn string_or_list<'de, D>(de: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub title: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_DIGEST_TITLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Absent: run once and exit.
    pub interval_secs: Option<u64>,
}

/// Fully resolved configuration for one process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FullConfig {
    pub spiders: Vec<SourceInstanceConfig>,
    pub notifiers: Vec<SinkInstanceConfig>,
    pub pool: PoolConfig,
    pub logger: LoggerConfig,
    pub store: StoreConfig,
    pub digest: DigestConfig,
    pub schedule: ScheduleConfig,
}

impl FullConfig {
    /// Worker pool size, never below one.
    pub fn max_workers(&self) -> usize {
        self.pool.max_workers.max(1)
    }
}

/// Load a base config file. Supports TOML or JSON, picked by extension.
pub fn load_base_from(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_base(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))
}

fn parse_base(s: &str, hint_ext: &str) -> Result<Value> {
    let value = match hint_ext {
        "toml" => toml::from_str::<Value>(s)?,
        "json" => serde_json::from_str::<Value>(s)?,
        _ => match toml::from_str::<Value>(s) {
            Ok(v) => v,
            Err(_) => serde_json::from_str::<Value>(s)
                .map_err(|_| anyhow!("unsupported config format"))?,
        },
    };
    if !value.is_object() {
        return Err(anyhow!("config root must be a table/object"));
    }
    Ok(value)
}

/// Load the base config using `$CONFIG_PATH`, then `config/newsrelay.toml`.
/// A missing file is not an error; the config is then built from the
/// environment alone.
pub fn load_base_default() -> Result<Value> {
    let path = std::env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    if !path.exists() {
        tracing::info!(path = %path.display(), "config file not found, using environment only");
        return Ok(Value::Object(Map::new()));
    }
    load_base_from(&path)
}

/// Base config plus the environment overlay.
pub struct ConfigOverlay {
    base: Value,
    bindings: &'static [EnvBinding],
}

impl ConfigOverlay {
    pub fn new(base: Value) -> Self {
        Self {
            base,
            bindings: ENV_BINDINGS,
        }
    }

    pub fn with_bindings(mut self, bindings: &'static [EnvBinding]) -> Self {
        self.bindings = bindings;
        self
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<FullConfig> {
        self.resolve_with(|var| std::env::var(var).ok())
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<FullConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tree = self.base.clone();
        normalize_sections(&mut tree);
        apply_overlay(&mut tree, self.bindings, lookup);

        let mut root = match tree {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        Ok(FullConfig {
            spiders: instances(&mut root, "spiders"),
            notifiers: instances(&mut root, "notifiers"),
            pool: section(&mut root, "pool"),
            logger: section(&mut root, "logger"),
            store: section(&mut root, "store"),
            digest: section(&mut root, "digest"),
            schedule: section(&mut root, "schedule"),
        })
    }
}

/// Decode every entry of an instance list on its own; entries without a
/// string `type` (or otherwise malformed) are logged and dropped.
fn instances(root: &mut Map<String, Value>, key: &str) -> Vec<InstanceConfig> {
    let entries = match root.remove(key) {
        Some(Value::Array(list)) => list,
        None | Some(Value::Null) => return Vec::new(),
        Some(other) => {
            tracing::warn!(
                section = key,
                value = %other,
                "instance section is not a list, ignored"
            );
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| match serde_json::from_value::<InstanceConfig>(entry) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::warn!(section = key, index = idx, error = %e, "invalid instance, skipped");
                None
            }
        })
        .collect()
}

/// Decode one settings table, falling back to its defaults when it is
/// missing or malformed.
fn section<T: DeserializeOwned + Default>(root: &mut Map<String, Value>, key: &str) -> T {
    match root.remove(key) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(section = key, error = %e, "invalid settings, using defaults");
            T::default()
        }),
    }
}

/// Default resolution: base file (if any) overlaid with the process environment.
pub fn resolve() -> Result<FullConfig> {
    ConfigOverlay::new(load_base_default()?).resolve()
}
