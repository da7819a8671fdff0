// src/config/env.rs
//! Environment overlay: maps a fixed table of variables onto the config tree.
//!
//! A variable bound to `notifiers.<type>.<field>` may carry several
//! comma-separated values; value `i` lands on the `i`-th instance of `<type>`
//! (declaration order), and missing instances are appended as bare
//! `{ type = "<type>" }` entries. The expansion runs in two passes: first every
//! variable is parsed and the instance count per type is settled, then fields
//! are assigned. Index `i` of a type therefore means the same instance for
//! every variable in one resolution pass.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a raw segment is interpreted for a given field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    /// String list. A value with no brackets at all is one list for one
    /// instance; bracketed segments are one list per instance.
    List,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvBinding {
    pub path: &'static str,
    pub var: &'static str,
    pub kind: FieldKind,
}

const fn bind(path: &'static str, var: &'static str, kind: FieldKind) -> EnvBinding {
    EnvBinding { path, var, kind }
}

pub const ENV_BINDINGS: &[EnvBinding] = &[
    // DingTalk robot
    bind("notifiers.dingtalk.webhook", "DINGTALK_WEBHOOK", FieldKind::Text),
    bind("notifiers.dingtalk.secret", "DINGTALK_SECRET", FieldKind::Text),
    bind("notifiers.dingtalk.sources", "DINGTALK_SOURCES", FieldKind::List),
    // SMTP
    bind("notifiers.email.smtp_server", "EMAIL_SMTP_SERVER", FieldKind::Text),
    bind("notifiers.email.smtp_port", "EMAIL_SMTP_PORT", FieldKind::Integer),
    bind("notifiers.email.smtp_user", "EMAIL_SMTP_USER", FieldKind::Text),
    bind("notifiers.email.smtp_password", "EMAIL_SMTP_PASSWORD", FieldKind::Text),
    bind("notifiers.email.from_email", "EMAIL_FROM", FieldKind::Text),
    bind("notifiers.email.to_emails", "EMAIL_TO_EMAILS", FieldKind::List),
    bind("notifiers.email.sources", "EMAIL_SOURCES", FieldKind::List),
    // Bark push
    bind("notifiers.bark.api_url", "BARK_API_URL", FieldKind::Text),
    bind("notifiers.bark.device_key", "BARK_DEVICE_KEY", FieldKind::Text),
    bind("notifiers.bark.group", "BARK_GROUP", FieldKind::Text),
    bind("notifiers.bark.sources", "BARK_SOURCES", FieldKind::List),
    // Generic JSON webhook
    bind("notifiers.webhook.url", "WEBHOOK_URL", FieldKind::Text),
    bind("notifiers.webhook.sources", "WEBHOOK_SOURCES", FieldKind::List),
    // Feeds
    bind("spiders.rss.url", "RSS_URL", FieldKind::Text),
    bind("spiders.rss.source", "RSS_SOURCE", FieldKind::Text),
    // Process-wide settings
    bind("pool.max_workers", "POOL_MAX_WORKERS", FieldKind::Integer),
    bind("logger.level", "LOG_LEVEL", FieldKind::Text),
    bind("store.path", "DEDUP_DB_PATH", FieldKind::Text),
    bind("digest.title", "DIGEST_TITLE", FieldKind::Text),
    bind("schedule.interval_secs", "RUN_INTERVAL_SECS", FieldKind::Integer),
];

/// Sections whose entries are instance lists.
pub const INSTANCE_SECTIONS: [&str; 2] = ["spiders", "notifiers"];

/// Split on commas that sit outside `[...]`, trimming each piece.
///
/// `a,[x,y],b` → `["a", "[x,y]", "b"]`. An unclosed bracket swallows the rest
/// of the input into the current piece.
pub fn split_top_level(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for ch in raw.chars() {
        match ch {
            '[' => {
                depth += 1;
                cur.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                cur.push(ch);
            }
            ',' if depth == 0 => {
                out.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(ch),
        }
    }
    out.push(cur.trim().to_string());
    out
}

/// Parse `["a","b"]`, `['a', 'b']` or `[a, b]` into a string list.
/// Returns `None` when the segment is not a well-formed bracket literal.
pub fn parse_bracket_list(segment: &str) -> Option<Vec<String>> {
    let s = segment.trim();
    if !(s.starts_with('[') && s.ends_with(']')) || s.len() < 2 {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Vec<String>>(s) {
        return Some(v);
    }

    let inner = &s[1..s.len() - 1];
    if inner.contains('[') || inner.contains(']') {
        return None;
    }
    let mut out = Vec::new();
    for part in inner.split(',') {
        let p = part.trim();
        if p.is_empty() {
            continue;
        }
        out.push(unquote(p)?);
    }
    Some(out)
}

fn unquote(p: &str) -> Option<String> {
    let first = p.chars().next()?;
    if first == '\'' || first == '"' {
        if p.len() >= 2 && p.ends_with(first) {
            return Some(p[1..p.len() - 1].to_string());
        }
        // opening quote without its partner
        return None;
    }
    if p.ends_with('\'') || p.ends_with('"') {
        return None;
    }
    Some(p.to_string())
}

fn split_plain_list(s: &str) -> Vec<Value> {
    s.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(|x| Value::String(x.to_string()))
        .collect()
}

/// Interpret one segment. Anything that does not parse as its declared kind
/// stays an opaque string.
pub fn parse_segment(segment: &str, kind: FieldKind) -> Value {
    if let Some(list) = parse_bracket_list(segment) {
        return Value::Array(list.into_iter().map(Value::String).collect());
    }
    match kind {
        FieldKind::Integer => match segment.trim().parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(segment.to_string()),
        },
        FieldKind::List => Value::Array(split_plain_list(segment)),
        FieldKind::Text => Value::String(segment.to_string()),
    }
}

/// Parse a raw variable into positional values, one per instance.
/// `None` marks an empty position: it still counts towards the instance
/// total but assigns nothing.
pub fn parse_env_value(raw: &str, kind: FieldKind) -> Vec<Option<Value>> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    if kind == FieldKind::List && !raw.contains('[') {
        return vec![Some(Value::Array(split_plain_list(raw)))];
    }
    split_top_level(raw)
        .into_iter()
        .map(|seg| {
            if seg.is_empty() {
                None
            } else {
                Some(parse_segment(&seg, kind))
            }
        })
        .collect()
}

/// Parse a process-wide setting. The whole value is one setting, commas
/// included (`LOG_LEVEL=info,newsrelay=debug`). Integer settings must fit
/// in a `u64`; anything else yields `None`.
pub fn parse_scalar(raw: &str, kind: FieldKind) -> Option<Value> {
    let raw = raw.trim();
    match kind {
        FieldKind::Integer => raw.parse::<u64>().ok().map(Value::from),
        FieldKind::Text => Some(Value::String(raw.to_string())),
        FieldKind::List => Some(Value::Array(split_plain_list(raw))),
    }
}

struct InstanceAssignment {
    section: &'static str,
    kind: String,
    field: String,
    values: Vec<Option<Value>>,
}

/// Apply every bound variable found through `lookup` to `config`.
///
/// `config` should already have its instance sections normalised to arrays
/// (see `normalize_sections`); a missing section is created.
pub fn apply_overlay<F>(config: &mut Value, bindings: &[EnvBinding], lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }

    let mut assignments: Vec<InstanceAssignment> = Vec::new();
    let mut scalars: Vec<(Vec<&str>, Value)> = Vec::new();

    // Pass 0: read and parse.
    for b in bindings {
        let Some(raw) = lookup(b.var) else { continue };
        if raw.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = b.path.split('.').collect();
        match parts.as_slice() {
            [section, kind, field] if INSTANCE_SECTIONS.contains(section) => {
                assignments.push(InstanceAssignment {
                    section: *section,
                    kind: kind.to_string(),
                    field: field.to_string(),
                    values: parse_env_value(&raw, b.kind),
                });
            }
            [section, ..] if INSTANCE_SECTIONS.contains(section) => {
                tracing::debug!(path = b.path, "ignoring unknown instance path");
            }
            _ => {
                let Some(value) = parse_scalar(&raw, b.kind) else {
                    tracing::warn!(
                        var = b.var,
                        value = %raw,
                        "not a non-negative integer, keeping configured value"
                    );
                    continue;
                };
                scalars.push((parts, value));
            }
        }
    }

    // Pass 1: settle instance counts per (section, type).
    let mut wanted: BTreeMap<(&'static str, String), usize> = BTreeMap::new();
    for a in &assignments {
        let n = wanted.entry((a.section, a.kind.clone())).or_insert(0);
        *n = (*n).max(a.values.len());
    }
    for ((section, kind), n) in &wanted {
        let Some(list) = section_array(config, section) else {
            continue;
        };
        let have = list
            .iter()
            .filter(|v| instance_kind(v) == Some(kind.as_str()))
            .count();
        for _ in have..*n {
            let mut bare = Map::new();
            bare.insert("type".into(), Value::String(kind.clone()));
            list.push(Value::Object(bare));
        }
    }

    // Pass 2: positional field assignment.
    for a in assignments {
        let Some(list) = section_array(config, a.section) else {
            continue;
        };
        let slots: Vec<usize> = list
            .iter()
            .enumerate()
            .filter(|(_, v)| instance_kind(v) == Some(a.kind.as_str()))
            .map(|(i, _)| i)
            .collect();
        for (value, slot) in a.values.into_iter().zip(slots) {
            let Some(value) = value else { continue };
            if let Some(obj) = list[slot].as_object_mut() {
                obj.insert(a.field.clone(), value);
            }
        }
    }

    for (path, value) in scalars {
        set_path(config, &path, value);
    }
}

fn instance_kind(v: &Value) -> Option<&str> {
    v.get("type").and_then(Value::as_str)
}

fn section_array<'a>(config: &'a mut Value, section: &str) -> Option<&'a mut Vec<Value>> {
    let entry = ensure_object(config)?
        .entry(section.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    entry.as_array_mut()
}

fn ensure_object(v: &mut Value) -> Option<&mut Map<String, Value>> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    v.as_object_mut()
}

fn set_path(config: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cur = config;
    for p in parents {
        let Some(obj) = ensure_object(cur) else {
            return;
        };
        cur = obj
            .entry(p.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Some(obj) = ensure_object(cur) {
        obj.insert(last.to_string(), value);
    }
}

/// Turn legacy `[notifiers.dingtalk]`-style tables into instance lists and
/// make sure both instance sections are arrays.
pub fn normalize_sections(config: &mut Value) {
    let Some(root) = ensure_object(config) else {
        return;
    };
    for section in INSTANCE_SECTIONS {
        let normalized = match root.remove(section) {
            None | Some(Value::Null) => Value::Array(Vec::new()),
            Some(Value::Object(by_type)) => Value::Array(
                by_type
                    .into_iter()
                    .map(|(kind, fields)| {
                        let mut obj = match fields {
                            Value::Object(m) => m,
                            _ => Map::new(),
                        };
                        obj.entry("type").or_insert(Value::String(kind));
                        Value::Object(obj)
                    })
                    .collect(),
            ),
            Some(other) => other,
        };
        root.insert(section.to_string(), normalized);
    }
}
