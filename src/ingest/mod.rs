// src/ingest/mod.rs
pub mod providers;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Item;

/// A source adapter: one configured instance of some feed or API.
///
/// Transport and parse failures are returned as errors; the orchestrator
/// logs them and carries on with the other sources.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Item>>;
    fn name(&self) -> &str;
}

/// Normalize a title: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Non-breaking spaces count as whitespace
    out = out.replace('\u{00A0}', " ");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    // 5) Length cap: 500 chars
    let out = out.trim();
    if out.chars().count() > 500 {
        return out.chars().take(500).collect();
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  <b>Binance&nbsp;&nbsp; will list</b>\n  ABC  ";
        assert_eq!(normalize_text(s), "Binance will list ABC");
    }

    #[test]
    fn normalize_text_keeps_punctuation() {
        assert_eq!(normalize_text("Listed?!"), "Listed?!");
    }
}
