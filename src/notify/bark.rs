use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{headline, post_json_with_retry, Sink, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::registry::AdapterSpec;
use crate::types::Item;

/// Bark rejects bodies around 2 KB; keep a margin.
pub const MAX_PAGE_BYTES: usize = 1900;

const PAGE_PAUSE: Duration = Duration::from_secs(1);

fn default_api_url() -> String {
    "https://api.day.app".to_string()
}

fn default_group() -> String {
    "newsrelay".to_string()
}

/// `type = "bark"` instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BarkConfig {
    pub device_key: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_group")]
    pub group: String,
}

/// iOS push through a Bark server. Long digests are sent as several pages.
pub struct BarkSink {
    name: String,
    title: String,
    cfg: BarkConfig,
    client: Client,
    page_pause: Duration,
}

impl BarkSink {
    pub fn new(name: impl Into<String>, title: impl Into<String>, cfg: BarkConfig) -> Result<Self> {
        if cfg.device_key.trim().is_empty() {
            bail!("bark sink needs a `device_key`");
        }
        Ok(Self {
            name: name.into(),
            title: title.into(),
            cfg,
            client: Client::new(),
            page_pause: PAGE_PAUSE,
        })
    }

    pub fn from_spec(spec: &AdapterSpec<'_>) -> Result<Self> {
        Self::new(spec.name, spec.digest_title, spec.config.decode()?)
    }

    fn push_url(&self) -> String {
        format!("{}/push", self.cfg.api_url.trim_end_matches('/'))
    }
}

/// Split `content` on line boundaries into pages of at most `max_bytes`
/// (a single longer line becomes its own page).
pub fn paginate(content: &str, max_bytes: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut size = 0usize;

    for line in content.split('\n') {
        let line_size = line.len() + 1;
        if size + line_size > max_bytes && !current.is_empty() {
            pages.push(current.join("\n"));
            current.clear();
            size = 0;
        }
        current.push(line);
        size += line_size;
    }
    if !current.is_empty() {
        let last = current.join("\n");
        if !last.trim().is_empty() || pages.is_empty() {
            pages.push(last);
        }
    }
    pages
}

#[derive(Serialize)]
struct BarkPayload<'a> {
    device_key: &'a str,
    title: String,
    markdown: &'a str,
    group: &'a str,
}

fn accepted(body: &serde_json::Value) -> bool {
    body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
        || body.get("code").and_then(|v| v.as_i64()) == Some(200)
}

#[async_trait]
impl Sink for BarkSink {
    async fn notify(&self, items: &[Item], digest: &str) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        let pages = paginate(digest, MAX_PAGE_BYTES);
        let total = pages.len();
        let url = self.push_url();
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);

        for (idx, page) in pages.iter().enumerate() {
            let mut title = headline(&self.title, items.len());
            if total > 1 {
                title = format!("{title} - page {}/{}", idx + 1, total);
            }
            let payload = BarkPayload {
                device_key: &self.cfg.device_key,
                title,
                markdown: page,
                group: &self.cfg.group,
            };
            let res =
                post_json_with_retry(&self.client, &url, &payload, timeout, DEFAULT_MAX_RETRIES)
                    .await;
            let body = match res {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(
                        sink = %self.name,
                        page = idx + 1,
                        total,
                        error = %e,
                        "bark request failed"
                    );
                    return Ok(false);
                }
            };
            if !accepted(&body) {
                tracing::error!(
                    sink = %self.name,
                    page = idx + 1,
                    total,
                    response = %body,
                    "bark rejected page"
                );
                return Ok(false);
            }
            tracing::debug!(sink = %self.name, page = idx + 1, total, "bark page sent");
            if idx + 1 < total {
                tokio::time::sleep(self.page_pause).await;
            }
        }
        tracing::info!(sink = %self.name, count = items.len(), pages = total, "bark delivered");
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_content_is_one_page() {
        let pages = paginate("a\nb\nc", MAX_PAGE_BYTES);
        assert_eq!(pages, vec!["a\nb\nc".to_string()]);
    }

    #[test]
    fn pages_respect_byte_limit_and_keep_lines_whole() {
        let line = "x".repeat(40);
        let content = vec![line.as_str(); 10].join("\n");
        let pages = paginate(&content, 100);
        assert_eq!(pages.len(), 5);
        for p in &pages {
            assert!(p.len() <= 100, "page too long: {}", p.len());
            assert!(p.split('\n').all(|l| l.len() == 40));
        }
        assert_eq!(pages.join("\n"), content);
    }

    #[test]
    fn multibyte_text_counts_bytes() {
        // 3 bytes per char
        let line = "资讯".repeat(10);
        let content = format!("{line}\n{line}");
        let pages = paginate(&content, 70);
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn both_success_shapes_are_accepted() {
        assert!(accepted(&json!({"ok": true})));
        assert!(accepted(&json!({"code": 200, "message": "success"})));
        assert!(!accepted(&json!({"code": 400})));
        assert!(!accepted(&serde_json::Value::Null));
    }

    #[test]
    fn api_url_default_and_trailing_slash() {
        let sink = BarkSink::new(
            "b",
            "News",
            BarkConfig {
                device_key: "k".into(),
                api_url: "https://bark.example.test/".into(),
                group: default_group(),
            },
        )
        .unwrap();
        assert_eq!(sink.push_url(), "https://bark.example.test/push");
    }
}
