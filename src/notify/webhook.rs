use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{headline, post_json_with_retry, Sink, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::registry::AdapterSpec;
use crate::types::Item;

/// `type = "webhook"` instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Extra request headers, e.g. an auth token.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Generic JSON webhook.
pub struct WebhookSink {
    name: String,
    title: String,
    url: String,
    client: Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    title: String,
    count: usize,
    text: &'a str,
    items: &'a [Item],
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name {k:?}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid value for header {k:?}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

impl WebhookSink {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        cfg: WebhookConfig,
    ) -> Result<Self> {
        if cfg.url.trim().is_empty() {
            bail!("webhook sink needs a `url`");
        }
        let client = Client::builder()
            .default_headers(header_map(&cfg.headers)?)
            .build()
            .context("build webhook client")?;
        Ok(Self {
            name: name.into(),
            title: title.into(),
            url: cfg.url,
            client,
            timeout: Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        })
    }

    pub fn from_spec(spec: &AdapterSpec<'_>) -> Result<Self> {
        Self::new(spec.name, spec.digest_title, spec.config.decode()?)
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn notify(&self, items: &[Item], digest: &str) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        let payload = WebhookPayload {
            title: headline(&self.title, items.len()),
            count: items.len(),
            text: digest,
            items,
        };
        let res = post_json_with_retry(
            &self.client,
            &self.url,
            &payload,
            self.timeout,
            DEFAULT_MAX_RETRIES,
        )
        .await;
        match res {
            Ok(_) => {
                tracing::info!(sink = %self.name, count = items.len(), "webhook delivered");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(sink = %self.name, error = %e, "webhook failed");
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
