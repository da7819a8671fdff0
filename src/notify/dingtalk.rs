use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use super::{headline, post_json_with_retry, Sink, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::registry::AdapterSpec;
use crate::types::Item;

/// `type = "dingtalk"` instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DingTalkConfig {
    pub webhook: String,
    pub secret: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// DingTalk custom robot with signed webhook URLs.
pub struct DingTalkSink {
    name: String,
    title: String,
    webhook: String,
    secret: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DingTalkSink {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        cfg: DingTalkConfig,
    ) -> Result<Self> {
        if cfg.webhook.trim().is_empty() {
            bail!("dingtalk sink needs a `webhook`");
        }
        if cfg.secret.trim().is_empty() {
            bail!("dingtalk sink needs a `secret`");
        }
        Ok(Self {
            name: name.into(),
            title: title.into(),
            webhook: cfg.webhook,
            secret: cfg.secret,
            client: Client::new(),
            timeout: Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn from_spec(spec: &AdapterSpec<'_>) -> Result<Self> {
        Self::new(spec.name, spec.digest_title, spec.config.decode()?)
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    fn signed_url(&self, timestamp_ms: i64) -> Result<String> {
        let sign = sign(&self.secret, timestamp_ms)?;
        let sep = if self.webhook.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}timestamp={}&sign={}",
            self.webhook, sep, timestamp_ms, sign
        ))
    }
}

/// URL-encoded base64 of HMAC-SHA256(secret, "{timestamp}\n{secret}").
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).context("hmac key")?;
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    let raw = mac.finalize().into_bytes();
    let b64 = base64::engine::general_purpose::STANDARD.encode(raw);
    Ok(urlencoding::encode(&b64).into_owned())
}

#[derive(Serialize)]
struct Markdown<'a> {
    title: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct DingTalkPayload<'a> {
    msgtype: &'static str,
    markdown: Markdown<'a>,
}

#[async_trait]
impl Sink for DingTalkSink {
    async fn notify(&self, items: &[Item], digest: &str) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        let url = self.signed_url(chrono::Utc::now().timestamp_millis())?;
        let title = headline(&self.title, items.len());
        let payload = DingTalkPayload {
            msgtype: "markdown",
            markdown: Markdown {
                title: &title,
                text: digest,
            },
        };

        let res =
            post_json_with_retry(&self.client, &url, &payload, self.timeout, self.max_retries)
                .await;
        let body = match res {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(sink = %self.name, error = %e, "dingtalk request failed");
                return Ok(false);
            }
        };
        match body.get("errcode").and_then(|c| c.as_i64()) {
            Some(0) => {
                tracing::info!(sink = %self.name, count = items.len(), "dingtalk delivered");
                Ok(true)
            }
            _ => {
                tracing::error!(sink = %self.name, response = %body, "dingtalk rejected message");
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
