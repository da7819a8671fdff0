// src/notify/mod.rs
pub mod bark;
pub mod dingtalk;
pub mod email;
pub mod webhook;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::types::Item;

/// A sink adapter: one configured notification channel instance.
///
/// `notify` returns `Ok(true)` when everything was delivered and `Ok(false)`
/// on a delivery failure the adapter has already logged. `Err` is reserved
/// for faults the adapter could not classify; the orchestrator counts it as
/// a failure too.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn notify(&self, items: &[Item], digest: &str) -> Result<bool>;
    fn name(&self) -> &str;
}

/// Subject line shared by the channels that need one.
pub fn headline(title: &str, count: usize) -> String {
    format!("{title} ({count} items)")
}

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_MAX_RETRIES: u8 = 3;

/// POST `payload` as JSON, retrying transport errors and non-2xx responses
/// with exponential backoff (500ms, 1s, 2s, ...). Returns the decoded body of
/// the first successful response.
pub(crate) async fn post_json_with_retry<P: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    payload: &P,
    timeout: Duration,
    max_retries: u8,
) -> Result<serde_json::Value> {
    let max_retries = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let res = client.post(url).timeout(timeout).json(payload).send().await;

        let err = match res {
            Ok(rsp) => match rsp.error_for_status() {
                Ok(rsp) => {
                    // Some endpoints answer 200 with an empty body.
                    let text = rsp.text().await.unwrap_or_default();
                    if text.trim().is_empty() {
                        return Ok(serde_json::Value::Null);
                    }
                    return Ok(serde_json::from_str(&text)
                        .unwrap_or(serde_json::Value::String(text)));
                }
                Err(e) => anyhow!("HTTP error: {e}"),
            },
            Err(e) => anyhow!("request failed: {e}"),
        };

        if attempt >= max_retries {
            return Err(err);
        }
        tracing::debug!(error = %err, attempt, "post failed, retrying");
        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headline_counts_items() {
        assert_eq!(headline("News Digest", 3), "News Digest (3 items)");
    }
}
