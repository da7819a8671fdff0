// src/ingest/providers/rss.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::{
    format_description::well_known::Rfc2822, macros::format_description, OffsetDateTime,
    UtcOffset,
};

use crate::config::InstanceConfig;
use crate::ingest::{normalize_text, Source};
use crate::types::Item;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn default_limit() -> usize {
    20
}

fn default_timeout() -> u64 {
    15
}

/// `type = "rss"` instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RssConfig {
    pub url: String,
    /// Tag stamped on every item; defaults to the channel title.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, or the raw value when it is not RFC 2822.
fn format_pub_date(ts: &str) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| dt.to_offset(UtcOffset::UTC).format(&fmt).ok())
        .unwrap_or_else(|| ts.trim().to_string())
}

/// Host part of the feed URL, without userinfo or port.
fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

/// Parse an RSS 2.0 document into items.
///
/// `source` overrides the tag; otherwise the channel title is used, then
/// `fallback_tag`. Entries without a title are skipped.
pub fn parse_feed(
    xml: &str,
    source: Option<&str>,
    fallback_tag: &str,
    limit: usize,
) -> Result<Vec<Item>> {
    let rss: Rss = from_str(xml).context("parsing rss xml")?;
    let tag = source
        .map(str::to_string)
        .or_else(|| {
            rss.channel
                .title
                .as_deref()
                .map(normalize_text)
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| fallback_tag.to_string());

    let mut out = Vec::with_capacity(rss.channel.item.len().min(limit));
    for it in rss.channel.item {
        if out.len() >= limit {
            break;
        }
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            continue;
        }
        let content = it
            .description
            .as_deref()
            .map(normalize_text)
            .filter(|c| !c.is_empty());
        out.push(Item {
            title,
            url: it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            source: tag.clone(),
            publish_time: it.pub_date.as_deref().map(format_pub_date).unwrap_or_default(),
            content,
        });
    }
    Ok(out)
}

pub struct RssSource {
    name: String,
    cfg: RssConfig,
    client: reqwest::Client,
}

impl RssSource {
    pub fn new(name: impl Into<String>, cfg: RssConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("newsrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building rss http client")?;
        Ok(Self {
            name: name.into(),
            cfg,
            client,
        })
    }

    pub fn from_config(cfg: &InstanceConfig, name: &str) -> Result<Self> {
        let rss: RssConfig = cfg.decode()?;
        if rss.url.trim().is_empty() {
            anyhow::bail!("rss source needs a `url`");
        }
        Self::new(name, rss)
    }
}

#[async_trait]
impl Source for RssSource {
    async fn fetch(&self) -> Result<Vec<Item>> {
        let body = self
            .client
            .get(&self.cfg.url)
            .send()
            .await
            .context("rss http get()")?
            .error_for_status()
            .context("rss non-2xx")?
            .text()
            .await
            .context("rss http .text()")?;
        let fallback = host_of(&self.cfg.url).unwrap_or_else(|| self.name.clone());
        let items = parse_feed(&body, self.cfg.source.as_deref(), &fallback, self.cfg.limit)?;
        tracing::debug!(source = %self.name, count = items.len(), "rss parsed");
        Ok(items)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Exchange &amp; Listings</title>
    <link>https://example.test</link>
    <item>
      <title>Will list &lt;b&gt;ABC&lt;/b&gt;</title>
      <link>https://example.test/a</link>
      <pubDate>Mon, 15 Dec 2025 10:00:00 +0800</pubDate>
      <description>New pair ABC/USDT</description>
    </item>
    <item>
      <title>   </title>
      <link>https://example.test/empty</link>
    </item>
    <item>
      <title>Maintenance notice</title>
      <pubDate>not a date</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_and_uses_channel_title_as_tag() {
        let items = parse_feed(FEED, None, "example.test", 20).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Will list ABC");
        assert_eq!(items[0].source, "Exchange & Listings");
        assert_eq!(items[0].url.as_deref(), Some("https://example.test/a"));
        assert_eq!(items[0].publish_time, "2025-12-15 02:00:00");
        assert_eq!(items[0].content.as_deref(), Some("New pair ABC/USDT"));
        assert_eq!(items[1].publish_time, "not a date");
        assert_eq!(items[1].url, None);
    }

    #[test]
    fn explicit_tag_and_limit_win() {
        let items = parse_feed(FEED, Some("listings"), "example.test", 1).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "listings");
    }

    #[test]
    fn host_is_extracted() {
        assert_eq!(
            host_of("https://news.example.test/feed.xml?x=1").as_deref(),
            Some("news.example.test")
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn host_drops_credentials_and_port() {
        assert_eq!(
            host_of("https://user:pw@news.example.test:8443/feed").as_deref(),
            Some("news.example.test")
        );
    }

    #[test]
    fn untitled_channel_is_tagged_with_bare_host() {
        let xml = r#"<rss version="2.0"><channel>
            <item><title>Hello</title></item>
        </channel></rss>"#;
        let host = host_of("https://user:pw@feeds.example.test:8443/rss").unwrap();
        let items = parse_feed(xml, None, &host, 20).unwrap();
        assert_eq!(items[0].source, "feeds.example.test");
    }

    #[test]
    fn config_without_url_is_rejected() {
        let cfg = InstanceConfig::new("rss");
        assert!(RssSource::from_config(&cfg, "rss#0").is_err());
    }
}
