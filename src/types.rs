// src/types.rs
use serde::{Deserialize, Serialize};

/// One news/announcement entry produced by a source adapter.
///
/// `title` is the identity basis for deduplication; two items with the same
/// title are the same item no matter what the other fields say.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Channel/category tag, e.g. "binance listings". Sinks filter on this.
    pub source: String,
    #[serde(default)]
    pub publish_time: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl Item {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            source: source.into(),
            publish_time: String::new(),
            content: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_publish_time(mut self, ts: impl Into<String>) -> Self {
        self.publish_time = ts.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Titles made only of whitespace count as missing.
    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}
