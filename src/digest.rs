// src/digest.rs
//! Markdown digest: one section per source tag, numbered items, links where known.

use std::fmt::Write as _;

use crate::types::Item;

pub const UNKNOWN_SOURCE: &str = "Unknown source";
const SEPARATOR: &str = "------";

/// Group `items` by `source` (first-seen group order, fetch order inside a
/// group) and render them under a `# {title}` header.
pub fn render(items: &[Item], title: &str) -> String {
    let mut groups: Vec<(&str, Vec<&Item>)> = Vec::new();
    for item in items {
        let key = item.source.as_str();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => v.push(item),
            None => groups.push((key, vec![item])),
        }
    }

    let mut out = String::new();
    let _ = write!(out, "# {title}\n\n");
    for (source, group) in groups {
        let heading = if source.trim().is_empty() { UNKNOWN_SOURCE } else { source };
        let _ = write!(out, "### {heading}\n\n");
        for (i, item) in group.iter().enumerate() {
            let title = item.title.trim();
            match item.url.as_deref().filter(|u| !u.trim().is_empty()) {
                Some(url) => {
                    let _ = writeln!(out, "{}. [{}]({})", i + 1, title, url);
                }
                None => {
                    let _ = writeln!(out, "{}. {}", i + 1, title);
                }
            }
        }
        let _ = write!(out, "\n{SEPARATOR}\n\n");
    }
    out
}
