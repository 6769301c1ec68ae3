use chrono::Timelike;
use feed_rs::parser;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::Entry;

const UNTITLED: &str = "Untitled";

/// Line width handed to html2text; lines are joined again afterwards.
const SUMMARY_WRAP_WIDTH: usize = 80;

/// Parses an RSS/Atom document into normalized entries, in feed order.
///
/// Items without a link or without any timestamp are dropped. A document that
/// is not a feed, or that leaves no entries, is a `Parse` error.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<Entry>> {
    let feed = parser::parse(bytes).map_err(|e| AppError::Parse(e.to_string()))?;

    let total = feed.entries.len();
    let entries: Vec<Entry> = feed.entries.into_iter().filter_map(normalize).collect();

    if entries.is_empty() {
        return Err(AppError::Parse(if total == 0 {
            "feed has no entries".to_string()
        } else {
            format!("none of {} entries has both a link and a timestamp", total)
        }));
    }
    if entries.len() < total {
        debug!("Dropped {} of {} entries", total - entries.len(), total);
    }
    Ok(entries)
}

fn normalize(item: feed_rs::model::Entry) -> Option<Entry> {
    let Some(link) = item
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
    else {
        debug!("Skipping entry {:?} without a link", item.id);
        return None;
    };

    // "updated" is what feeds bump when an article changes
    let Some(timestamp) = item.updated.or(item.published) else {
        debug!("Skipping entry {} without a timestamp", link);
        return None;
    };
    let published_at = timestamp.with_nanosecond(0).unwrap_or(timestamp);

    let title = item
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let summary = item
        .summary
        .map(|s| s.content)
        .or_else(|| item.content.and_then(|c| c.body))
        .and_then(|html| summary_text(&html))
        .unwrap_or_default();

    let tags = item.categories.iter().map(|c| c.term.as_str());

    Some(
        Entry::new(link, published_at, &title)
            .with_summary(&summary)
            .with_tags(tags),
    )
}

/// Renders summary HTML as text on a single line.
fn summary_text(html: &str) -> Option<String> {
    match html2text::from_read(html.as_bytes(), SUMMARY_WRAP_WIDTH) {
        Ok(text) => Some(text.split_whitespace().collect::<Vec<_>>().join(" ")),
        Err(e) => {
            debug!("Could not render summary as text: {}", e);
            None
        }
    }
}
