use chrono::{DateTime, Utc};

/// Maximum stored title length, in characters.
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum stored summary length, in characters.
pub const MAX_SUMMARY_LEN: usize = 100;

/// Maximum stored length of the comma-joined tag list, in characters.
pub const MAX_TAGS_LEN: usize = 100;

/// One article of a feed. `link` identifies it within the feed's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub summary: Option<String>,
    pub tags: Option<String>,
    pub read_flag: bool,
}

impl Entry {
    pub fn new(link: impl Into<String>, published_at: DateTime<Utc>, title: &str) -> Self {
        Self {
            link: link.into(),
            published_at,
            title: truncate_chars(title.trim(), MAX_TITLE_LEN),
            summary: None,
            tags: None,
            read_flag: false,
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = non_empty(summary, MAX_SUMMARY_LEN);
        self
    }

    /// Joins the given terms with `,`, dropping blank ones.
    pub fn with_tags<'a>(mut self, terms: impl IntoIterator<Item = &'a str>) -> Self {
        let joined = terms
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        self.tags = non_empty(&joined, MAX_TAGS_LEN);
        self
    }
}

fn non_empty(text: &str, max_len: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(text, max_len))
    }
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len).collect()
    }
}
