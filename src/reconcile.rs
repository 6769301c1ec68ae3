//! Decides which fetched entries must be written for a feed table to hold
//! the newest known version of every link.
//!
//! The engine is pure: it sees the publish times already stored for the
//! fetched links and returns the writes to apply, oldest first, so that a
//! sequential writer which stops early has persisted the older entries.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{Action, Decision, Entry};

/// Computes the link-unique, publish-time ordered write set for `candidates`.
///
/// `existing` maps the stored links among the candidates to their publish
/// times. When a link is listed more than once, only its latest copy is
/// considered (the later one in feed order on a tie). Entries that are not
/// strictly newer than the stored version are skipped and not returned.
pub fn reconcile(
    existing: &HashMap<String, DateTime<Utc>>,
    candidates: Vec<Entry>,
) -> Vec<Decision> {
    let mut latest: HashMap<&str, usize> = HashMap::with_capacity(candidates.len());
    for (index, entry) in candidates.iter().enumerate() {
        let supersedes = match latest.get(entry.link.as_str()) {
            Some(&kept) => entry.published_at >= candidates[kept].published_at,
            None => true,
        };
        if supersedes {
            latest.insert(entry.link.as_str(), index);
        }
    }
    let keep: HashSet<usize> = latest.into_values().collect();

    let mut decisions: Vec<Decision> = candidates
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep.contains(index))
        .filter_map(|(_, entry)| {
            let action = match existing.get(&entry.link) {
                None => Action::Insert,
                Some(stored) if entry.published_at > *stored => Action::Replace,
                Some(_) => return None,
            };
            Some(Decision::new(entry, action))
        })
        .collect();

    // Stable, so equal publish times keep feed order.
    decisions.sort_by_key(|d| d.entry.published_at);
    decisions
}

/// Distinct links of `entries`, in first-seen order.
pub fn candidate_links(entries: &[Entry]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .iter()
        .filter(|e| seen.insert(e.link.as_str()))
        .map(|e| e.link.clone())
        .collect()
}
