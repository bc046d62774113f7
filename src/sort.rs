//! Canonical ordering of the final item set.
//!
//! The model emits items in whatever order it read them, and stitching plus
//! resumption can shuffle things further. The final document is ordered by a
//! key parsed from the hierarchical id: `2.18 < 2.18a < 2.18b < 2.19 < 10.1`.

use crate::model::Item;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static RE_CANONICAL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)([a-z]*)$").unwrap());

/// Sort key for an item id.
///
/// Variant order matters: every [`SortKey::Malformed`] key orders before
/// every [`SortKey::Canonical`] one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    /// Id that is not `<int>.<int><letters>`; ordered by the raw string.
    Malformed(String),
    Canonical {
        chapter: u64,
        question: u64,
        suffix: String,
    },
}

impl SortKey {
    pub fn parse(id: &str) -> Self {
        let Some(caps) = RE_CANONICAL_ID.captures(id) else {
            return SortKey::Malformed(id.to_string());
        };
        match (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
            (Ok(chapter), Ok(question)) => SortKey::Canonical {
                chapter,
                question,
                suffix: caps[3].to_string(),
            },
            _ => SortKey::Malformed(id.to_string()),
        }
    }
}

/// Compare two ids by their canonical key.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    SortKey::parse(a).cmp(&SortKey::parse(b))
}

/// Stable sort by canonical key; equal keys keep their input order.
pub fn sort_items(items: &mut [Item]) {
    items.sort_by_cached_key(|item| SortKey::parse(&item.id));
}
