//! Post-run scan for references that survived resolution.
//!
//! The resolver only rewrites the first essential reference of an item and
//! fails open, so the final text can still say "by Lemma 3" or "see (2.4)".
//! This pass is a plain regex scan, with no model call, that flags those
//! leftovers for review.

use crate::model::Item;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_REMAINING_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:theorem|lemma|corollary|proposition|remark|example|definition|exercise|problem|section|chapter|page)\s+\d+(?:\.\d+)*[a-z]?|equation\s*\(\d+(?:\.\d+)*|(?:see|from)\s+\(\d+(?:\.\d+)*)",
    )
    .unwrap()
});

/// Leftover references found in one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAudit {
    pub id: String,
    /// Matched phrases, in text order (question first, then answer).
    pub references: Vec<String>,
}

/// Result of scanning a whole item list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Only items with at least one match, in input order.
    pub items: Vec<ItemAudit>,
}

impl AuditReport {
    pub fn items_flagged(&self) -> usize {
        self.items.len()
    }

    pub fn total_references(&self) -> usize {
        self.items.iter().map(|i| i.references.len()).sum()
    }
}

/// Reference-like phrases in `text`.
pub fn find_references(text: &str) -> Vec<String> {
    RE_REMAINING_REFERENCE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Scan every item's question and answer.
pub fn audit_items(items: &[Item]) -> AuditReport {
    let items = items
        .iter()
        .filter_map(|item| {
            let mut references = find_references(&item.question_text);
            references.extend(find_references(&item.answer_text));
            (!references.is_empty()).then(|| ItemAudit {
                id: item.id.clone(),
                references,
            })
        })
        .collect();
    AuditReport { items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::item;

    #[test]
    fn finds_numbered_references_case_insensitively() {
        let found = find_references("By Theorem 3.2 and lemma 4, see (2.1); compare Exercise 12b.");
        assert_eq!(found, vec!["Theorem 3.2", "lemma 4", "see (2.1", "Exercise 12b"]);
    }

    #[test]
    fn finds_equation_and_section_forms() {
        let found = find_references("Use equation (7) from Section 2 on page 14.");
        assert_eq!(found, vec!["equation (7", "Section 2", "page 14"]);
    }

    #[test]
    fn ignores_unnumbered_mentions() {
        assert!(find_references("This example shows the theorem is sharp.").is_empty());
        assert!(find_references("$f(x) = 2x$").is_empty());
    }

    #[test]
    fn report_lists_only_flagged_items() {
        let items = vec![
            item("1.1", "Prove it.", "Trivial."),
            item("1.2", "Using Lemma 2, show it.", "By Remark 1.4 it holds."),
        ];
        let report = audit_items(&items);
        assert_eq!(report.items_flagged(), 1);
        assert_eq!(report.total_references(), 2);
        assert_eq!(report.items[0].id, "1.2");
        assert_eq!(report.items[0].references, vec!["Lemma 2", "Remark 1.4"]);
    }
}
