//! Typed records shared by every stage of the pipeline.
//!
//! ```text
//! PageResult ─┬─ Question ─┬─ QuestionPart      (per page, as the VLM saw it)
//!             │            └─ QuestionPart
//!             └─ Question ── QuestionPart
//!
//!                  flatten ──▶ Item, Item, …    (one per part, document-wide)
//! ```
//!
//! Page-level records carry the continuation flags the stitcher needs; the
//! flattened [`Item`] is the final output unit and is never mutated in place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// A figure or diagram attached to a question part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub figure_id: String,
    /// Bounding box `(x1, y1, x2, y2)` in page coordinates.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Inclusive, 1-indexed page span. Serialised as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn single(page: usize) -> Self {
        Self {
            start: page,
            end: page,
        }
    }

    /// Span between two pages, whichever order they are given in.
    pub fn span(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// Extend the range so it ends no earlier than `end`.
    pub fn widen_to(self, end: usize) -> Self {
        Self::span(self.start, self.end.max(end))
    }
}

impl From<(usize, usize)> for PageRange {
    fn from((a, b): (usize, usize)) -> Self {
        Self::span(a, b)
    }
}

impl From<PageRange> for (usize, usize) {
    fn from(r: PageRange) -> Self {
        (r.start, r.end)
    }
}

/// One part of a question (or the whole question when it has no sub-parts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPart {
    /// Sub-part label such as `"a"`; `None` for undivided questions.
    #[serde(default)]
    pub part_id: Option<String>,
    pub question_text: String,
    pub answer_text: String,
    #[serde(default)]
    pub figures: Vec<Figure>,
    #[serde(default)]
    pub continues_next_page: bool,
    #[serde(default)]
    pub continued_from_previous: bool,
}

impl QuestionPart {
    /// Full item id for this part inside `question_id`.
    pub fn full_id(&self, question_id: &str) -> String {
        match self.part_id.as_deref() {
            Some(p) => format!("{question_id}{p}"),
            None => question_id.to_string(),
        }
    }
}

/// A question as labelled in the document, e.g. `"2.18"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub parts: Vec<QuestionPart>,
    pub page_range: PageRange,
}

/// Everything the model found on a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed.
    pub page_number: usize,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl PageResult {
    /// A page that yielded nothing (blank page or unreadable model output).
    pub fn empty(page_number: usize) -> Self {
        Self {
            page_number,
            questions: Vec::new(),
        }
    }

    pub fn part_count(&self) -> usize {
        self.questions.iter().map(|q| q.parts.len()).sum()
    }
}

/// A single, uniquely identified question + answer in the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub question_text: String,
    pub answer_text: String,
    #[serde(default)]
    pub figures: Vec<Figure>,
    pub page_range: PageRange,
}

impl Item {
    /// A copy of this item with rewritten texts; id, figures and pages are kept.
    pub fn with_rewrite(&self, question_text: String, answer_text: String) -> Self {
        Self {
            id: self.id.clone(),
            question_text,
            answer_text,
            figures: self.figures.clone(),
            page_range: self.page_range,
        }
    }
}

/// Summary of one page carried into the prompt for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    /// Comma-separated ids of every part seen on the page, in page order.
    pub questions_summary: String,
    pub last_question_id: String,
    pub last_full_id: String,
}

impl PageContext {
    /// Build the context for the page after `page`.
    ///
    /// Returns `None` for a page with no questions so nothing is carried
    /// across a blank page.
    pub fn from_page(page: &PageResult) -> Option<Self> {
        let last_question = page.questions.last()?;

        let ids: Vec<String> = page
            .questions
            .iter()
            .flat_map(|q| q.parts.iter().map(|p| p.full_id(&q.question_id)))
            .collect();

        let last_full_id = last_question
            .parts
            .last()
            .map(|p| p.full_id(&last_question.question_id))
            .unwrap_or_else(|| last_question.question_id.clone());

        Some(Self {
            questions_summary: ids.join(", "),
            last_question_id: last_question.question_id.clone(),
            last_full_id,
        })
    }
}

/// Flatten page results into document-ordered items, one per part.
pub fn flatten(pages: &[PageResult]) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for page in pages {
        for question in &page.questions {
            for part in &question.parts {
                let id = part.full_id(&question.question_id);
                if !seen.insert(id.clone()) {
                    warn!("Duplicate item id {} (page {})", id, page.page_number);
                }
                items.push(Item {
                    id,
                    question_text: part.question_text.clone(),
                    answer_text: part.answer_text.clone(),
                    figures: part.figures.clone(),
                    page_range: question.page_range,
                });
            }
        }
    }

    items
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn part(part_id: Option<&str>, answer: &str) -> QuestionPart {
        QuestionPart {
            part_id: part_id.map(str::to_string),
            question_text: format!("Question {}", part_id.unwrap_or("")),
            answer_text: answer.to_string(),
            figures: Vec::new(),
            continues_next_page: false,
            continued_from_previous: false,
        }
    }

    pub fn question(id: &str, page: usize, parts: Vec<QuestionPart>) -> Question {
        Question {
            question_id: id.to_string(),
            parts,
            page_range: PageRange::single(page),
        }
    }

    pub fn page(number: usize, questions: Vec<Question>) -> PageResult {
        PageResult {
            page_number: number,
            questions,
        }
    }

    pub fn item(id: &str, question: &str, answer: &str) -> Item {
        Item {
            id: id.to_string(),
            question_text: question.to_string(),
            answer_text: answer.to_string(),
            figures: Vec::new(),
            page_range: PageRange::single(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn page_range_serialises_as_pair() {
        let json = serde_json::to_string(&PageRange::span(3, 4)).unwrap();
        assert_eq!(json, "[3,4]");
        let back: PageRange = serde_json::from_str("[5,2]").unwrap();
        assert_eq!(back, PageRange { start: 2, end: 5 });
    }

    #[test]
    fn widen_never_shrinks() {
        let r = PageRange::span(3, 5);
        assert_eq!(r.widen_to(7), PageRange::span(3, 7));
        assert_eq!(r.widen_to(4), r);
    }

    #[test]
    fn context_lists_every_part_in_page_order() {
        let p = page(
            2,
            vec![
                question("2.17", 2, vec![part(None, "x")]),
                question("2.18", 2, vec![part(Some("a"), "y"), part(Some("b"), "z")]),
            ],
        );
        let ctx = PageContext::from_page(&p).unwrap();
        assert_eq!(ctx.questions_summary, "2.17, 2.18a, 2.18b");
        assert_eq!(ctx.last_question_id, "2.18");
        assert_eq!(ctx.last_full_id, "2.18b");
    }

    #[test]
    fn context_falls_back_to_question_id_without_parts() {
        let p = page(1, vec![question("3.1", 1, vec![])]);
        let ctx = PageContext::from_page(&p).unwrap();
        assert_eq!(ctx.last_full_id, "3.1");
        assert_eq!(ctx.questions_summary, "");
    }

    #[test]
    fn blank_page_has_no_context() {
        assert_eq!(PageContext::from_page(&PageResult::empty(4)), None);
    }

    #[test]
    fn flatten_concatenates_part_ids() {
        let pages = vec![
            page(1, vec![question("1.1", 1, vec![part(None, "a1")])]),
            page(
                2,
                vec![question("1.2", 2, vec![part(Some("a"), "a2"), part(Some("b"), "a3")])],
            ),
        ];
        let ids: Vec<String> = flatten(&pages).into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["1.1", "1.2a", "1.2b"]);
    }

    #[test]
    fn part_defaults_when_fields_missing() {
        let p: QuestionPart =
            serde_json::from_str(r#"{"question_text":"q","answer_text":"a"}"#).unwrap();
        assert_eq!(p.part_id, None);
        assert!(!p.continues_next_page);
        assert!(p.figures.is_empty());
    }
}
