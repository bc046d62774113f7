//! Multi-page stitching: merge question parts split across a page break.
//!
//! The VLM sees one page at a time, so a long proof that runs onto the next
//! page comes back as two parts: one flagged `continues_next_page` and one
//! flagged `continued_from_previous` on the following page. This pass joins
//! them into a single logical part.
//!
//! ## Algorithm
//!
//! One left-to-right sweep over page boundaries. At boundary `i → i+1` the
//! open parts are every part on page `i` that continues, plus any part merged
//! at the previous boundary that still continues (it lives on an earlier
//! page). Each open part takes the first matching candidate on page `i+1`;
//! page `i+1` is then rebuilt without the consumed parts, dropping questions
//! that end up empty. A three-page chain is therefore two single-step merges
//! into the part on the first page.
//!
//! The input slice is never touched: the output is a freshly built list.

use crate::model::{PageResult, Question, QuestionPart};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Counters describing what the stitcher did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchReport {
    /// Successful single-step merges.
    pub merged: usize,
    /// Continuing parts with no candidate on the next page (left as-is).
    pub unmatched: usize,
    /// Continuing parts with more than one candidate (first one merged).
    pub ambiguous: usize,
}

/// Result of [`stitch_pages`].
#[derive(Debug, Clone, PartialEq)]
pub struct Stitched {
    pub pages: Vec<PageResult>,
    pub report: StitchReport,
}

/// Location of a part: (page index, question index, part index).
type PartLoc = (usize, usize, usize);

/// Merge boundary-split parts across the whole ordered page sequence.
pub fn stitch_pages(input: &[PageResult]) -> Stitched {
    let mut pages: Vec<PageResult> = input.to_vec();
    let mut report = StitchReport::default();
    let mut carried: Vec<PartLoc> = Vec::new();

    for i in 0..pages.len().saturating_sub(1) {
        let consecutive = pages[i + 1].page_number == pages[i].page_number + 1;

        let mut open = std::mem::take(&mut carried);
        for (qi, q) in pages[i].questions.iter().enumerate() {
            for (pi, p) in q.parts.iter().enumerate() {
                if p.continues_next_page && !open.contains(&(i, qi, pi)) {
                    open.push((i, qi, pi));
                }
            }
        }
        if open.is_empty() {
            continue;
        }
        if !consecutive {
            debug!(
                "Pages {} and {} are not consecutive; {} continuation(s) left open",
                pages[i].page_number,
                pages[i + 1].page_number,
                open.len()
            );
            report.unmatched += open.len();
            continue;
        }

        let mut consumed: HashSet<(usize, usize)> = HashSet::new();

        for (pg, qi, pi) in open {
            let question_id = pages[pg].questions[qi].question_id.clone();
            let part_id = pages[pg].questions[qi].parts[pi].part_id.clone();

            let candidates = find_candidates(&pages[i + 1], &question_id, &part_id, &consumed);
            let Some(&(nq, np)) = candidates.first() else {
                warn!(
                    "{} continues past page {} but page {} has no matching continuation",
                    pages[pg].questions[qi].parts[pi].full_id(&question_id),
                    pages[i].page_number,
                    pages[i + 1].page_number
                );
                report.unmatched += 1;
                continue;
            };
            if candidates.len() > 1 {
                warn!(
                    "{} has {} continuation candidates on page {}; merging the first",
                    pages[pg].questions[qi].parts[pi].full_id(&question_id),
                    candidates.len(),
                    pages[i + 1].page_number
                );
                report.ambiguous += 1;
            }

            consumed.insert((nq, np));
            let next_part = pages[i + 1].questions[nq].parts[np].clone();
            let next_end = pages[i + 1].questions[nq].page_range.end;

            let target = &mut pages[pg].questions[qi];
            target.page_range = target.page_range.widen_to(next_end);
            let merged = merge_parts(&target.parts[pi], &next_part);
            let still_open = merged.continues_next_page;
            target.parts[pi] = merged;
            report.merged += 1;

            debug!(
                "Stitched {} across pages {}–{}",
                target.parts[pi].full_id(&question_id),
                target.page_range.start,
                target.page_range.end
            );

            if still_open {
                carried.push((pg, qi, pi));
            }
        }

        if !consumed.is_empty() {
            let rebuilt = PageResult {
                page_number: pages[i + 1].page_number,
                questions: without_consumed(&pages[i + 1].questions, &consumed),
            };
            pages[i + 1] = rebuilt;
        }
    }

    Stitched { pages, report }
}

/// Candidate continuations on `page` for a part, in page order.
fn find_candidates(
    page: &PageResult,
    question_id: &str,
    part_id: &Option<String>,
    consumed: &HashSet<(usize, usize)>,
) -> Vec<(usize, usize)> {
    page.questions
        .iter()
        .enumerate()
        .filter(|(_, q)| q.question_id == question_id)
        .flat_map(|(qi, q)| {
            q.parts
                .iter()
                .enumerate()
                .filter(move |(pi, p)| {
                    p.continued_from_previous
                        && &p.part_id == part_id
                        && !consumed.contains(&(qi, *pi))
                })
                .map(move |(pi, _)| (qi, pi))
        })
        .collect()
}

/// Join a part with its continuation from the following page.
fn merge_parts(first: &QuestionPart, second: &QuestionPart) -> QuestionPart {
    let question_text = if second.question_text.trim().is_empty()
        || second.question_text.trim() == first.question_text.trim()
    {
        first.question_text.clone()
    } else {
        join_paragraphs(&first.question_text, &second.question_text)
    };

    QuestionPart {
        part_id: first.part_id.clone(),
        question_text,
        answer_text: join_paragraphs(&first.answer_text, &second.answer_text),
        figures: first
            .figures
            .iter()
            .chain(second.figures.iter())
            .cloned()
            .collect(),
        continues_next_page: second.continues_next_page,
        continued_from_previous: first.continued_from_previous,
    }
}

fn join_paragraphs(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a}\n\n{b}"),
    }
}

fn without_consumed(questions: &[Question], consumed: &HashSet<(usize, usize)>) -> Vec<Question> {
    questions
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let parts: Vec<QuestionPart> = q
                .parts
                .iter()
                .enumerate()
                .filter(|(pi, _)| !consumed.contains(&(qi, *pi)))
                .map(|(_, p)| p.clone())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(Question {
                    question_id: q.question_id.clone(),
                    parts,
                    page_range: q.page_range,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::{Figure, PageRange};

    fn continuing(part_id: Option<&str>, answer: &str) -> QuestionPart {
        QuestionPart {
            continues_next_page: true,
            ..part(part_id, answer)
        }
    }

    fn continuation(part_id: Option<&str>, answer: &str) -> QuestionPart {
        QuestionPart {
            continued_from_previous: true,
            ..part(part_id, answer)
        }
    }

    fn figure(id: &str) -> Figure {
        Figure {
            figure_id: id.into(),
            bbox: None,
            path: None,
            description: None,
        }
    }

    #[test]
    fn merges_proof_split_across_pages() {
        let pages = vec![
            page(
                3,
                vec![question(
                    "4.2",
                    3,
                    vec![part(Some("a"), "done"), continuing(Some("b"), "Start of proof")],
                )],
            ),
            page(
                4,
                vec![
                    question("4.2", 4, vec![continuation(Some("b"), "End of proof")]),
                    question("4.3", 4, vec![part(None, "next")]),
                ],
            ),
        ];

        let out = stitch_pages(&pages);

        assert_eq!(out.report.merged, 1);
        let q = &out.pages[0].questions[0];
        assert_eq!(q.parts.len(), 2);
        assert_eq!(q.parts[1].answer_text, "Start of proof\n\nEnd of proof");
        assert!(!q.parts[1].continues_next_page);
        assert_eq!(q.page_range, PageRange::span(3, 4));

        // the 4.2 stub on page 4 is gone, 4.3 survives
        assert_eq!(out.pages[1].questions.len(), 1);
        assert_eq!(out.pages[1].questions[0].question_id, "4.3");
    }

    #[test]
    fn undivided_questions_match_on_missing_part_id() {
        let pages = vec![
            page(1, vec![question("1.5", 1, vec![continuing(None, "x")])]),
            page(2, vec![question("1.5", 2, vec![continuation(None, "y")])]),
        ];
        let out = stitch_pages(&pages);
        assert_eq!(out.pages[0].questions[0].parts[0].answer_text, "x\n\ny");
        assert!(out.pages[1].questions.is_empty());
    }

    #[test]
    fn repeated_question_stem_is_not_duplicated() {
        let mut second = continuation(Some("a"), "rest");
        second.question_text = "Question a".into();
        let mut other = continuation(Some("b"), "rest");
        other.question_text = "Show also that g is onto.".into();

        let pages = vec![
            page(
                1,
                vec![question(
                    "2.1",
                    1,
                    vec![continuing(Some("a"), "begin"), continuing(Some("b"), "begin")],
                )],
            ),
            page(2, vec![question("2.1", 2, vec![second, other])]),
        ];

        let out = stitch_pages(&pages);
        let parts = &out.pages[0].questions[0].parts;
        assert_eq!(parts[0].question_text, "Question a");
        assert_eq!(parts[1].question_text, "Question b\n\nShow also that g is onto.");
    }

    #[test]
    fn figures_keep_page_order() {
        let mut first = continuing(None, "a");
        first.figures = vec![figure("fig-1")];
        let mut second = continuation(None, "b");
        second.figures = vec![figure("fig-2")];

        let pages = vec![
            page(5, vec![question("3.3", 5, vec![first])]),
            page(6, vec![question("3.3", 6, vec![second])]),
        ];
        let out = stitch_pages(&pages);
        let ids: Vec<&str> = out.pages[0].questions[0].parts[0]
            .figures
            .iter()
            .map(|f| f.figure_id.as_str())
            .collect();
        assert_eq!(ids, vec!["fig-1", "fig-2"]);
    }

    #[test]
    fn three_page_chain_collapses_into_first_page() {
        let mut middle = continuation(Some("c"), "middle");
        middle.continues_next_page = true;
        let pages = vec![
            page(1, vec![question("7.1", 1, vec![continuing(Some("c"), "start")])]),
            page(2, vec![question("7.1", 2, vec![middle])]),
            page(
                3,
                vec![
                    question("7.1", 3, vec![continuation(Some("c"), "end")]),
                    question("7.2", 3, vec![part(None, "other")]),
                ],
            ),
        ];

        let out = stitch_pages(&pages);

        assert_eq!(out.report.merged, 2);
        let q = &out.pages[0].questions[0];
        assert_eq!(q.parts[0].answer_text, "start\n\nmiddle\n\nend");
        assert!(!q.parts[0].continues_next_page);
        assert_eq!(q.page_range, PageRange::span(1, 3));
        assert!(out.pages[1].questions.is_empty());
        assert_eq!(out.pages[2].questions.len(), 1);
    }

    #[test]
    fn unmatched_continuation_is_kept() {
        let pages = vec![
            page(1, vec![question("1.1", 1, vec![continuing(Some("a"), "x")])]),
            page(2, vec![question("1.2", 2, vec![continuation(Some("a"), "y")])]),
        ];
        let out = stitch_pages(&pages);
        assert_eq!(out.report.merged, 0);
        assert_eq!(out.report.unmatched, 1);
        assert_eq!(out.pages, pages);
    }

    #[test]
    fn part_without_continuation_flag_is_not_consumed() {
        let pages = vec![
            page(1, vec![question("1.1", 1, vec![continuing(Some("a"), "x")])]),
            page(2, vec![question("1.1", 2, vec![part(Some("a"), "restated")])]),
        ];
        let out = stitch_pages(&pages);
        assert_eq!(out.report.unmatched, 1);
        assert_eq!(out.pages[1].questions[0].parts[0].answer_text, "restated");
    }

    #[test]
    fn first_of_several_candidates_wins() {
        let pages = vec![
            page(1, vec![question("1.1", 1, vec![continuing(Some("a"), "x")])]),
            page(
                2,
                vec![question(
                    "1.1",
                    2,
                    vec![continuation(Some("a"), "first"), continuation(Some("a"), "second")],
                )],
            ),
        ];
        let out = stitch_pages(&pages);
        assert_eq!(out.report.ambiguous, 1);
        assert_eq!(out.pages[0].questions[0].parts[0].answer_text, "x\n\nfirst");
        assert_eq!(out.pages[1].questions[0].parts.len(), 1);
        assert_eq!(out.pages[1].questions[0].parts[0].answer_text, "second");
    }

    #[test]
    fn gap_between_pages_blocks_merging() {
        let pages = vec![
            page(1, vec![question("1.1", 1, vec![continuing(None, "x")])]),
            page(3, vec![question("1.1", 3, vec![continuation(None, "y")])]),
        ];
        let out = stitch_pages(&pages);
        assert_eq!(out.report.merged, 0);
        assert_eq!(out.pages, pages);
    }

    #[test]
    fn stitching_is_idempotent() {
        let pages = vec![
            page(
                1,
                vec![
                    question("1.1", 1, vec![part(None, "solo")]),
                    question("1.2", 1, vec![continuing(Some("a"), "p1")]),
                ],
            ),
            page(
                2,
                vec![question(
                    "1.2",
                    2,
                    vec![continuation(Some("a"), "p2"), part(Some("b"), "b")],
                )],
            ),
            page(3, vec![question("1.3", 3, vec![continuing(None, "dangling")])]),
        ];

        let once = stitch_pages(&pages);
        let twice = stitch_pages(&once.pages);
        assert_eq!(twice.pages, once.pages);
        assert_eq!(twice.report.merged, 0);
    }

    #[test]
    fn input_is_left_untouched() {
        let pages = vec![
            page(1, vec![question("1.1", 1, vec![continuing(None, "x")])]),
            page(2, vec![question("1.1", 2, vec![continuation(None, "y")])]),
        ];
        let snapshot = pages.clone();
        let _ = stitch_pages(&pages);
        assert_eq!(pages, snapshot);
    }
}
