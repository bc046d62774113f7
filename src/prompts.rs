//! Prompts for page extraction and cross-reference resolution.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the JSON shapes requested here are the
//!    shapes [`crate::pipeline::parse`] and [`crate::resolve`] decode, so a
//!    schema change touches exactly one prompt and one decoder.
//!
//! 2. **Testability** — unit tests can build and inspect prompts directly
//!    without a model, which makes prompt regressions (a dropped field, a
//!    missing context block) easy to catch.
//!
//! Callers can override the page prompt via
//! [`crate::config::ExtractionConfig::extraction_prompt`]; the resolver
//! prompts are fixed because their JSON is part of the library contract.

use crate::model::{Item, PageContext};
use crate::resolve::DetectedReference;

/// Default prompt for reading one page image into question/answer JSON.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are reading one page of a scanned exercise book with worked solutions.
Extract every question and its answer from the page image.

Follow these rules precisely:

1. IDENTIFIERS
   - question_id is the label printed in the document (e.g. "2.18")
   - part_id is the sub-part letter without parentheses ("a", "b"), or null
     when the question has no sub-parts

2. CONTENT
   - Transcribe the question into question_text and its solution into answer_text
   - Write mathematics in LaTeX ($inline$, \[display\])
   - Preserve the full text; do not summarise or fix the mathematics

3. PAGE BREAKS
   - continues_next_page: true if the part is cut off at the bottom of this page
   - continued_from_previous: true if the page starts in the middle of a part
     that began on the previous page; repeat its question_id and part_id

4. FIGURES
   - List diagrams used by a part as {"figure_id": "...", "description": "..."}

5. OUTPUT FORMAT
   Return ONLY a JSON object, no commentary and no code fence:
   {
     "questions": [
       {
         "question_id": "2.18",
         "parts": [
           {
             "part_id": "a",
             "question_text": "...",
             "answer_text": "...",
             "figures": [],
             "continues_next_page": false,
             "continued_from_previous": false
           }
         ]
       }
     ]
   }
   If the page holds no questions, return {"questions": []}"#;

/// Context block placed before the page prompt when the previous page
/// produced questions.
pub fn previous_page_context(ctx: &PageContext) -> String {
    format!(
        "## Context from the previous page\n\n\
The previous page contained: {summary}\n\
The last item on it was {last_full}.\n\n\
If this page starts with sub-parts such as (b) or (c) without a question \
number, they belong to question {last_q} from the previous page. Use \
question_id \"{last_q}\" for them, not a question number that appears later \
on this page.\n\n---\n\n",
        summary = if ctx.questions_summary.is_empty() {
            "(no labelled parts)"
        } else {
            &ctx.questions_summary
        },
        last_full = ctx.last_full_id,
        last_q = ctx.last_question_id,
    )
}

/// Full prompt for one page: optional context block, then the page rules.
pub fn extraction_prompt(template: &str, previous: Option<&PageContext>) -> String {
    match previous {
        Some(ctx) => format!("{}{}", previous_page_context(ctx), template),
        None => template.to_string(),
    }
}

/// Detect phase: list every external dependency of one item.
pub fn detection_prompt(item: &Item) -> String {
    format!(
        r#"Decide whether the following question/answer pair depends on content outside itself.

## Item {id}

Question:
{question}

Answer:
{answer}

## What counts as a reference

- a numbered theorem, lemma, corollary, proposition, definition, remark or example
- another exercise or question ("as in 2.7", "by problem 3.4")
- a numbered equation, section, chapter or page
- implicit phrases such as "as shown earlier", "by the previous result", "using the above"

For each reference say whether it is essential, meaning a reader cannot
follow the item without it.

## Output

Return ONLY a JSON object:
{{
  "has_references": true,
  "references": [
    {{
      "reference_text": "exact phrase from the item",
      "reference_type": "theorem|lemma|definition|remark|example|question|equation|section|implicit|other",
      "reference_id": "2.2 or null when no id is given",
      "is_essential": true,
      "context_needed": "what the reader needs from the referenced content"
    }}
  ],
  "is_self_contained": false
}}
With no references return {{"has_references": false, "references": [], "is_self_contained": true}}"#,
        id = item.id,
        question = item.question_text,
        answer = item.answer_text,
    )
}

fn reference_block(reference: &DetectedReference) -> String {
    format!(
        "- Reference: {}\n- Type: {}\n- Needed: {}",
        reference.reference_text, reference.reference_type, reference.context_needed
    )
}

/// Resolve phase, source available: inline the needed fragment of `source`.
pub fn resolve_with_source_prompt(
    item: &Item,
    reference: &DetectedReference,
    source: &Item,
) -> String {
    format!(
        r#"Rewrite a question/answer pair so it can be understood on its own.

## Item {id}

Question:
{question}

Answer:
{answer}

## Reference to remove

{reference}

## Referenced item {source_id}

Question:
{source_question}

Answer:
{source_answer}

## Instructions

1. Take ONLY the fragment of item {source_id} that the reader needs.
2. Rewrite the question of item {id} so it states that fragment itself.
3. Keep all LaTeX notation intact.
4. Leave the answer unchanged unless a change is unavoidable.

Return ONLY a JSON object:
{{
  "relevant_context": "the fragment you used",
  "rewritten_question": "...",
  "rewritten_answer": "...",
  "answer_was_modified": false
}}"#,
        id = item.id,
        question = item.question_text,
        answer = item.answer_text,
        reference = reference_block(reference),
        source_id = source.id,
        source_question = source.question_text,
        source_answer = source.answer_text,
    )
}

/// Resolve phase, source unavailable: infer the missing content or say so.
pub fn resolve_without_source_prompt(item: &Item, reference: &DetectedReference) -> String {
    format!(
        r#"Rewrite a question/answer pair so it can be understood on its own.
The content it refers to is NOT available to you.

## Item {id}

Question:
{question}

Answer:
{answer}

## Reference to remove

{reference}

## Instructions

1. Infer what the reference most plausibly states from the item itself.
2. Rewrite the question to state that content, or rephrase it so the
   dependency disappears while the meaning is preserved.
3. If you cannot infer the content with reasonable confidence, set
   "could_infer" to false and leave the texts unchanged.
4. Leave the answer unchanged unless a change is unavoidable.

Return ONLY a JSON object:
{{
  "could_infer": true,
  "inferred_context": "what the reference most likely says, or null",
  "rewritten_question": "...",
  "rewritten_answer": "...",
  "answer_was_modified": false,
  "confidence": "high|medium|low"
}}"#,
        id = item.id,
        question = item.question_text,
        answer = item.answer_text,
        reference = reference_block(reference),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::item;

    fn ctx() -> PageContext {
        PageContext {
            questions_summary: "2.17, 2.18a".into(),
            last_question_id: "2.18".into(),
            last_full_id: "2.18a".into(),
        }
    }

    fn reference() -> DetectedReference {
        DetectedReference {
            reference_text: "by Remark 2.2".into(),
            reference_type: "remark".into(),
            reference_id: Some("2.2".into()),
            is_essential: true,
            context_needed: "the bound from 2.2".into(),
        }
    }

    #[test]
    fn first_page_prompt_has_no_context() {
        let p = extraction_prompt(DEFAULT_EXTRACTION_PROMPT, None);
        assert_eq!(p, DEFAULT_EXTRACTION_PROMPT);
    }

    #[test]
    fn context_block_precedes_rules() {
        let p = extraction_prompt(DEFAULT_EXTRACTION_PROMPT, Some(&ctx()));
        assert!(p.starts_with("## Context from the previous page"));
        assert!(p.contains("2.17, 2.18a"));
        assert!(p.contains("question_id \"2.18\""));
        assert!(p.ends_with(DEFAULT_EXTRACTION_PROMPT));
    }

    #[test]
    fn extraction_prompt_requests_continuation_flags() {
        assert!(DEFAULT_EXTRACTION_PROMPT.contains("continues_next_page"));
        assert!(DEFAULT_EXTRACTION_PROMPT.contains("continued_from_previous"));
    }

    #[test]
    fn detection_prompt_embeds_item() {
        let p = detection_prompt(&item("2.5", "Using 2.3, show $f$ is onto.", "Trivial."));
        assert!(p.contains("## Item 2.5"));
        assert!(p.contains("Using 2.3"));
        assert!(p.contains("\"is_self_contained\""));
    }

    #[test]
    fn with_source_prompt_embeds_both_items() {
        let p = resolve_with_source_prompt(
            &item("2.5", "Q5", "A5"),
            &reference(),
            &item("2.2", "Q2", "A2"),
        );
        assert!(p.contains("Q5") && p.contains("A5"));
        assert!(p.contains("## Referenced item 2.2"));
        assert!(p.contains("Q2") && p.contains("A2"));
        assert!(p.contains("Leave the answer unchanged"));
    }

    #[test]
    fn without_source_prompt_allows_refusal() {
        let p = resolve_without_source_prompt(&item("2.5", "Q5", "A5"), &reference());
        assert!(p.contains("\"could_infer\""));
        assert!(p.contains("by Remark 2.2"));
    }
}
