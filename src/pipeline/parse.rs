//! Response parsing: turn raw model text into typed JSON payloads.
//!
//! ## Why is cleanup necessary?
//!
//! Every prompt in [`crate::prompts`] asks for a bare JSON object, and most
//! of the time that is what comes back. The rest of the time the model:
//!
//! - wraps the object in a ` ```json ... ``` ` fence anyway,
//! - adds a sentence of commentary before or after it,
//! - emits a BOM or zero-width characters that `serde_json` rejects.
//!
//! The rules below fix those quirks deterministically. Anything still
//! unparsable after cleanup is reported as `None`; callers decide what "no
//! answer" means for them (empty page, no references, unresolved item).
//!
//! ## Rule Order
//!
//! Invisible characters go first so fence detection sees clean input; fences
//! are stripped before the brace scan so a fenced object with trailing prose
//! still resolves to the object itself.

use crate::model::{Figure, PageRange, PageResult, Question, QuestionPart};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

/// Clean a raw response and deserialize the JSON object it contains.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let cleaned = clean_response(raw);
    match serde_json::from_str::<T>(&cleaned) {
        Ok(v) => Some(v),
        Err(first_err) => {
            let object = extract_json_object(&cleaned)?;
            match serde_json::from_str::<T>(object) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!("Response is not valid JSON ({first_err}; {e})");
                    None
                }
            }
        }
    }
}

/// Apply the cleanup rules in order.
///
/// 1. Strip invisible Unicode (BOM, zero-width spaces, word joiners)
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip a ```json / ``` fence around the payload
pub fn clean_response(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = normalise_line_endings(&s);
    strip_code_fence(&s)
}

// ── Rule 1: Strip invisible characters ───────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .collect()
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip code fences ────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n(.*?)\n?```").unwrap());

fn strip_code_fence(input: &str) -> String {
    match RE_FENCED.captures(input) {
        Some(caps) => caps[1].trim().to_string(),
        None => input.trim().to_string(),
    }
}

// ── Fallback: first balanced JSON object ─────────────────────────────────────

/// Slice out the first balanced `{ … }` object, honouring string literals.
fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Page payload ─────────────────────────────────────────────────────────────

/// Accept `"2.2"`, `2.2`, `null`, `""` and `"null"` for an id field.
///
/// Models write numeric-looking ids as JSON numbers often enough that a
/// strict `String` would throw away whole pages.
pub(crate) fn lenient_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let id = match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Ok(None),
    };
    let id = id.trim();
    if id.is_empty() || id.eq_ignore_ascii_case("null") || id.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        Ok(Some(id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default, deserialize_with = "lenient_id")]
    question_id: Option<String>,
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    #[serde(default, deserialize_with = "lenient_id")]
    part_id: Option<String>,
    #[serde(default, alias = "question_latex")]
    question_text: String,
    #[serde(default, alias = "answer_latex")]
    answer_text: String,
    #[serde(default)]
    figures: Vec<RawFigure>,
    #[serde(default)]
    continues_next_page: bool,
    #[serde(default)]
    continued_from_previous: bool,
}

#[derive(Debug, Deserialize)]
struct RawFigure {
    #[serde(default)]
    figure_id: String,
    #[serde(default)]
    description: Option<String>,
}

/// Decode the page-extraction response for `page_number`.
///
/// Returns `None` when the response holds no usable JSON object. Every
/// question is stamped with a single-page range; the stitcher widens it.
pub fn parse_page(raw: &str, page_number: usize) -> Option<PageResult> {
    let page: RawPage = parse_json(raw)?;

    let questions = page
        .questions
        .into_iter()
        .map(|q| Question {
            question_id: q.question_id.unwrap_or_default(),
            parts: q.parts.into_iter().map(into_part).collect(),
            page_range: PageRange::single(page_number),
        })
        .collect();

    Some(PageResult {
        page_number,
        questions,
    })
}

fn into_part(p: RawPart) -> QuestionPart {
    QuestionPart {
        part_id: p.part_id.as_deref().and_then(normalise_part_id),
        question_text: p.question_text,
        answer_text: p.answer_text,
        figures: p
            .figures
            .into_iter()
            .filter(|f| !f.figure_id.is_empty())
            .map(|f| Figure {
                figure_id: f.figure_id,
                bbox: None,
                path: None,
                description: f.description,
            })
            .collect(),
        continues_next_page: p.continues_next_page,
        continued_from_previous: p.continued_from_previous,
    }
}

/// `"(b)"`, `" b "` and `"b"` are the same part; `""` means no part.
fn normalise_part_id(raw: &str) -> Option<String> {
    let id = raw
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_json_fence() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(clean_response(input), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_bare_fence() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(clean_response(input), "{\"a\": 1}");
    }

    #[test]
    fn test_no_fence_passthrough() {
        assert_eq!(clean_response("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_remove_invisible() {
        let v: Value = parse_json("\u{FEFF}{\"a\":\u{200B} 1}").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_object_inside_prose() {
        let raw = "Here is the analysis you asked for:\n{\"ok\": true, \"note\": \"a } brace\"}\nHope it helps.";
        let v: Value = parse_json(raw).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["note"], "a } brace");
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(parse_json::<Value>("I could not read this page.").is_none());
        assert!(parse_json::<Value>("{ unterminated").is_none());
    }

    #[test]
    fn test_parse_page_with_legacy_keys() {
        let raw = r#"```json
{"questions": [
  {"question_id": "2.18", "parts": [
    {"part_id": "(a)", "question_latex": "Show $x$", "answer_latex": "Done",
     "continues_next_page": true}
  ]},
  {"question_id": " 2.19 ", "parts": [
    {"part_id": "", "question_text": "Q", "answer_text": "A",
     "figures": [{"figure_id": "fig-3", "description": "graph"}]}
  ]}
]}
```"#;
        let page = parse_page(raw, 7).unwrap();
        assert_eq!(page.page_number, 7);
        assert_eq!(page.questions.len(), 2);

        let a = &page.questions[0].parts[0];
        assert_eq!(a.part_id.as_deref(), Some("a"));
        assert_eq!(a.question_text, "Show $x$");
        assert!(a.continues_next_page);
        assert!(!a.continued_from_previous);

        let q2 = &page.questions[1];
        assert_eq!(q2.question_id, "2.19");
        assert_eq!(q2.parts[0].part_id, None);
        assert_eq!(q2.parts[0].figures[0].figure_id, "fig-3");
        assert_eq!(q2.page_range, PageRange::single(7));
    }

    #[test]
    fn test_parse_page_without_questions_key() {
        let page = parse_page("{}", 2).unwrap();
        assert!(page.questions.is_empty());
    }

    #[test]
    fn test_parse_page_rejects_non_json() {
        assert!(parse_page("Sorry, the image is blank.", 1).is_none());
    }

    #[test]
    fn test_parse_page_numeric_ids() {
        let raw = r#"{"questions": [
            {"question_id": 2.18, "parts": [
                {"part_id": 1, "question_text": "Q1", "answer_text": "A1"}
            ]},
            {"question_id": "2.19", "parts": [
                {"part_id": "(b)", "question_text": "Q2", "answer_text": "A2"}
            ]}
        ]}"#;
        let page = parse_page(raw, 3).unwrap();
        assert_eq!(page.questions.len(), 2);
        assert_eq!(page.questions[0].question_id, "2.18");
        assert_eq!(page.questions[0].parts[0].part_id.as_deref(), Some("1"));
        assert_eq!(page.questions[1].question_id, "2.19");
        assert_eq!(page.questions[1].parts[0].part_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_parse_page_null_part_id() {
        let raw = r#"{"questions": [{"question_id": " 4 ", "parts": [
            {"part_id": "null", "question_text": "Q", "answer_text": "A"}
        ]}]}"#;
        let page = parse_page(raw, 1).unwrap();
        assert_eq!(page.questions[0].question_id, "4");
        assert_eq!(page.questions[0].parts[0].part_id, None);
    }
}
