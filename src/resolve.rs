//! Cross-reference resolution: make every item readable on its own.
//!
//! Items in an exercise book lean on each other ("by Remark 2.2", "as in
//! 3.4(a)"). Each item goes through two model passes:
//!
//! 1. **Detect** — list the references and mark the essential ones.
//! 2. **Resolve** — for the first essential reference, rewrite the item with
//!    the needed fragment inlined. If the referenced item is in this
//!    document its full text goes into the prompt; otherwise the model is
//!    asked to infer the content or to say it cannot.
//!
//! Resolution fails open: a malformed response or a refusal leaves the item
//! unchanged and flags it `could_not_resolve`. Only transport errors from the
//! model (auth, exhausted retries) abort the pass.
//!
//! Items are processed in document order and each result is written back to
//! the id table at once, so a later item that references an earlier one sees
//! the earlier item's resolved text.

use crate::error::QaError;
use crate::model::Item;
use crate::pipeline::llm::TextModel;
use crate::pipeline::parse::{lenient_id, parse_json};
use crate::progress::{ExtractionProgressCallback, NoopProgressCallback};
use crate::prompts::{detection_prompt, resolve_with_source_prompt, resolve_without_source_prompt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One dependency of an item on outside content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedReference {
    #[serde(default)]
    pub reference_text: String,
    #[serde(default)]
    pub reference_type: String,
    /// Id of the referenced item when the text names one (`"2.2"`).
    #[serde(default, deserialize_with = "lenient_id")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub is_essential: bool,
    #[serde(default)]
    pub context_needed: String,
}

/// Outcome of the detect phase for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub has_references: bool,
    #[serde(default)]
    pub references: Vec<DetectedReference>,
    /// Missing means self-contained: an unsure model leaves the item alone.
    #[serde(default = "default_true")]
    pub is_self_contained: bool,
}

impl Detection {
    /// No references; also what an unreadable detect response means.
    pub fn none() -> Self {
        Self {
            has_references: false,
            references: Vec::new(),
            is_self_contained: true,
        }
    }

    fn reference_texts(&self) -> Vec<String> {
        self.references
            .iter()
            .map(|r| r.reference_text.clone())
            .collect()
    }
}

/// A usable resolve-phase answer from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutput {
    /// `false` when the model reported it could not infer the content.
    pub could_infer: bool,
    /// Fragment inlined into the item (quoted or inferred).
    pub context: Option<String>,
    pub rewritten_question: String,
    pub rewritten_answer: String,
}

/// Per-item record of what the resolver did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub original: Item,
    pub resolved: Item,
    pub had_references: bool,
    #[serde(default)]
    pub references_found: Vec<String>,
    #[serde(default)]
    pub context_inlined: Option<String>,
    #[serde(default)]
    pub answer_changed: bool,
    #[serde(default)]
    pub could_not_resolve: bool,
}

impl ResolutionResult {
    fn unchanged(item: &Item, had_references: bool, references_found: Vec<String>) -> Self {
        Self {
            original: item.clone(),
            resolved: item.clone(),
            had_references,
            references_found,
            context_inlined: None,
            answer_changed: false,
            could_not_resolve: false,
        }
    }

    fn unresolved(item: &Item, references_found: Vec<String>) -> Self {
        Self {
            could_not_resolve: true,
            ..Self::unchanged(item, true, references_found)
        }
    }

    /// Whether the item text was rewritten.
    pub fn changed(&self) -> bool {
        self.resolved.question_text != self.original.question_text
            || self.resolved.answer_text != self.original.answer_text
    }
}

// Both resolve prompts share one decoder: the with-source reply names its
// fragment `relevant_context` and has no `could_infer`. A without-source
// reply that omits `could_infer` counts as a refusal.
#[derive(Debug, Deserialize)]
struct RawResolution {
    #[serde(default)]
    could_infer: Option<bool>,
    #[serde(default, alias = "inferred_context")]
    relevant_context: Option<String>,
    #[serde(default)]
    rewritten_question: Option<String>,
    #[serde(default)]
    rewritten_answer: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Detect/resolve driver over a [`TextModel`].
pub struct ReferenceResolver<'a> {
    model: &'a dyn TextModel,
    progress: Option<&'a dyn ExtractionProgressCallback>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(model: &'a dyn TextModel) -> Self {
        Self {
            model,
            progress: None,
        }
    }

    /// Report each resolved item to `callback`.
    pub fn with_progress(mut self, callback: &'a dyn ExtractionProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Detect phase. An unreadable response counts as "no references".
    pub async fn detect(&self, item: &Item) -> Result<Detection, QaError> {
        let raw = self.model.complete(&detection_prompt(item)).await?;
        match parse_json::<Detection>(&raw) {
            Some(detection) => Ok(detection),
            None => {
                warn!("{}: detection response is not valid JSON, assuming no references", item.id);
                Ok(Detection::none())
            }
        }
    }

    /// Resolve phase with the referenced item at hand.
    ///
    /// `None` when the response is unreadable or has no rewritten question.
    pub async fn resolve_with_source(
        &self,
        item: &Item,
        reference: &DetectedReference,
        source: &Item,
    ) -> Result<Option<ResolutionOutput>, QaError> {
        let raw = self
            .model
            .complete(&resolve_with_source_prompt(item, reference, source))
            .await?;
        Ok(decode_resolution(&raw, item, true))
    }

    /// Resolve phase without the referenced item: infer or decline.
    pub async fn resolve_without_source(
        &self,
        item: &Item,
        reference: &DetectedReference,
    ) -> Result<Option<ResolutionOutput>, QaError> {
        let raw = self
            .model
            .complete(&resolve_without_source_prompt(item, reference))
            .await?;
        Ok(decode_resolution(&raw, item, false))
    }

    /// Resolve the first essential reference of `item` against `table`.
    pub async fn resolve(
        &self,
        item: &Item,
        detection: &Detection,
        table: &HashMap<String, Item>,
    ) -> Result<ResolutionResult, QaError> {
        let found = detection.reference_texts();

        if !detection.has_references || detection.is_self_contained {
            return Ok(ResolutionResult::unchanged(
                item,
                detection.has_references,
                found,
            ));
        }

        let Some(reference) = detection.references.iter().find(|r| r.is_essential) else {
            return Ok(ResolutionResult::unchanged(item, true, found));
        };

        let source = reference
            .reference_id
            .as_deref()
            .and_then(|id| table.get(id))
            .filter(|source| source.id != item.id);

        let output = match source {
            Some(source) => {
                debug!("{}: inlining from {}", item.id, source.id);
                self.resolve_with_source(item, reference, source).await?
            }
            None => {
                debug!("{}: inferring '{}'", item.id, reference.reference_text);
                self.resolve_without_source(item, reference).await?
            }
        };

        let output = match output {
            Some(o) if o.could_infer => o,
            Some(_) => {
                info!("{}: model could not infer '{}'", item.id, reference.reference_text);
                return Ok(ResolutionResult::unresolved(item, found));
            }
            None => {
                warn!("{}: resolution response is not valid JSON", item.id);
                return Ok(ResolutionResult::unresolved(item, found));
            }
        };

        let answer_changed = output.rewritten_answer != item.answer_text;
        Ok(ResolutionResult {
            original: item.clone(),
            resolved: item.with_rewrite(output.rewritten_question, output.rewritten_answer),
            had_references: true,
            references_found: found,
            context_inlined: output.context,
            answer_changed,
            could_not_resolve: false,
        })
    }

    /// Detect and resolve every item in order.
    ///
    /// Returns the resolved items and one [`ResolutionResult`] per item, both
    /// in input order.
    pub async fn resolve_all(
        &self,
        items: Vec<Item>,
    ) -> Result<(Vec<Item>, Vec<ResolutionResult>), QaError> {
        let total = items.len();
        let noop = NoopProgressCallback;
        let progress: &dyn ExtractionProgressCallback = match self.progress {
            Some(p) => p,
            None => &noop,
        };
        progress.on_resolution_start(total);

        let mut table: HashMap<String, Item> = items
            .iter()
            .map(|item| (item.id.clone(), item.clone()))
            .collect();
        let mut resolved = Vec::with_capacity(total);
        let mut results = Vec::with_capacity(total);

        for (i, item) in items.iter().enumerate() {
            let detection = self.detect(item).await?;
            let result = self.resolve(item, &detection, &table).await?;

            info!(
                "Resolved {} ({}/{}): {} references{}",
                item.id,
                i + 1,
                total,
                result.references_found.len(),
                if result.could_not_resolve {
                    ", unresolved"
                } else if result.changed() {
                    ", rewritten"
                } else {
                    ""
                }
            );
            progress.on_item_resolved(i + 1, total, &item.id, result.changed());

            table.insert(item.id.clone(), result.resolved.clone());
            resolved.push(result.resolved.clone());
            results.push(result);
        }

        Ok((resolved, results))
    }
}

fn decode_resolution(raw: &str, item: &Item, with_source: bool) -> Option<ResolutionOutput> {
    let parsed: RawResolution = parse_json(raw)?;
    let could_infer = with_source || parsed.could_infer.unwrap_or(false);
    if !could_infer {
        return Some(ResolutionOutput {
            could_infer: false,
            context: None,
            rewritten_question: item.question_text.clone(),
            rewritten_answer: item.answer_text.clone(),
        });
    }

    let rewritten_question = parsed.rewritten_question.filter(|q| !q.trim().is_empty())?;
    Some(ResolutionOutput {
        could_infer: true,
        context: parsed.relevant_context.filter(|c| !c.trim().is_empty()),
        rewritten_question,
        rewritten_answer: parsed
            .rewritten_answer
            .unwrap_or_else(|| item.answer_text.clone()),
    })
}

/// Results worth keeping in the tracking artifact: items that had references.
pub fn tracking_record(results: &[ResolutionResult]) -> Vec<ResolutionResult> {
    results.iter().filter(|r| r.had_references).cloned().collect()
}
