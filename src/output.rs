//! Run results: the final item list, per-item resolution records and stats.
//!
//! [`ExtractionOutput`] is what [`crate::extract::extract_document`] returns.
//! Its [`ExtractionOutput::document`] view is the on-disk shape of
//! `extracted_qas.json`; [`write_json_atomic`] is how every artifact reaches
//! disk.

use crate::audit::AuditReport;
use crate::error::{PageError, QaError};
use crate::model::Item;
use crate::resolve::ResolutionResult;
use crate::stitch::StitchReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `metadata` block of `extracted_qas.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Source path or URL.
    pub source: String,
    pub extraction_date: DateTime<Utc>,
    pub total_questions: usize,
    pub total_pages: usize,
    pub model_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    /// Pages read by the model in this run.
    pub processed_pages: usize,
    /// Pages restored from a checkpoint.
    pub resumed_pages: usize,
    /// Pages recorded empty after a failed model call.
    pub failed_pages: Vec<PageError>,
    pub total_items: usize,
    pub stitch: StitchReport,
    /// Items whose detect pass reported at least one reference.
    pub items_with_references: usize,
    /// Items rewritten by the resolver.
    pub references_resolved: usize,
    /// Items flagged `could_not_resolve`.
    pub references_unresolved: usize,
    /// Reference-like phrases still present in the final text.
    pub remaining_references: usize,
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub extraction_duration_ms: u64,
    pub resolution_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    /// Fill the resolver counters from its per-item results.
    pub fn record_resolutions(&mut self, results: &[ResolutionResult]) {
        self.items_with_references = results.iter().filter(|r| r.had_references).count();
        self.references_resolved = results
            .iter()
            .filter(|r| r.had_references && !r.could_not_resolve && r.changed())
            .count();
        self.references_unresolved = results.iter().filter(|r| r.could_not_resolve).count();
    }
}

/// Everything one extraction run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub metadata: ExtractionMetadata,
    /// Final items in canonical order.
    pub items: Vec<Item>,
    /// One record per item, in pre-sort document order. Empty when
    /// resolution was disabled.
    pub resolutions: Vec<ResolutionResult>,
    /// Whether the resolver ran.
    pub resolution_ran: bool,
    pub audit: AuditReport,
    pub stats: ExtractionStats,
}

/// On-disk shape of `extracted_qas.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaDocument {
    pub metadata: ExtractionMetadata,
    pub questions: Vec<Item>,
}

impl ExtractionOutput {
    pub fn document(&self) -> QaDocument {
        QaDocument {
            metadata: self.metadata.clone(),
            questions: self.items.clone(),
        }
    }
}

/// Serialise `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), QaError> {
    let write_err = |source: std::io::Error| QaError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| QaError::Internal(format!("serialising {}: {e}", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!("Wrote {} ({} bytes)", path.display(), json.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::item;
    use tempfile::TempDir;

    fn metadata() -> ExtractionMetadata {
        ExtractionMetadata {
            source: "/books/a.pdf".into(),
            extraction_date: Utc::now(),
            total_questions: 1,
            total_pages: 3,
            model_used: "openai/gpt-4.1".into(),
            document_title: None,
        }
    }

    #[test]
    fn document_has_metadata_and_questions_keys() {
        let doc = QaDocument {
            metadata: metadata(),
            questions: vec![item("1.1", "q", "a")],
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["metadata"]["total_pages"], 3);
        assert_eq!(v["questions"][0]["id"], "1.1");
        assert_eq!(v["questions"][0]["page_range"], serde_json::json!([1, 1]));
        assert!(v["metadata"].get("document_title").is_none());
    }

    #[test]
    fn atomic_write_creates_dirs_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/extracted_qas.json");

        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["v"], 2);
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn resolution_counters() {
        let a = item("1.1", "q", "a");
        let rewritten = ResolutionResult {
            original: a.clone(),
            resolved: a.with_rewrite("q2".into(), "a".into()),
            had_references: true,
            references_found: vec!["by 1.0".into()],
            context_inlined: Some("c".into()),
            answer_changed: false,
            could_not_resolve: false,
        };
        let failed = ResolutionResult {
            resolved: a.clone(),
            could_not_resolve: true,
            ..rewritten.clone()
        };
        let mut stats = ExtractionStats::default();
        stats.record_resolutions(&[rewritten, failed]);
        assert_eq!(stats.items_with_references, 2);
        assert_eq!(stats.references_resolved, 1);
        assert_eq!(stats.references_unresolved, 1);
    }
}
