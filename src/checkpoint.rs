//! Durable, atomically replaced snapshot of orchestrator progress.
//!
//! The orchestrator overwrites the checkpoint after every page, so a crash
//! loses at most the page that was in flight. Every write goes to a temp file
//! in the same directory and is then renamed over the real path; readers
//! therefore see either the previous snapshot or the new one, never a torn
//! file.
//!
//! The record is self-describing JSON so a user can inspect it by hand. A
//! hand-edited record that no longer satisfies its invariants is refused with
//! [`QaError::CheckpointCorrupt`] rather than repaired.

use crate::error::QaError;
use crate::model::{PageContext, PageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name used by [`CheckpointStore::in_dir`].
pub const CHECKPOINT_FILE_NAME: &str = ".checkpoint.json";

/// Cumulative state after `last_processed_page` pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Identity of the source document (absolute path or URL).
    #[serde(alias = "pdf_path")]
    pub source_path: String,
    pub total_pages: usize,
    pub last_processed_page: usize,
    pub timestamp: DateTime<Utc>,
    pub resolve_references: bool,
    pub previous_page_context: Option<PageContext>,
    #[serde(alias = "all_extractions")]
    pub all_page_results: Vec<PageResult>,
}

impl CheckpointRecord {
    /// Check the structural invariants of a record.
    ///
    /// `all_page_results` must hold exactly pages `1..=last_processed_page`,
    /// in order, and never more pages than the document has.
    pub fn validate(&self) -> Result<(), String> {
        if self.all_page_results.len() != self.last_processed_page {
            return Err(format!(
                "{} page results recorded but last_processed_page is {}",
                self.all_page_results.len(),
                self.last_processed_page
            ));
        }
        if self.last_processed_page > self.total_pages {
            return Err(format!(
                "last_processed_page {} exceeds total_pages {}",
                self.last_processed_page, self.total_pages
            ));
        }
        for (i, page) in self.all_page_results.iter().enumerate() {
            if page.page_number != i + 1 {
                return Err(format!(
                    "page result #{} has page_number {}",
                    i + 1,
                    page.page_number
                ));
            }
        }
        Ok(())
    }

    /// Number of questions extracted so far.
    pub fn question_count(&self) -> usize {
        self.all_page_results.iter().map(|p| p.questions.len()).sum()
    }
}

/// Reads and writes a single checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/.checkpoint.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CHECKPOINT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replace the checkpoint with `record`.
    pub fn save(&self, record: &CheckpointRecord) -> Result<(), QaError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| QaError::Internal(format!("checkpoint serialisation: {e}")))?;

        // Same directory as the target so the final rename never crosses
        // file systems.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!(
            "Checkpoint saved: page {}/{} → {}",
            record.last_processed_page,
            record.total_pages,
            self.path.display()
        );
        Ok(())
    }

    /// Load the checkpoint, or `Ok(None)` when there is none.
    pub fn load(&self) -> Result<Option<CheckpointRecord>, QaError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let record: CheckpointRecord =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))?;
        record.validate().map_err(|detail| self.corrupt(detail))?;
        Ok(Some(record))
    }

    /// Remove the checkpoint. A missing file is not an error.
    pub fn delete(&self) -> Result<(), QaError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Checkpoint removed: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Human-readable progress summary, or `None` when there is no checkpoint.
    pub fn summarize(&self) -> Result<Option<String>, QaError> {
        Ok(self.load()?.map(|record| summarize_record(&record)))
    }

    fn io_error(&self, source: std::io::Error) -> QaError {
        QaError::CheckpointIo {
            path: self.path.clone(),
            source,
        }
    }

    fn corrupt(&self, detail: String) -> QaError {
        QaError::CheckpointCorrupt {
            path: self.path.clone(),
            detail,
        }
    }
}

fn summarize_record(record: &CheckpointRecord) -> String {
    let pct = if record.total_pages == 0 {
        0.0
    } else {
        record.last_processed_page as f64 / record.total_pages as f64 * 100.0
    };
    let name = Path::new(&record.source_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.source_path.clone());

    format!(
        "Found checkpoint from {}\n  PDF: {}\n  Progress: {}/{} pages ({:.1}%)\n  Extracted questions: {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        name,
        record.last_processed_page,
        record.total_pages,
        pct,
        record.question_count()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn record(done: usize, total: usize) -> CheckpointRecord {
        let pages: Vec<PageResult> = (1..=done)
            .map(|n| {
                page(
                    n,
                    vec![question(&format!("1.{n}"), n, vec![part(Some("a"), "ans")])],
                )
            })
            .collect();
        CheckpointRecord {
            source_path: "/docs/algebra.pdf".into(),
            total_pages: total,
            last_processed_page: done,
            timestamp: Utc::now(),
            resolve_references: true,
            previous_page_context: pages.last().and_then(PageContext::from_page),
            all_page_results: pages,
        }
    }

    #[test]
    fn load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        assert!(!store.exists());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.summarize().unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        let rec = record(3, 10);

        assert_ok!(store.save(&rec));
        assert!(store.exists());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(loaded.all_page_results.len(), loaded.last_processed_page);
    }

    #[test]
    fn save_replaces_previous_snapshot_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        store.save(&record(1, 4)).unwrap();
        store.save(&record(2, 4)).unwrap();

        assert_eq!(store.load().unwrap().unwrap().last_processed_page, 2);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp files must not be left behind");
    }

    #[test]
    fn save_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path().join("nested/out"));
        assert_ok!(store.save(&record(1, 2)));
        assert!(store.exists());
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        let mut rec = record(2, 5);
        rec.last_processed_page = 3;
        std::fs::write(store.path(), serde_json::to_vec(&rec).unwrap()).unwrap();

        let err = assert_err!(store.load());
        assert!(matches!(err, QaError::CheckpointCorrupt { .. }), "got: {err}");
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        std::fs::write(store.path(), b"{\"source_path\": ").unwrap();
        assert!(matches!(
            store.load(),
            Err(QaError::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn out_of_order_pages_fail_validation() {
        let mut rec = record(2, 5);
        rec.all_page_results.swap(0, 1);
        assert!(rec.validate().is_err());
    }

    #[test]
    fn accepts_legacy_field_names() {
        let json = r#"{
            "pdf_path": "/docs/old.pdf",
            "total_pages": 2,
            "last_processed_page": 1,
            "timestamp": "2025-01-02T03:04:05Z",
            "resolve_references": false,
            "previous_page_context": null,
            "all_extractions": [{"page_number": 1, "questions": []}]
        }"#;
        let rec: CheckpointRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.source_path, "/docs/old.pdf");
        assert_ok!(rec.validate());
    }

    #[test]
    fn summary_reports_progress() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        store.save(&record(2, 8)).unwrap();

        let summary = store.summarize().unwrap().unwrap();
        assert!(summary.contains("algebra.pdf"), "got: {summary}");
        assert!(summary.contains("2/8 pages (25.0%)"), "got: {summary}");
        assert!(summary.contains("Extracted questions: 2"), "got: {summary}");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(dir.path());
        store.save(&record(1, 1)).unwrap();
        assert_ok!(store.delete());
        assert!(!store.exists());
        assert_ok!(store.delete());
    }
}
