use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{ErrorKind, MigrationError, Result, ResultExt};

pub const REPORT_FILENAME: &str = "migration-report.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Success {
        page: String,
        attachments: usize,
    },
    Failure {
        page: String,
        kind: ErrorKind,
        message: String,
    },
}

impl PageOutcome {
    pub fn failure(page: &str, error: &MigrationError) -> Self {
        Self::Failure {
            page: page.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageFailure {
    pub page: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Run-level accounting. Every recorded page bumps `total` and exactly one
/// of `success` / `failed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    lang: String,
    source_syntax: String,
    target_syntax: String,
    total: usize,
    success: usize,
    failed: usize,
    attachments: usize,
    migrated: Vec<String>,
    failures: Vec<PageFailure>,
    enumeration_error: Option<String>,
}

impl MigrationReport {
    pub fn new(lang: &str, source_syntax: &str, target_syntax: &str) -> Self {
        Self {
            lang: lang.to_string(),
            source_syntax: source_syntax.to_string(),
            target_syntax: target_syntax.to_string(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: PageOutcome) {
        self.total += 1;
        match outcome {
            PageOutcome::Success { page, attachments } => {
                self.success += 1;
                self.attachments += attachments;
                self.migrated.push(page);
            }
            PageOutcome::Failure {
                page,
                kind,
                message,
            } => {
                self.failed += 1;
                self.failures.push(PageFailure {
                    page,
                    kind,
                    message,
                });
            }
        }
    }

    pub fn record_enumeration_error(&mut self, error: &MigrationError) {
        self.enumeration_error = Some(error.to_string());
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn summary(&self) -> Summary {
        Summary {
            total: self.total,
            success: self.success,
            failed: self.failed,
        }
    }

    pub fn attachments(&self) -> usize {
        self.attachments
    }

    pub fn migrated(&self) -> &[String] {
        &self.migrated
    }

    pub fn failures(&self) -> &[PageFailure] {
        &self.failures
    }

    /// Human-readable summary block printed once at the end of a run.
    pub fn render_summary(&self) -> String {
        let mut lines = vec![
            "Migration complete.".to_string(),
            format!("Total pages: {}", self.total),
            format!("Successfully translated: {}", self.success),
            format!("Failed: {}", self.failed),
            format!("Attachments copied: {}", self.attachments),
        ];
        if let Some(error) = &self.enumeration_error {
            lines.push(format!("Enumeration failed: {error}"));
        }
        for failure in &self.failures {
            lines.push(format!(
                "  - {} ({}): {}",
                failure.page, failure.kind, failure.message
            ));
        }
        lines.join("\n")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .storage_context(|| "failed to serialize migration report")
    }

    /// Writes the JSON report into `dir`, creating it if needed.
    pub fn write_manifest(&self, dir: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::create_dir_all(dir).storage_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(REPORT_FILENAME);
        fs::write(&path, json).storage_context(|| format!("failed to write {}", path.display()))
    }
}
