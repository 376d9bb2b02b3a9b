//! Run summary construction and persistence (`run_summary.json`)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::consolidate::ConsolidationReport;
use crate::error::{InvoiceError, Result};
use crate::models::{Provider, ProviderRunResult};
use crate::window::DateWindow;

pub const SUMMARY_FILE_NAME: &str = "run_summary.json";

/// Outcome of one orchestration run. Built once, written once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    window: DateWindow,
    providers_attempted: BTreeSet<Provider>,
    providers_succeeded: BTreeSet<Provider>,
    total_files_before_dedup: usize,
    total_files_after_dedup: usize,
    duplicates_removed: usize,
    errors: BTreeMap<Provider, String>,
}

impl RunSummary {
    pub fn build(
        window: DateWindow,
        results: &[ProviderRunResult],
        consolidation: &ConsolidationReport,
    ) -> Self {
        let providers_attempted = results.iter().map(|r| r.provider()).collect();
        let providers_succeeded = results
            .iter()
            .filter(|r| r.is_ok())
            .map(|r| r.provider())
            .collect();
        let errors = results
            .iter()
            .filter_map(|r| r.error().map(|e| (r.provider(), e.to_string())))
            .collect();

        Self {
            window,
            providers_attempted,
            providers_succeeded,
            total_files_before_dedup: consolidation.total_before,
            total_files_after_dedup: consolidation.total_after(),
            duplicates_removed: consolidation.duplicates_removed,
            errors,
        }
    }

    pub fn window(&self) -> &DateWindow {
        &self.window
    }

    pub fn providers_attempted(&self) -> &BTreeSet<Provider> {
        &self.providers_attempted
    }

    pub fn providers_succeeded(&self) -> &BTreeSet<Provider> {
        &self.providers_succeeded
    }

    pub fn total_files_before_dedup(&self) -> usize {
        self.total_files_before_dedup
    }

    pub fn total_files_after_dedup(&self) -> usize {
        self.total_files_after_dedup
    }

    pub fn duplicates_removed(&self) -> usize {
        self.duplicates_removed
    }

    pub fn errors(&self) -> &BTreeMap<Provider, String> {
        &self.errors
    }

    pub fn all_failed(&self) -> bool {
        self.providers_succeeded.is_empty()
    }

    /// Write `run_summary.json` into `dir`.
    ///
    /// The file is written under a temporary name and renamed into place, so
    /// readers never see a partial summary.
    pub async fn write(&self, dir: &Path) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| InvoiceError::SummaryWriteError(format!("serialize: {}", e)))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| InvoiceError::SummaryWriteError(format!("{:?}: {}", dir, e)))?;

        let target = dir.join(SUMMARY_FILE_NAME);
        let tmp = dir.join(format!(".{}.{}.tmp", SUMMARY_FILE_NAME, uuid::Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&tmp, json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(InvoiceError::SummaryWriteError(format!("{:?}: {}", tmp, e)));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(InvoiceError::SummaryWriteError(format!("{:?}: {}", target, e)));
        }

        tracing::info!("Wrote run summary to {:?}", target);
        Ok(target)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let summary: Self = serde_json::from_str(&json)?;
        tracing::debug!("Loaded run summary for {}", summary.window);
        Ok(summary)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<Provider>| {
            set.iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        writeln!(f, "========================================")?;
        writeln!(f, "Monthly Invoice Run Summary")?;
        writeln!(f, "========================================")?;
        writeln!(f, "Window: {}", self.window)?;
        writeln!(f, "Providers attempted: {}", join(&self.providers_attempted))?;
        writeln!(f, "Providers succeeded: {}", join(&self.providers_succeeded))?;
        writeln!(f, "Files before dedup: {}", self.total_files_before_dedup)?;
        writeln!(f, "Duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "Files consolidated: {}", self.total_files_after_dedup)?;
        let skipped = self
            .total_files_before_dedup
            .saturating_sub(self.total_files_after_dedup + self.duplicates_removed);
        if skipped > 0 {
            writeln!(f, "Files skipped (unreadable or not copied): {}", skipped)?;
        }
        for (provider, message) in &self.errors {
            writeln!(f, "Error [{}]: {}", provider, message)?;
        }
        write!(f, "========================================")
    }
}
