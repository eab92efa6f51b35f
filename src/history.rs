//! Run history: one record per finished deletion, kept in a JSON file

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GmailError, Result};
use crate::models::{DeletionReport, PreviewResult};
use crate::workflow::DeletionOutcome;

/// Default location of the history file, relative to the working directory
pub const DEFAULT_HISTORY_PATH: &str = ".gmail-bulk-delete/history.json";

/// Oldest records are dropped past this many
pub const MAX_RECORDS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub query: String,
    /// Matches reported by the preview the user confirmed
    pub match_count: usize,
    pub outcome: Option<RunOutcome>,
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// Start a record for the deletion of a confirmed preview
    pub fn start(preview: &PreviewResult) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            query: preview.query.to_string(),
            match_count: preview.match_count,
            outcome: None,
            requested: 0,
            deleted: 0,
            failed: 0,
            error: None,
        }
    }

    pub fn finish(&mut self, outcome: &DeletionOutcome) {
        let (kind, error) = match outcome {
            DeletionOutcome::Completed(_) => (RunOutcome::Completed, None),
            DeletionOutcome::Cancelled(_) => (RunOutcome::Cancelled, None),
            DeletionOutcome::Failed { error, .. } => (RunOutcome::Failed, Some(error.to_string())),
        };
        self.apply_report(outcome.report());
        self.outcome = Some(kind);
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    fn apply_report(&mut self, report: &DeletionReport) {
        self.requested = report.requested;
        self.deleted = report.deleted;
        self.failed = report.failed;
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub records: Vec<RunRecord>,
}

impl History {
    /// Load history from disk; a missing file is an empty history
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No history file at {:?}", path);
            return Ok(Self::default());
        }

        let json = tokio::fs::read_to_string(path).await?;
        let history: Self = serde_json::from_str(&json).map_err(|e| {
            GmailError::StateError(format!("Corrupt history file {:?}: {}", path, e))
        })?;

        tracing::debug!("Loaded {} run records from {:?}", history.records.len(), path);
        Ok(history)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        tracing::debug!("Saved run history to {:?}", path);
        Ok(())
    }

    pub fn push(&mut self, record: RunRecord) {
        self.records.push(record);
        if self.records.len() > MAX_RECORDS {
            let excess = self.records.len() - MAX_RECORDS;
            self.records.drain(..excess);
        }
    }

    /// Load, add `record`, and write back
    pub async fn append(path: &Path, record: RunRecord) -> Result<()> {
        let mut history = Self::load(path).await?;
        tracing::info!(
            "Recording run {} ({:?}, {} deleted)",
            record.run_id,
            record.outcome,
            record.deleted
        );
        history.push(record);
        history.save(path).await
    }

    /// Most recent records first
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().rev().take(limit)
    }

    pub fn total_deleted(&self) -> usize {
        self.records.iter().map(|r| r.deleted).sum()
    }
}
