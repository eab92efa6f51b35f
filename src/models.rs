use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GmailError;

/// Gmail's own inbox categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Promotions,
    Social,
    Updates,
    Forums,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Promotions,
        Category::Social,
        Category::Updates,
        Category::Forums,
    ];

    /// Token used after `category:` in a Gmail search
    pub fn search_token(&self) -> &'static str {
        match self {
            Category::Promotions => "promotions",
            Category::Social => "social",
            Category::Updates => "updates",
            Category::Forums => "forums",
        }
    }
}

impl FromStr for Category {
    type Err = GmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "promotions" => Ok(Category::Promotions),
            "social" => Ok(Category::Social),
            "updates" => Ok(Category::Updates),
            "forums" => Ok(Category::Forums),
            other => Err(GmailError::InvalidFilter(format!(
                "unknown category '{}'; expected promotions, social, updates or forums",
                other
            ))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.search_token())
    }
}

/// Age threshold for `older_than:`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgeThreshold {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
}

impl AgeThreshold {
    pub const ALL: [AgeThreshold; 5] = [
        AgeThreshold::OneMonth,
        AgeThreshold::ThreeMonths,
        AgeThreshold::SixMonths,
        AgeThreshold::OneYear,
        AgeThreshold::TwoYears,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            AgeThreshold::OneMonth => "1m",
            AgeThreshold::ThreeMonths => "3m",
            AgeThreshold::SixMonths => "6m",
            AgeThreshold::OneYear => "1y",
            AgeThreshold::TwoYears => "2y",
        }
    }
}

impl FromStr for AgeThreshold {
    type Err = GmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(AgeThreshold::OneMonth),
            "3m" => Ok(AgeThreshold::ThreeMonths),
            "6m" => Ok(AgeThreshold::SixMonths),
            "1y" => Ok(AgeThreshold::OneYear),
            "2y" => Ok(AgeThreshold::TwoYears),
            other => Err(GmailError::InvalidFilter(format!(
                "unknown age threshold '{}'; expected 1m, 3m, 6m, 1y or 2y",
                other
            ))),
        }
    }
}

impl fmt::Display for AgeThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured filter fields; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterCriteria {
    pub category: Option<Category>,
    pub older_than: Option<AgeThreshold>,
    pub sender: Option<String>,
    pub label: Option<String>,
    pub keyword: Option<String>,
    pub has_attachment: bool,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.older_than.is_none()
            && self.sender.is_none()
            && self.label.is_none()
            && self.keyword.is_none()
            && !self.has_attachment
    }
}

/// What the user wants to delete
///
/// A raw query always wins over structured fields, so the two are separate
/// variants instead of one struct with an override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterSpec {
    Raw(String),
    Criteria(FilterCriteria),
}

impl FilterSpec {
    pub fn raw(query: impl Into<String>) -> Self {
        FilterSpec::Raw(query.into())
    }
}

impl From<FilterCriteria> for FilterSpec {
    fn from(criteria: FilterCriteria) -> Self {
        FilterSpec::Criteria(criteria)
    }
}

/// Filter selection as submitted by a UI: plain strings, nothing validated yet
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilterSelection {
    pub category: Option<String>,
    pub older_than: Option<String>,
    pub sender: Option<String>,
    pub label: Option<String>,
    pub keyword: Option<String>,
    #[serde(default)]
    pub has_attachment: bool,
    pub raw_query: Option<String>,
}

/// Blank strings count as unset
fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl TryFrom<&FilterSelection> for FilterSpec {
    type Error = GmailError;

    fn try_from(selection: &FilterSelection) -> Result<Self, Self::Error> {
        // Raw queries go to the provider verbatim, surrounding whitespace included
        if let Some(raw) = selection.raw_query.as_ref().filter(|r| !r.trim().is_empty()) {
            return Ok(FilterSpec::Raw(raw.clone()));
        }

        let category = non_blank(&selection.category)
            .map(|c| c.parse::<Category>())
            .transpose()?;
        let older_than = non_blank(&selection.older_than)
            .map(|a| a.parse::<AgeThreshold>())
            .transpose()?;

        Ok(FilterSpec::Criteria(FilterCriteria {
            category,
            older_than,
            sender: non_blank(&selection.sender),
            label: non_blank(&selection.label),
            keyword: non_blank(&selection.keyword),
            has_attachment: selection.has_attachment,
        }))
    }
}

impl TryFrom<FilterSelection> for FilterSpec {
    type Error = GmailError;

    fn try_from(selection: FilterSelection) -> Result<Self, Self::Error> {
        FilterSpec::try_from(&selection)
    }
}

/// A query in Gmail's search syntax; immutable once built
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SearchQuery(String);

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self(query.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SearchQuery {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of the count-only pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewResult {
    pub match_count: usize,
    pub query: SearchQuery,
}

/// Why a single message could not be trashed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureReason {
    NotFound,
    PermissionDenied,
    Transient,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::NotFound => "not found",
            FailureReason::PermissionDenied => "permission denied",
            FailureReason::Transient => "transient provider error",
        };
        f.write_str(text)
    }
}

/// Per-message result of a batch delete call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub message_id: String,
    pub result: std::result::Result<(), FailureReason>,
}

impl DeleteOutcome {
    pub fn trashed(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            result: Ok(()),
        }
    }

    pub fn failed(message_id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            message_id: message_id.into(),
            result: Err(reason),
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Message ids handed to one delete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionBatch {
    pub index: usize,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionError {
    pub message_id: String,
    pub reason: FailureReason,
}

/// Running tally of a deletion; counts are never double-counted
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionReport {
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
    pub errors: Vec<DeletionError>,
}

impl DeletionReport {
    /// Fold the final outcomes of one batch into the report
    pub fn record_batch(&mut self, outcomes: &[DeleteOutcome]) {
        self.requested += outcomes.len();
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => self.deleted += 1,
                Err(reason) => {
                    self.failed += 1;
                    self.errors.push(DeletionError {
                        message_id: outcome.message_id.clone(),
                        reason,
                    });
                }
            }
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Progress after each processed batch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub batches_completed: usize,
    pub batches_total: usize,
    pub deleted: usize,
    pub failed: usize,
}
