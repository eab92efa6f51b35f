//! Translation of filter selections into Gmail search syntax
//!
//! Clauses are always emitted in the same order (category, age, sender,
//! label, keyword, attachment) so equal filters give byte-equal queries.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GmailError, Result};
use crate::models::{AgeThreshold, Category, FilterCriteria, FilterSelection, FilterSpec, SearchQuery};

/// Characters that would change the meaning of a Gmail search operand
static FORBIDDEN_OPERAND_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["(){}]"#).unwrap());

/// `user@example.com`, `@example.com` or a bare `example.com`
static SENDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[^\s@]+)?@?[^\s@]+\.[^\s@]+$|^[^\s@]+@[^\s@]+$").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One search clause; the rendering match is exhaustive
#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause<'a> {
    Category(Category),
    OlderThan(AgeThreshold),
    From(&'a str),
    Label(&'a str),
    Keyword(&'a str),
    HasAttachment,
}

impl Clause<'_> {
    fn render(&self) -> Result<String> {
        match self {
            Clause::Category(category) => Ok(format!("category:{}", category.search_token())),
            Clause::OlderThan(age) => Ok(format!("older_than:{}", age.code())),
            Clause::From(sender) => {
                if !SENDER_PATTERN.is_match(sender) || FORBIDDEN_OPERAND_CHARS.is_match(sender) {
                    return Err(GmailError::InvalidFilter(format!(
                        "'{}' is not an email address or domain",
                        sender
                    )));
                }
                Ok(format!("from:{}", sender))
            }
            Clause::Label(label) => {
                if FORBIDDEN_OPERAND_CHARS.is_match(label) {
                    return Err(GmailError::InvalidFilter(format!(
                        "label '{}' contains quotes, parentheses or braces",
                        label
                    )));
                }
                // Gmail searches multi-word labels with dashes
                Ok(format!("label:{}", WHITESPACE.replace_all(label, "-")))
            }
            Clause::Keyword(keyword) => {
                let cleaned = keyword.replace('"', "");
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    return Err(GmailError::InvalidFilter(
                        "keyword is empty once quotes are removed".to_string(),
                    ));
                }
                if cleaned.chars().any(char::is_whitespace) {
                    Ok(format!("\"{}\"", cleaned))
                } else {
                    Ok(cleaned.to_string())
                }
            }
            Clause::HasAttachment => Ok("has:attachment".to_string()),
        }
    }
}

fn clauses(criteria: &FilterCriteria) -> Vec<Clause<'_>> {
    let mut clauses = Vec::with_capacity(6);
    if let Some(category) = criteria.category {
        clauses.push(Clause::Category(category));
    }
    if let Some(age) = criteria.older_than {
        clauses.push(Clause::OlderThan(age));
    }
    if let Some(sender) = criteria.sender.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(Clause::From(sender));
    }
    if let Some(label) = criteria.label.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(Clause::Label(label));
    }
    if let Some(keyword) = criteria.keyword.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(Clause::Keyword(keyword));
    }
    if criteria.has_attachment {
        clauses.push(Clause::HasAttachment);
    }
    clauses
}

/// Build the Gmail query for a filter
///
/// Raw queries are passed through untouched; the caller owns their
/// correctness. Structured criteria must select at least one clause.
pub fn build(spec: &FilterSpec) -> Result<SearchQuery> {
    match spec {
        FilterSpec::Raw(raw) => {
            if raw.trim().is_empty() {
                return Err(GmailError::InvalidFilter(
                    "raw query is empty".to_string(),
                ));
            }
            Ok(SearchQuery::new(raw.clone()))
        }
        FilterSpec::Criteria(criteria) => {
            let rendered = clauses(criteria)
                .iter()
                .map(Clause::render)
                .collect::<Result<Vec<_>>>()?;

            if rendered.is_empty() {
                return Err(GmailError::InvalidFilter(
                    "a filter must select something".to_string(),
                ));
            }

            let query = rendered.join(" ");
            tracing::debug!("Built search query: {}", query);
            Ok(SearchQuery::new(query))
        }
    }
}

/// Validate a UI selection and build its query
pub fn build_selection(selection: &FilterSelection) -> Result<SearchQuery> {
    build(&FilterSpec::try_from(selection)?)
}
