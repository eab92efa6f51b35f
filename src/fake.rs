//! In-memory mailbox implementing [`GmailClient`]
//!
//! Messages carry a set of search tokens (`category:promotions`,
//! `older_than:1y`, `from:a@b.com`, bare keywords...). A query matches a
//! message when every token of the query is among the message's tokens.
//! Failures can be injected per call or per message id.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::client::{GmailClient, MessagePage};
use crate::error::{GmailError, Result};
use crate::models::{DeleteOutcome, FailureReason, SearchQuery};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    tokens: HashSet<String>,
    trashed: bool,
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: Vec<StoredMessage>,
    page_size: usize,
    permission_denied: HashSet<String>,
    /// id -> remaining transient failures
    flaky_ids: HashMap<String, u32>,
    failing_calls: u32,
    session_expired: bool,
    count_calls: usize,
    list_calls: usize,
    delete_calls: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct InMemoryMailbox {
    state: Mutex<MailboxState>,
}

/// Split a query on whitespace, keeping quoted phrases together
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in query.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens.into_iter().map(|t| t.to_lowercase()).collect()
}

impl StoredMessage {
    fn matches(&self, tokens: &[String]) -> bool {
        let wants_trash = tokens.iter().any(|t| t == "in:trash");
        if self.trashed != wants_trash {
            return false;
        }
        tokens
            .iter()
            .filter(|t| *t != "in:trash")
            .all(|t| self.tokens.contains(t))
    }
}

impl MailboxState {
    fn check_session(&self) -> Result<()> {
        if self.session_expired {
            return Err(GmailError::AuthError("token expired".to_string()));
        }
        Ok(())
    }

    fn take_injected_failure(&mut self) -> bool {
        if self.failing_calls > 0 {
            self.failing_calls -= 1;
            true
        } else {
            false
        }
    }

    fn matching_ids(&self, query: &SearchQuery) -> Vec<String> {
        let tokens = tokenize(query.as_str());
        self.messages
            .iter()
            .filter(|m| m.matches(&tokens))
            .map(|m| m.id.clone())
            .collect()
    }

    fn trash(&mut self, id: &str) -> DeleteOutcome {
        if self.permission_denied.contains(id) {
            return DeleteOutcome::failed(id, FailureReason::PermissionDenied);
        }
        if let Some(remaining) = self.flaky_ids.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return DeleteOutcome::failed(id, FailureReason::Transient);
            }
        }
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.trashed = true;
                DeleteOutcome::trashed(id)
            }
            None => DeleteOutcome::failed(id, FailureReason::NotFound),
        }
    }
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                page_size: page_size.max(1),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_message(&self, id: &str, tokens: &[&str]) {
        self.lock().messages.push(StoredMessage {
            id: id.to_string(),
            tokens: tokens.iter().map(|t| t.to_lowercase()).collect(),
            trashed: false,
        });
    }

    /// Add `count` messages named `{prefix}1..={prefix}{count}`
    pub fn add_messages(&self, prefix: &str, count: usize, tokens: &[&str]) -> Vec<String> {
        (1..=count)
            .map(|i| {
                let id = format!("{}{}", prefix, i);
                self.add_message(&id, tokens);
                id
            })
            .collect()
    }

    /// Deletion of `id` will fail with `PermissionDenied`
    pub fn deny(&self, id: &str) {
        self.lock().permission_denied.insert(id.to_string());
    }

    /// Deletion of `id` fails transiently `times` times before succeeding
    pub fn fail_transiently(&self, id: &str, times: u32) {
        self.lock().flaky_ids.insert(id.to_string(), times);
    }

    /// The next `calls` provider calls fail with a 503
    pub fn fail_next_calls(&self, calls: u32) {
        self.lock().failing_calls = calls;
    }

    pub fn expire_session(&self) {
        self.lock().session_expired = true;
    }

    pub fn restore_session(&self) {
        self.lock().session_expired = false;
    }

    pub fn is_trashed(&self, id: &str) -> bool {
        self.lock().messages.iter().any(|m| m.id == id && m.trashed)
    }

    pub fn trashed_count(&self) -> usize {
        self.lock().messages.iter().filter(|m| m.trashed).count()
    }

    pub fn count_calls(&self) -> usize {
        self.lock().count_calls
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Every batch passed to `delete_batch`, in call order
    pub fn delete_calls(&self) -> Vec<Vec<String>> {
        self.lock().delete_calls.clone()
    }
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable() -> GmailError {
    GmailError::ServerError {
        status: 503,
        message: "injected failure".to_string(),
    }
}

#[async_trait]
impl GmailClient for InMemoryMailbox {
    async fn count(&self, query: &SearchQuery) -> Result<usize> {
        let mut state = self.lock();
        state.count_calls += 1;
        state.check_session()?;
        if state.take_injected_failure() {
            return Err(unavailable());
        }
        Ok(state.matching_ids(query).len())
    }

    async fn list_page(&self, query: &SearchQuery, page_token: Option<String>) -> Result<MessagePage> {
        let mut state = self.lock();
        state.list_calls += 1;
        state.check_session()?;
        if state.take_injected_failure() {
            return Err(unavailable());
        }

        let offset = match page_token.as_deref() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| GmailError::BadRequest(format!("invalid page token '{}'", token)))?,
            None => 0,
        };

        let ids = state.matching_ids(query);
        let end = (offset + state.page_size).min(ids.len());
        let message_ids = ids.get(offset..end).map(<[String]>::to_vec).unwrap_or_default();
        let next_page_token = (end < ids.len()).then(|| end.to_string());

        Ok(MessagePage {
            message_ids,
            next_page_token,
        })
    }

    async fn delete_batch(&self, message_ids: &[String]) -> Result<Vec<DeleteOutcome>> {
        let mut state = self.lock();
        state.delete_calls.push(message_ids.to_vec());
        state.check_session()?;

        if message_ids.len() > self.max_batch_size() {
            return Err(GmailError::BadRequest(format!(
                "batch of {} exceeds the limit of {}",
                message_ids.len(),
                self.max_batch_size()
            )));
        }

        if state.take_injected_failure() {
            return Ok(message_ids
                .iter()
                .map(|id| DeleteOutcome::failed(id, FailureReason::Transient))
                .collect());
        }

        Ok(message_ids.iter().map(|id| state.trash(id)).collect())
    }
}
