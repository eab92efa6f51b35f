//! Gmail API adapter: counting, paginated listing and batched trashing

use async_trait::async_trait;
use google_gmail1::api::BatchModifyMessagesRequest;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{GmailHub, MODIFY_SCOPE};
use crate::config::{PROVIDER_MAX_BATCH_SIZE, PROVIDER_MAX_PAGE_SIZE};
use crate::error::{GmailError, Result};
use crate::models::{DeleteOutcome, FailureReason, SearchQuery};
use crate::rate_limiter::{QuotaCost, QuotaRateLimiter};
use crate::retry::RetryPolicy;

const API_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of a message listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub message_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Operations the deletion workflow needs from a mail provider
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// Number of messages matching `query`, without fetching bodies
    async fn count(&self, query: &SearchQuery) -> Result<usize>;

    /// One page of matching message ids; `None` token starts from the top
    async fn list_page(&self, query: &SearchQuery, page_token: Option<String>) -> Result<MessagePage>;

    /// Move messages to trash, reporting each id separately
    ///
    /// Only session-level failures (authentication) fail the whole call.
    async fn delete_batch(&self, message_ids: &[String]) -> Result<Vec<DeleteOutcome>>;

    fn max_batch_size(&self) -> usize {
        PROVIDER_MAX_BATCH_SIZE
    }
}

/// Cursor over the ids matching a query, fetched a page at a time
pub struct MessageCursor<'a> {
    client: &'a dyn GmailClient,
    query: SearchQuery,
    next_token: Option<String>,
    finished: bool,
    pages_fetched: usize,
}

/// Start a fresh listing of `query`
pub fn search<'a>(client: &'a dyn GmailClient, query: &SearchQuery) -> MessageCursor<'a> {
    MessageCursor {
        client,
        query: query.clone(),
        next_token: None,
        finished: false,
        pages_fetched: 0,
    }
}

impl MessageCursor<'_> {
    /// Fetch the next page, retrying transient failures on the same token
    ///
    /// Returns `Ok(None)` once the listing is exhausted.
    pub async fn next_page(&mut self, retry: &RetryPolicy) -> Result<Option<Vec<String>>> {
        if self.finished {
            return Ok(None);
        }

        let client = self.client;
        let query = &self.query;
        let token = self.next_token.clone();
        let page = retry
            .run("list_page", || client.list_page(query, token.clone()))
            .await?;

        self.pages_fetched += 1;
        self.next_token = page.next_page_token;
        self.finished = self.next_token.is_none();
        debug!(
            "Fetched page {} ({} ids) for '{}'",
            self.pages_fetched,
            page.message_ids.len(),
            self.query
        );
        Ok(Some(page.message_ids))
    }

    /// Drain the cursor into a single list
    pub async fn collect_all(&mut self, retry: &RetryPolicy) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        while let Some(page) = self.next_page(retry).await? {
            ids.extend(page);
        }
        Ok(ids)
    }

    /// Rewind to the first page
    pub fn restart(&mut self) {
        self.next_token = None;
        self.finished = false;
        self.pages_fetched = 0;
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

/// Gmail client backed by the google-gmail1 hub
///
/// Every call draws from a shared quota bucket and is bounded by a timeout.
/// Retrying is left to the caller's `RetryPolicy`.
pub struct ProductionGmailClient {
    hub: GmailHub,
    quota: QuotaRateLimiter,
    page_size: u32,
    page_retry: RetryPolicy,
}

impl ProductionGmailClient {
    /// # Arguments
    /// * `hub` - Authenticated Gmail API hub
    /// * `quota` - Quota bucket, possibly shared with other clients
    /// * `page_size` - Ids per `messages.list` page (capped at 500)
    pub fn new(hub: GmailHub, quota: QuotaRateLimiter, page_size: u32) -> Self {
        Self {
            hub,
            quota,
            page_size: page_size.clamp(1, PROVIDER_MAX_PAGE_SIZE),
            page_retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for each page fetched while counting
    pub fn with_page_retry(mut self, retry: RetryPolicy) -> Self {
        self.page_retry = retry;
        self
    }

    /// Address of the authenticated account
    pub async fn account_email(&self) -> Result<String> {
        self.quota.acquire(QuotaCost::GetProfile).await;
        let (_, profile) = with_timeout(
            "get_profile",
            self.hub.users().get_profile("me").add_scope(MODIFY_SCOPE).doit(),
        )
        .await?;
        Ok(profile.email_address.unwrap_or_default())
    }

    async fn fetch_page(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage> {
        self.quota.acquire(QuotaCost::List).await;

        let mut call = self
            .hub
            .users()
            .messages_list("me")
            .q(query.as_str())
            .max_results(page_size)
            .param("fields", "messages/id,nextPageToken");

        if let Some(token) = page_token {
            call = call.page_token(token);
        }

        let (_, response) = with_timeout("messages_list", call.add_scope(MODIFY_SCOPE).doit()).await?;

        let message_ids = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok(MessagePage {
            message_ids,
            next_page_token: response.next_page_token,
        })
    }

    /// Trash one message, classifying any failure
    async fn trash_one(&self, message_id: &str) -> Result<DeleteOutcome> {
        self.quota.acquire(QuotaCost::Trash).await;

        let result = with_timeout(
            "messages_trash",
            self.hub
                .users()
                .messages_trash("me", message_id)
                .add_scope(MODIFY_SCOPE)
                .doit(),
        )
        .await;

        match result {
            Ok(_) => Ok(DeleteOutcome::trashed(message_id)),
            Err(e) if e.requires_reauth() => Err(e),
            Err(e) => {
                let reason = failure_reason(&e);
                warn!("Could not trash message {}: {} ({})", message_id, e, reason);
                Ok(DeleteOutcome::failed(message_id, reason))
            }
        }
    }
}

/// Map a per-message API error to the reason recorded in the report
fn failure_reason(error: &GmailError) -> FailureReason {
    match error {
        GmailError::MessageNotFound(_) | GmailError::BadRequest(_) => FailureReason::NotFound,
        GmailError::Forbidden(_) => FailureReason::PermissionDenied,
        _ => FailureReason::Transient,
    }
}

/// Sum page sizes until the last page, retrying each page on its own
async fn count_pages<F, Fut>(retry: &RetryPolicy, mut fetch: F) -> Result<usize>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<MessagePage>>,
{
    let mut total = 0;
    let mut page_token: Option<String> = None;

    loop {
        let page = retry
            .run("count_page", || fetch(page_token.clone()))
            .await?;
        total += page.message_ids.len();

        page_token = page.next_page_token;
        if page_token.is_none() {
            return Ok(total);
        }
    }
}

/// Await a google-gmail1 call with the adapter's timeout
async fn with_timeout<T, Fut>(operation_name: &str, call: Fut) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, google_gmail1::Error>>,
{
    debug!("Calling Gmail API: {}", operation_name);
    match tokio::time::timeout(API_TIMEOUT, call).await {
        Ok(result) => result.map_err(GmailError::from),
        Err(_) => {
            warn!("Gmail API {} call timed out after {:?}", operation_name, API_TIMEOUT);
            Err(GmailError::NetworkError(format!(
                "API call timed out after {:?}",
                API_TIMEOUT
            )))
        }
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn count(&self, query: &SearchQuery) -> Result<usize> {
        let total = count_pages(&self.page_retry, |token| async move {
            self.fetch_page(query, token.as_deref(), PROVIDER_MAX_PAGE_SIZE)
                .await
        })
        .await?;

        debug!("Counted {} messages for '{}'", total, query);
        Ok(total)
    }

    async fn list_page(&self, query: &SearchQuery, page_token: Option<String>) -> Result<MessagePage> {
        self.fetch_page(query, page_token.as_deref(), self.page_size).await
    }

    async fn delete_batch(&self, message_ids: &[String]) -> Result<Vec<DeleteOutcome>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        if message_ids.len() > self.max_batch_size() {
            return Err(GmailError::BadRequest(format!(
                "batch of {} exceeds the limit of {}",
                message_ids.len(),
                self.max_batch_size()
            )));
        }

        self.quota.acquire(QuotaCost::BatchModify).await;

        // Adding TRASH moves the messages to trash; nothing is erased here
        let request = BatchModifyMessagesRequest {
            ids: Some(message_ids.to_vec()),
            add_label_ids: Some(vec!["TRASH".to_string()]),
            remove_label_ids: None,
        };

        let result = with_timeout(
            "messages_batch_modify",
            self.hub
                .users()
                .messages_batch_modify(request, "me")
                .add_scope(MODIFY_SCOPE)
                .doit(),
        )
        .await;

        match result {
            Ok(_) => Ok(message_ids
                .iter()
                .map(|id| DeleteOutcome::trashed(id.as_str()))
                .collect()),
            Err(e) if e.requires_reauth() => Err(e),
            Err(e) if e.is_transient() => {
                warn!("Batch trash of {} messages failed: {}", message_ids.len(), e);
                Ok(message_ids
                    .iter()
                    .map(|id| DeleteOutcome::failed(id, FailureReason::Transient))
                    .collect())
            }
            Err(e) => {
                // The batch call is all-or-nothing; find the offending ids one by one
                warn!(
                    "Batch trash rejected ({}), falling back to per-message calls",
                    e
                );
                let mut outcomes = Vec::with_capacity(message_ids.len());
                for id in message_ids {
                    match self.trash_one(id).await {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) if outcomes.is_empty() => return Err(e),
                        Err(e) => {
                            // Keep what was already trashed; the rest is resubmitted
                            // and hits the auth error on the next call
                            let done = outcomes.len();
                            warn!("Per-message trash stopped after {} messages: {}", done, e);
                            outcomes.extend(
                                message_ids[done..]
                                    .iter()
                                    .map(|id| DeleteOutcome::failed(id, FailureReason::Transient)),
                            );
                            break;
                        }
                    }
                }
                Ok(outcomes)
            }
        }
    }
}
