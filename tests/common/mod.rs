//! Common test utilities and fixtures

#![allow(dead_code)]

use futures::StreamExt;
use gmail_bulk_delete::client::{GmailClient, MessagePage};
use gmail_bulk_delete::error::Result;
use gmail_bulk_delete::fake::InMemoryMailbox;
use gmail_bulk_delete::models::{Category, DeleteOutcome, FilterCriteria, FilterSpec, SearchQuery};
use gmail_bulk_delete::retry::RetryPolicy;
use gmail_bulk_delete::workflow::{DeletionEvent, DeletionOutcome, DeletionStream, Session, WorkflowSettings};
use mockall::mock;
use std::sync::Arc;

mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn count(&self, query: &SearchQuery) -> Result<usize>;
        async fn list_page(&self, query: &SearchQuery, page_token: Option<String>) -> Result<MessagePage>;
        async fn delete_batch(&self, message_ids: &[String]) -> Result<Vec<DeleteOutcome>>;
        fn max_batch_size(&self) -> usize;
    }
}

pub fn fast_settings(batch_size: usize) -> WorkflowSettings {
    WorkflowSettings {
        batch_size,
        retry: RetryPolicy::immediate(2),
    }
}

pub fn session_over(mailbox: &Arc<InMemoryMailbox>, batch_size: usize) -> Session {
    Session::new(Arc::clone(mailbox) as Arc<dyn GmailClient>, fast_settings(batch_size))
}

pub fn promotions_older_than_year() -> FilterSpec {
    FilterSpec::Criteria(FilterCriteria {
        category: Some(Category::Promotions),
        older_than: Some(gmail_bulk_delete::models::AgeThreshold::OneYear),
        ..Default::default()
    })
}

/// Mailbox with `count` old promotions plus some mail that must survive
pub fn mailbox_with_old_promotions(count: usize, page_size: usize) -> Arc<InMemoryMailbox> {
    let mailbox = Arc::new(InMemoryMailbox::with_page_size(page_size));
    mailbox.add_messages("promo", count, &["category:promotions", "older_than:1y"]);
    mailbox.add_messages("recent", 3, &["category:promotions"]);
    mailbox.add_messages("friend", 2, &["category:social", "older_than:1y"]);
    mailbox
}

/// Drain a deletion stream, returning all events
pub async fn drain(stream: DeletionStream) -> Vec<DeletionEvent> {
    stream.collect().await
}

/// The outcome carried by the last event
pub fn final_outcome(events: &[DeletionEvent]) -> &DeletionOutcome {
    match events.last() {
        Some(DeletionEvent::Finished(outcome)) => outcome,
        other => panic!("stream did not end with Finished: {:?}", other),
    }
}

/// A page with no continuation
pub fn last_page(ids: &[&str]) -> MessagePage {
    MessagePage {
        message_ids: ids.iter().map(|id| id.to_string()).collect(),
        next_page_token: None,
    }
}
