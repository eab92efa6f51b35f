//! End-to-end behaviour of preview/confirm/delete sessions

mod common;

use common::*;
use futures::StreamExt;
use gmail_bulk_delete::error::GmailError;
use gmail_bulk_delete::fake::InMemoryMailbox;
use gmail_bulk_delete::models::{FailureReason, FilterSpec, PreviewResult, SearchQuery};
use gmail_bulk_delete::workflow::{CancelAck, DeletionEvent, DeletionOutcome, Session, WorkflowState};
use mockall::predicate::eq;
use std::sync::Arc;

#[tokio::test]
async fn preview_is_idempotent_and_has_no_side_effects() {
    let mailbox = mailbox_with_old_promotions(12, 5);
    let session = session_over(&mailbox, 100);
    let filter = promotions_older_than_year();

    let first = session.request_preview(&filter).await.unwrap();
    let second = session.request_preview(&filter).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.match_count, 12);
    assert_eq!(first.query.as_str(), "category:promotions older_than:1y");
    assert_eq!(mailbox.trashed_count(), 0);
    assert!(mailbox.delete_calls().is_empty());
}

#[tokio::test]
async fn deleting_then_previewing_again_finds_nothing() {
    let mailbox = mailbox_with_old_promotions(12, 5);
    let session = session_over(&mailbox, 5);
    let filter = promotions_older_than_year();

    let before = session.request_preview(&filter).await.unwrap();
    let events = drain(session.confirm_and_delete(&before).await.unwrap()).await;

    match final_outcome(&events) {
        DeletionOutcome::Completed(report) => {
            assert_eq!(report.requested, 12);
            assert_eq!(report.deleted, 12);
            assert_eq!(report.failed, 0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let after = session.request_preview(&filter).await.unwrap();
    assert!(after.match_count <= before.match_count);
    assert_eq!(after.match_count, 0);

    // Mail outside the filter is untouched
    assert!(!mailbox.is_trashed("recent1"));
    assert!(!mailbox.is_trashed("friend1"));
}

#[tokio::test]
async fn permission_denied_messages_are_reported_not_fatal() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    mailbox.add_messages("m", 5, &["is:read"]);
    mailbox.deny("m2");
    mailbox.deny("m4");
    let session = session_over(&mailbox, 10);

    let preview = session.request_preview(&FilterSpec::raw("is:read")).await.unwrap();
    let events = drain(session.confirm_and_delete(&preview).await.unwrap()).await;

    let report = match final_outcome(&events) {
        DeletionOutcome::Completed(report) => report.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(report.requested, 5);
    assert_eq!(report.deleted, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.deleted + report.failed, report.requested);

    let failed_ids: Vec<&str> = report.errors.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(failed_ids, vec!["m2", "m4"]);
    assert!(report
        .errors
        .iter()
        .all(|e| e.reason == FailureReason::PermissionDenied));

    // Permanent failures are not retried
    assert_eq!(mailbox.delete_calls().len(), 1);
}

#[tokio::test]
async fn second_operation_is_rejected_while_deleting() {
    let mailbox = mailbox_with_old_promotions(6, 10);
    let session = session_over(&mailbox, 2);
    let filter = promotions_older_than_year();

    let preview = session.request_preview(&filter).await.unwrap();
    let mut stream = session.confirm_and_delete(&preview).await.unwrap();
    assert!(matches!(
        stream.next().await,
        Some(DeletionEvent::Listed {
            total_messages: 6,
            total_batches: 3
        })
    ));

    let other_handle = session.clone();
    assert!(matches!(
        other_handle.confirm_and_delete(&preview).await,
        Err(GmailError::OperationInProgress(_))
    ));
    assert!(matches!(
        other_handle.request_preview(&filter).await,
        Err(GmailError::OperationInProgress(_))
    ));
    assert!(matches!(session.state(), WorkflowState::Deleting { .. }));

    let rest: Vec<DeletionEvent> = stream.collect().await;
    assert!(matches!(
        rest.last(),
        Some(DeletionEvent::Finished(DeletionOutcome::Completed(_)))
    ));
    assert_eq!(mailbox.trashed_count(), 6);
}

#[tokio::test]
async fn sessions_do_not_share_state() {
    let mailbox = mailbox_with_old_promotions(4, 10);
    let first = session_over(&mailbox, 2);
    let second = session_over(&mailbox, 2);
    let filter = promotions_older_than_year();

    let preview = first.request_preview(&filter).await.unwrap();
    let _stream = first.confirm_and_delete(&preview).await.unwrap();

    assert_eq!(second.state(), WorkflowState::Idle);
    assert!(second.request_preview(&filter).await.is_ok());
}

#[tokio::test]
async fn cancellation_between_batches_keeps_completed_work() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    mailbox.add_messages("m", 10, &["is:read"]);
    let session = session_over(&mailbox, 2);

    let preview = session.request_preview(&FilterSpec::raw("is:read")).await.unwrap();
    let mut stream = session.confirm_and_delete(&preview).await.unwrap();

    assert!(matches!(
        stream.next().await,
        Some(DeletionEvent::Listed {
            total_messages: 10,
            total_batches: 5
        })
    ));
    for expected in 1..=2 {
        match stream.next().await {
            Some(DeletionEvent::BatchCompleted(progress)) => {
                assert_eq!(progress.batches_completed, expected);
                assert_eq!(progress.batches_total, 5);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(session.cancel(), CancelAck::Requested);

    match stream.next().await {
        Some(DeletionEvent::Finished(DeletionOutcome::Cancelled(report))) => {
            assert_eq!(report.deleted, 4);
            assert_eq!(report.requested, 4);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(stream.next().await.is_none());

    assert_eq!(mailbox.delete_calls().len(), 2);
    assert_eq!(mailbox.trashed_count(), 4);
    assert!(!mailbox.is_trashed("m5"));
    assert!(matches!(session.state(), WorkflowState::Cancelled(_)));
}

#[tokio::test]
async fn progress_is_monotonic() {
    let mailbox = mailbox_with_old_promotions(9, 4);
    mailbox.deny("promo3");
    let session = session_over(&mailbox, 2);

    let preview = session
        .request_preview(&promotions_older_than_year())
        .await
        .unwrap();
    let events = drain(session.confirm_and_delete(&preview).await.unwrap()).await;

    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeletionEvent::BatchCompleted(progress) => Some(*progress),
            _ => None,
        })
        .collect();

    assert_eq!(updates.len(), 5);
    for pair in updates.windows(2) {
        assert!(pair[1].batches_completed > pair[0].batches_completed);
        assert!(pair[1].deleted >= pair[0].deleted);
        assert!(pair[1].failed >= pair[0].failed);
    }
    let last = updates.last().unwrap();
    assert_eq!(last.deleted + last.failed, 9);
    assert_eq!(last.failed, 1);
}

#[tokio::test]
async fn expired_session_during_preview_requires_reauth() {
    let mailbox = mailbox_with_old_promotions(3, 10);
    mailbox.expire_session();
    let session = session_over(&mailbox, 10);

    let result = session.request_preview(&promotions_older_than_year()).await;

    assert!(matches!(result, Err(GmailError::AuthError(_))));
    assert!(matches!(
        session.state(),
        WorkflowState::Failed {
            requires_reauth: true,
            report: None,
            ..
        }
    ));
    // Auth failures are not retried
    assert_eq!(mailbox.count_calls(), 1);
}

#[tokio::test]
async fn expired_session_during_deletion_fails_with_partial_report() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    mailbox.add_messages("m", 6, &["is:read"]);
    let session = session_over(&mailbox, 2);

    let preview = session.request_preview(&FilterSpec::raw("is:read")).await.unwrap();
    let mut stream = session.confirm_and_delete(&preview).await.unwrap();
    stream.next().await; // Listed
    stream.next().await; // batch 1
    mailbox.expire_session();

    match stream.next().await {
        Some(DeletionEvent::Finished(DeletionOutcome::Failed { error, report })) => {
            assert!(error.requires_reauth());
            assert_eq!(report.deleted, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        session.state(),
        WorkflowState::Failed {
            requires_reauth: true,
            report: Some(_),
            ..
        }
    ));
}

#[tokio::test]
async fn exhausted_transient_errors_fail_the_preview() {
    let mailbox = mailbox_with_old_promotions(3, 10);
    mailbox.fail_next_calls(10);
    let session = session_over(&mailbox, 10);

    let result = session.request_preview(&promotions_older_than_year()).await;

    assert!(matches!(result, Err(GmailError::ServerError { status: 503, .. })));
    assert!(matches!(
        session.state(),
        WorkflowState::Failed {
            requires_reauth: false,
            ..
        }
    ));
    // one attempt plus two retries
    assert_eq!(mailbox.count_calls(), 3);
}

#[tokio::test]
async fn listing_retries_individual_pages() {
    let mailbox = mailbox_with_old_promotions(6, 2);
    let session = session_over(&mailbox, 10);

    let preview = session
        .request_preview(&promotions_older_than_year())
        .await
        .unwrap();
    mailbox.fail_next_calls(2);
    let events = drain(session.confirm_and_delete(&preview).await.unwrap()).await;

    assert!(matches!(
        final_outcome(&events),
        DeletionOutcome::Completed(report) if report.deleted == 6
    ));
    // three pages plus two failed attempts
    assert_eq!(mailbox.list_calls(), 5);
}

#[tokio::test]
async fn confirming_outdated_preview_returns_fresh_one() {
    let mailbox = mailbox_with_old_promotions(3, 10);
    let session = session_over(&mailbox, 10);
    let filter = promotions_older_than_year();

    let preview = session.request_preview(&filter).await.unwrap();
    let other_query = PreviewResult {
        match_count: preview.match_count,
        query: SearchQuery::new("category:promotions"),
    };

    let fresh = match session.confirm_and_delete(&other_query).await {
        Err(GmailError::StalePreview { fresh }) => fresh,
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("stale preview was accepted"),
    };
    assert_eq!(fresh.query.as_str(), "category:promotions");
    assert_eq!(fresh.match_count, 6);
    assert_eq!(mailbox.trashed_count(), 0);

    // The refreshed preview can be confirmed as-is
    let events = drain(session.confirm_and_delete(&fresh).await.unwrap()).await;
    assert_eq!(final_outcome(&events).report().deleted, 6);
}

#[tokio::test]
async fn empty_filter_is_rejected_before_any_call() {
    let mut client = MockGmailClient::new();
    client.expect_count().never();
    client.expect_list_page().never();
    client.expect_delete_batch().never();
    let session = Session::new(Arc::new(client), fast_settings(10));

    let result = session
        .request_preview(&FilterSpec::Criteria(Default::default()))
        .await;
    assert!(matches!(result, Err(GmailError::InvalidFilter(_))));
}

#[tokio::test]
async fn batches_respect_client_limit() {
    let mut client = MockGmailClient::new();
    client
        .expect_count()
        .with(eq(SearchQuery::new("is:read")))
        .times(1)
        .returning(|_| Ok(5));
    client
        .expect_list_page()
        .times(1)
        .returning(|_, _| Ok(last_page(&["a", "b", "c", "d", "e"])));
    client.expect_max_batch_size().return_const(2usize);
    client
        .expect_delete_batch()
        .times(3)
        .withf(|ids: &[String]| ids.len() <= 2)
        .returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| gmail_bulk_delete::models::DeleteOutcome::trashed(id.as_str()))
                .collect())
        });

    let session = Session::new(Arc::new(client), fast_settings(500));
    let preview = session.request_preview(&FilterSpec::raw("is:read")).await.unwrap();
    let events = drain(session.confirm_and_delete(&preview).await.unwrap()).await;

    assert!(matches!(
        events.first(),
        Some(DeletionEvent::Listed {
            total_messages: 5,
            total_batches: 3
        })
    ));
    assert_eq!(final_outcome(&events).report().deleted, 5);
}

#[tokio::test]
async fn transient_batch_call_errors_are_retried() {
    let mut client = MockGmailClient::new();
    client.expect_count().returning(|_| Ok(1));
    client
        .expect_list_page()
        .returning(|_, _| Ok(last_page(&["only"])));
    client.expect_max_batch_size().return_const(1000usize);

    let mut seq = mockall::Sequence::new();
    client
        .expect_delete_batch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(GmailError::NetworkError("connection reset".to_string())));
    client
        .expect_delete_batch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| gmail_bulk_delete::models::DeleteOutcome::trashed(id.as_str()))
                .collect())
        });

    let session = Session::new(Arc::new(client), fast_settings(10));
    let preview = session.request_preview(&FilterSpec::raw("label:old")).await.unwrap();
    let events = drain(session.confirm_and_delete(&preview).await.unwrap()).await;

    assert!(matches!(
        final_outcome(&events),
        DeletionOutcome::Completed(report) if report.deleted == 1
    ));
}

#[tokio::test]
async fn auth_error_on_resubmission_keeps_already_trashed_ids() {
    use gmail_bulk_delete::models::DeleteOutcome;

    let mut client = MockGmailClient::new();
    client.expect_count().returning(|_| Ok(3));
    client
        .expect_list_page()
        .returning(|_, _| Ok(last_page(&["m1", "m2", "m3"])));
    client.expect_max_batch_size().return_const(1000usize);

    let mut seq = mockall::Sequence::new();
    client
        .expect_delete_batch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(vec![
                DeleteOutcome::trashed("m1"),
                DeleteOutcome::failed("m2", FailureReason::Transient),
                DeleteOutcome::trashed("m3"),
            ])
        });
    client
        .expect_delete_batch()
        .withf(|ids: &[String]| ids.len() == 1 && ids[0] == "m2")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(GmailError::AuthError("token revoked".to_string())));

    let session = Session::new(Arc::new(client), fast_settings(10));
    let preview = session.request_preview(&FilterSpec::raw("label:old")).await.unwrap();
    let events = drain(session.confirm_and_delete(&preview).await.unwrap()).await;

    match final_outcome(&events) {
        DeletionOutcome::Failed { error, report } => {
            assert!(error.requires_reauth());
            assert_eq!(report.deleted, 2);
            assert_eq!(report.failed, 0);
            assert_eq!(report.requested, 2);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    match session.state() {
        WorkflowState::Failed {
            requires_reauth: true,
            report: Some(report),
            ..
        } => assert_eq!(report.deleted, 2),
        other => panic!("unexpected state {:?}", other),
    }
}
