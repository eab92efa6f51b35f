//! Gmail Bulk Delete
//!
//! Moves Gmail messages matching a filter to trash, in batches, after a
//! count-only preview and an explicit confirmation.
//!
//! # Overview
//!
//! - **Query building**: structured filters (category, age, sender, label,
//!   keyword, attachments) or raw Gmail search queries
//! - **Presets**: a catalog of ready-made filters
//! - **Gmail adapter**: counting, cursor-based listing and batch trashing
//!   behind the [`GmailClient`] trait, with quota-aware rate limiting
//! - **Workflow**: a per-session preview/confirm/delete state machine with
//!   cooperative cancellation and per-message failure reporting
//! - **History**: a JSON log of finished runs
//!
//! # Example Usage
//!
//! ```no_run
//! use futures::StreamExt;
//! use gmail_bulk_delete::{
//!     auth, client::ProductionGmailClient, config::Config, models::FilterSelection,
//!     rate_limiter::QuotaRateLimiter, workflow::{DeletionEvent, Session, WorkflowSettings},
//!     FilterSpec,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-bulk-delete/token.json".as_ref(),
//!     )
//!     .await?;
//!
//!     let client = ProductionGmailClient::new(
//!         hub,
//!         QuotaRateLimiter::from_config(&config.quota),
//!         config.deletion.page_size,
//!     );
//!     let session = Session::new(Arc::new(client), WorkflowSettings::from(&config));
//!
//!     let filter = FilterSpec::try_from(FilterSelection {
//!         category: Some("promotions".to_string()),
//!         older_than: Some("1y".to_string()),
//!         ..Default::default()
//!     })?;
//!     let preview = session.request_preview(&filter).await?;
//!
//!     let mut events = session.confirm_and_delete(&preview).await?;
//!     while let Some(event) = events.next().await {
//!         if let DeletionEvent::Finished(outcome) = event {
//!             println!("{} trashed", outcome.report().deleted);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail client trait, pagination cursor and production client
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`fake`] - In-memory mailbox for tests and demos
//! - [`history`] - Run history persistence
//! - [`models`] - Core data structures
//! - [`presets`] - Built-in filters
//! - [`query`] - Filter to Gmail query translation
//! - [`rate_limiter`] - Quota-unit token bucket
//! - [`retry`] - Backoff policy for transient errors
//! - [`workflow`] - Preview/confirm/delete sessions

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fake;
pub mod history;
pub mod models;
pub mod presets;
pub mod query;
pub mod rate_limiter;
pub mod retry;
pub mod workflow;

pub use error::{GmailError, Result};

pub use models::{
    AgeThreshold, Category, DeletionReport, FilterCriteria, FilterSelection, FilterSpec,
    PreviewResult, SearchQuery,
};

pub use config::Config;

pub use client::{GmailClient, MessageCursor, ProductionGmailClient};

pub use retry::RetryPolicy;

pub use workflow::{
    CancelAck, DeletionEvent, DeletionOutcome, DeletionStream, Session, WorkflowSettings,
    WorkflowState,
};

pub use cli::{Cli, Commands, ProgressReporter};
