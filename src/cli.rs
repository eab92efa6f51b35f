//! Command-line interface

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Select, Text};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth;
use crate::client::ProductionGmailClient;
use crate::config::{Config, SafetyConfig};
use crate::error::{GmailError, Result};
use crate::history::{History, RunRecord, DEFAULT_HISTORY_PATH};
use crate::models::{AgeThreshold, Category, FilterSelection, FilterSpec, PreviewResult};
use crate::presets::{self, Preset};
use crate::query;
use crate::rate_limiter::QuotaRateLimiter;
use crate::retry::RetryPolicy;
use crate::workflow::{CancelAck, DeletionEvent, DeletionOutcome, Session, WorkflowSettings};

/// Word the user types to confirm a deletion
/// Exit status after an interrupted run
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

pub const CONFIRMATION_WORD: &str = "DELETE";

#[derive(Parser, Debug)]
#[command(name = "gmail-bulk-delete")]
#[command(version)]
#[command(about = "Bulk-move Gmail messages matching a filter to trash", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-bulk-delete/token.json")]
    pub token_cache: PathBuf,

    /// Path to run history file
    #[arg(long, default_value = DEFAULT_HISTORY_PATH)]
    pub history_file: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// List the built-in filter presets
    Presets,

    /// Count the messages a filter matches without touching them
    Preview {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Preview, confirm, then move matching messages to trash
    Delete {
        #[command(flatten)]
        filter: FilterArgs,

        /// Skip the confirmation prompts
        #[arg(long)]
        yes: bool,
    },

    /// Pick a filter interactively, then preview and delete
    Interactive,

    /// Show recent deletion runs
    Status {
        /// Show detailed information
        #[arg(long)]
        detailed: bool,

        /// Number of runs to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Filter flags shared by `preview` and `delete`
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Use a built-in preset (see `presets`)
    #[arg(long)]
    pub preset: Option<String>,

    /// Raw Gmail search query; overrides every other filter flag
    #[arg(short, long)]
    pub query: Option<String>,

    /// promotions, social, updates or forums
    #[arg(long)]
    pub category: Option<String>,

    /// 1m, 3m, 6m, 1y or 2y
    #[arg(long)]
    pub older_than: Option<String>,

    /// Sender address or domain
    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long)]
    pub keyword: Option<String>,

    #[arg(long)]
    pub has_attachment: bool,
}

impl FilterArgs {
    pub fn to_selection(&self) -> FilterSelection {
        FilterSelection {
            category: self.category.clone(),
            older_than: self.older_than.clone(),
            sender: self.from.clone(),
            label: self.label.clone(),
            keyword: self.keyword.clone(),
            has_attachment: self.has_attachment,
            raw_query: self.query.clone(),
        }
    }

    /// Resolve the flags into a filter
    pub fn to_filter(&self) -> Result<FilterSpec> {
        let Some(key) = &self.preset else {
            return FilterSpec::try_from(self.to_selection());
        };

        if self.to_selection() != FilterSelection::default() {
            return Err(GmailError::InvalidFilter(
                "--preset cannot be combined with other filter flags".to_string(),
            ));
        }
        presets::find(key)
            .map(|preset| preset.filter)
            .ok_or_else(|| GmailError::InvalidFilter(format!("unknown preset '{}'", key)))
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }

    /// Hide bars so prompts are not redrawn over
    pub fn clear(&self) {
        let _ = self.multi.clear();
    }
}

/// Everything one deletion command needs
pub struct DeleteContext<'a> {
    pub session: Session,
    pub config: &'a Config,
    pub history_file: &'a Path,
    pub reporter: &'a ProgressReporter,
}

/// Authenticate and build a client for the real Gmail API
pub async fn connect(
    cli: &Cli,
    config: &Config,
    reporter: &ProgressReporter,
) -> Result<Arc<ProductionGmailClient>> {
    let spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = match auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await {
        Ok(hub) => hub,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e);
        }
    };
    let client = ProductionGmailClient::new(
        hub,
        QuotaRateLimiter::from_config(&config.quota),
        config.deletion.page_size,
    )
    .with_page_retry(RetryPolicy::from(&config.retry));
    reporter.finish_spinner(&spinner, "Gmail API authenticated");

    Ok(Arc::new(client))
}

pub fn new_session(client: Arc<ProductionGmailClient>, config: &Config) -> Session {
    Session::new(client, WorkflowSettings::from(config))
}

pub async fn preview(
    session: &Session,
    filter: &FilterSpec,
    reporter: &ProgressReporter,
) -> Result<PreviewResult> {
    let spinner = reporter.add_spinner("Counting matching messages...");
    let result = session.request_preview(filter).await;
    spinner.finish_and_clear();

    let preview = result?;
    println!("Query:   {}", preview.query);
    println!("Matches: {}", preview.match_count);
    Ok(preview)
}

/// A question the user must answer before deletion starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStep {
    TypeWord,
    YesNo,
    LargeDeletion,
}

/// Questions to ask for a deletion of `match_count` messages
pub fn confirmation_steps(match_count: usize, safety: &SafetyConfig) -> Vec<ConfirmationStep> {
    let mut steps = Vec::new();
    if match_count > safety.large_deletion_threshold {
        steps.push(ConfirmationStep::LargeDeletion);
    }
    if safety.require_typed_confirmation {
        steps.push(ConfirmationStep::TypeWord);
    } else {
        steps.push(ConfirmationStep::YesNo);
    }
    steps
}

fn prompt_error(error: InquireError) -> GmailError {
    match error {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => {
            GmailError::OperationCancelled("prompt dismissed".to_string())
        }
        other => GmailError::Unknown(other.to_string()),
    }
}

/// Ask the user to confirm; `false` means they declined
pub fn confirm_deletion(preview: &PreviewResult, safety: &SafetyConfig) -> Result<bool> {
    for step in confirmation_steps(preview.match_count, safety) {
        let accepted = match step {
            ConfirmationStep::LargeDeletion => Confirm::new(&format!(
                "This moves {} messages to trash (more than {}). Continue?",
                preview.match_count, safety.large_deletion_threshold
            ))
            .with_default(false)
            .prompt()
            .map_err(prompt_error)?,
            ConfirmationStep::TypeWord => {
                let answer = Text::new(&format!(
                    "Type {} to move {} messages to trash:",
                    CONFIRMATION_WORD, preview.match_count
                ))
                .prompt()
                .map_err(prompt_error)?;
                answer.trim() == CONFIRMATION_WORD
            }
            ConfirmationStep::YesNo => Confirm::new(&format!(
                "Move {} messages to trash?",
                preview.match_count
            ))
            .with_default(false)
            .prompt()
            .map_err(prompt_error)?,
        };

        if !accepted {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Confirm `preview` and run the deletion to its end
///
/// Returns `None` when the user declined.
pub async fn delete_confirmed(
    ctx: &DeleteContext<'_>,
    mut preview: PreviewResult,
    skip_prompts: bool,
) -> Result<Option<DeletionOutcome>> {
    loop {
        if preview.match_count == 0 {
            println!("Nothing to delete.");
            ctx.session.cancel();
            return Ok(None);
        }

        if !skip_prompts {
            ctx.reporter.clear();
            if !confirm_deletion(&preview, &ctx.config.safety)? {
                ctx.session.cancel();
                println!("Deletion aborted; no messages were touched.");
                return Ok(None);
            }
        }

        match ctx.session.confirm_and_delete(&preview).await {
            Ok(stream) => {
                let outcome = drive_deletion(ctx, &preview, stream).await;
                return Ok(Some(outcome));
            }
            Err(GmailError::StalePreview { fresh }) => {
                println!(
                    "The mailbox changed: {} messages now match '{}'.",
                    fresh.match_count, fresh.query
                );
                if skip_prompts {
                    return Err(GmailError::StalePreview { fresh });
                }
                preview = fresh;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Let the current batch finish
    Wait,
    Exit,
}

/// First Ctrl-C cancels the session cooperatively, the next one exits
struct InterruptHandler {
    session: Session,
    interrupts: u32,
}

impl InterruptHandler {
    fn new(session: Session) -> Self {
        Self {
            session,
            interrupts: 0,
        }
    }

    fn on_interrupt(&mut self) -> InterruptAction {
        self.interrupts += 1;
        if self.interrupts > 1 {
            return InterruptAction::Exit;
        }
        if self.session.cancel() == CancelAck::Requested {
            warn!("Interrupt received; stopping after the current batch (Ctrl-C again to exit now)");
        }
        InterruptAction::Wait
    }
}

async fn drive_deletion(
    ctx: &DeleteContext<'_>,
    preview: &PreviewResult,
    mut stream: crate::workflow::DeletionStream,
) -> DeletionOutcome {
    let mut record = RunRecord::start(preview);

    let canceller = ctx.session.clone();
    let ctrl_c = tokio::spawn(async move {
        let mut interrupts = InterruptHandler::new(canceller);
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupts.on_interrupt() == InterruptAction::Exit {
                warn!("Second interrupt; exiting without waiting for the current batch");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        }
    });

    let bar = ctx
        .reporter
        .add_progress_bar(preview.match_count as u64, "Listing messages...");
    let mut outcome = None;

    while let Some(event) = stream.next().await {
        match event {
            DeletionEvent::Listed {
                total_messages,
                total_batches,
            } => {
                bar.set_length(total_messages as u64);
                bar.set_message(format!("0/{} batches", total_batches));
            }
            DeletionEvent::BatchCompleted(progress) => {
                bar.set_position((progress.deleted + progress.failed) as u64);
                bar.set_message(format!(
                    "{}/{} batches, {} failed",
                    progress.batches_completed, progress.batches_total, progress.failed
                ));
            }
            DeletionEvent::Finished(finished) => outcome = Some(finished),
        }
    }
    ctrl_c.abort();

    let outcome = outcome.unwrap_or_else(|| {
        DeletionOutcome::Failed {
            error: GmailError::Unknown("deletion ended without a result".to_string()),
            report: Default::default(),
        }
    });
    bar.finish_with_message(outcome.label().to_string());

    record.finish(&outcome);
    if let Err(e) = History::append(ctx.history_file, record).await {
        warn!("Could not record run history: {}", e);
    }
    outcome
}

pub fn print_report(outcome: &DeletionOutcome) {
    let report = outcome.report();

    println!("\n========================================");
    println!("Deletion {}", outcome.label());
    println!("========================================");
    println!("Requested:        {}", report.requested);
    println!("Moved to trash:   {}", report.deleted);
    println!("Failed:           {}", report.failed);

    if let DeletionOutcome::Failed { error, .. } = outcome {
        println!("Error:            {}", error);
    }

    if report.has_failures() {
        println!("\nFailed messages:");
        for failure in report.errors.iter().take(20) {
            println!("  - {} ({})", failure.message_id, failure.reason);
        }
        if report.errors.len() > 20 {
            println!("  ... and {} more", report.errors.len() - 20);
        }
    }
    println!("========================================");
}

pub fn print_presets() {
    for (group, presets) in presets::grouped() {
        println!("\n{}", group.title());
        for preset in presets {
            let query = query::build(&preset.filter)
                .map(|q| q.to_string())
                .unwrap_or_else(|e| e.to_string());
            println!("  {:<22} {:<40} {}", preset.key, preset.description, query);
        }
    }
}

struct PresetChoice(Preset);

impl fmt::Display for PresetChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.group.title(), self.0.description)
    }
}

const PICK_PRESET: &str = "Use a preset";
const PICK_BUILD: &str = "Build a filter";
const PICK_RAW: &str = "Enter a Gmail search query";

fn optional_text(prompt: &str) -> Result<Option<String>> {
    let value = Text::new(prompt)
        .with_help_message("leave empty to skip")
        .prompt()
        .map_err(prompt_error)?;
    Ok(Some(value).filter(|v| !v.trim().is_empty()))
}

fn build_selection_interactively() -> Result<FilterSelection> {
    let mut categories = vec!["any".to_string()];
    categories.extend(Category::ALL.iter().map(|c| c.to_string()));
    let category = Select::new("Category:", categories)
        .prompt()
        .map_err(prompt_error)?;

    let mut ages = vec!["any".to_string()];
    ages.extend(AgeThreshold::ALL.iter().map(|a| a.to_string()));
    let older_than = Select::new("Older than:", ages)
        .prompt()
        .map_err(prompt_error)?;

    let unset_any = |value: String| Some(value).filter(|v| v != "any");

    Ok(FilterSelection {
        category: unset_any(category),
        older_than: unset_any(older_than),
        sender: optional_text("From (address or domain):")?,
        label: optional_text("Label:")?,
        keyword: optional_text("Keyword:")?,
        has_attachment: Confirm::new("Only messages with attachments?")
            .with_default(false)
            .prompt()
            .map_err(prompt_error)?,
        raw_query: None,
    })
}

fn pick_filter() -> Result<FilterSpec> {
    let mode = Select::new("How do you want to choose messages?", vec![PICK_PRESET, PICK_BUILD, PICK_RAW])
        .prompt()
        .map_err(prompt_error)?;

    match mode {
        PICK_PRESET => {
            let choices: Vec<PresetChoice> = presets::grouped()
                .into_iter()
                .flat_map(|(_, presets)| presets)
                .map(PresetChoice)
                .collect();
            let choice = Select::new("Preset:", choices)
                .with_page_size(12)
                .prompt()
                .map_err(prompt_error)?;
            Ok(choice.0.filter)
        }
        PICK_BUILD => FilterSpec::try_from(build_selection_interactively()?),
        _ => {
            let raw = Text::new("Gmail search query:").prompt().map_err(prompt_error)?;
            FilterSpec::try_from(FilterSelection {
                raw_query: Some(raw),
                ..Default::default()
            })
        }
    }
}

/// Picker loop: choose a filter, preview it, optionally delete, repeat
pub async fn run_interactive(ctx: &DeleteContext<'_>) -> Result<()> {
    loop {
        ctx.reporter.clear();
        let filter = match pick_filter() {
            Ok(filter) => filter,
            Err(GmailError::OperationCancelled(_)) => return Ok(()),
            Err(e @ GmailError::InvalidFilter(_)) => {
                println!("{}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        match preview(&ctx.session, &filter, ctx.reporter).await {
            Ok(result) => {
                if let Some(outcome) = delete_confirmed(ctx, result, false).await? {
                    print_report(&outcome);
                }
            }
            Err(e @ GmailError::InvalidFilter(_)) => println!("{}", e),
            Err(e) => return Err(e),
        }

        let again = Confirm::new("Run another filter?")
            .with_default(true)
            .prompt()
            .map_err(prompt_error)?;
        if !again {
            info!("Leaving interactive mode");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn safety(threshold: usize, typed: bool) -> SafetyConfig {
        SafetyConfig {
            large_deletion_threshold: threshold,
            require_typed_confirmation: typed,
        }
    }

    #[test]
    fn test_cli_parses_delete_flags() {
        let cli = Cli::try_parse_from([
            "gmail-bulk-delete",
            "delete",
            "--category",
            "promotions",
            "--older-than",
            "1y",
            "--yes",
        ])
        .unwrap();

        match cli.command {
            Commands::Delete { filter, yes } => {
                assert!(yes);
                let query = query::build(&filter.to_filter().unwrap()).unwrap();
                assert_eq!(query.as_str(), "category:promotions older_than:1y");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_raw_query_flag_wins() {
        let args = FilterArgs {
            query: Some("from:boss@example.com is:unread".to_string()),
            category: Some("social".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.to_filter().unwrap(),
            FilterSpec::raw("from:boss@example.com is:unread")
        );
    }

    #[test]
    fn test_preset_resolution() {
        let args = FilterArgs {
            preset: Some("cat_promotions".to_string()),
            ..Default::default()
        };
        let query = query::build(&args.to_filter().unwrap()).unwrap();
        assert_eq!(query.as_str(), "category:promotions");

        let unknown = FilterArgs {
            preset: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(unknown.to_filter(), Err(GmailError::InvalidFilter(_))));
    }

    #[test]
    fn test_preset_rejects_extra_flags() {
        let args = FilterArgs {
            preset: Some("cat_promotions".to_string()),
            has_attachment: true,
            ..Default::default()
        };
        assert!(matches!(args.to_filter(), Err(GmailError::InvalidFilter(_))));
    }

    #[test]
    fn test_bad_category_flag_is_invalid_filter() {
        let args = FilterArgs {
            category: Some("newsletters".to_string()),
            ..Default::default()
        };
        assert!(matches!(args.to_filter(), Err(GmailError::InvalidFilter(_))));
    }

    #[test]
    fn test_confirmation_steps() {
        assert_eq!(
            confirmation_steps(10, &safety(1000, true)),
            vec![ConfirmationStep::TypeWord]
        );
        assert_eq!(
            confirmation_steps(10, &safety(1000, false)),
            vec![ConfirmationStep::YesNo]
        );
        assert_eq!(
            confirmation_steps(1001, &safety(1000, true)),
            vec![ConfirmationStep::LargeDeletion, ConfirmationStep::TypeWord]
        );
        // threshold itself is not "large"
        assert_eq!(confirmation_steps(1000, &safety(1000, true)).len(), 1);
    }

    #[tokio::test]
    async fn test_second_interrupt_exits() {
        use crate::fake::InMemoryMailbox;

        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.add_messages("m", 3, &["is:read"]);
        let session = Session::new(mailbox, WorkflowSettings::default());
        let preview = session.request_preview(&FilterSpec::raw("is:read")).await.unwrap();
        let stream = session.confirm_and_delete(&preview).await.unwrap();

        let mut handler = InterruptHandler::new(session.clone());
        assert_eq!(handler.on_interrupt(), InterruptAction::Wait);
        assert_eq!(handler.on_interrupt(), InterruptAction::Exit);

        let events: Vec<DeletionEvent> = stream.collect().await;
        assert!(matches!(
            events.last(),
            Some(DeletionEvent::Finished(DeletionOutcome::Cancelled(_)))
        ));
    }

    #[test]
    fn test_status_defaults() {
        let cli = Cli::try_parse_from(["gmail-bulk-delete", "status"]).unwrap();
        assert_eq!(cli.history_file, PathBuf::from(DEFAULT_HISTORY_PATH));
        assert!(matches!(
            cli.command,
            Commands::Status {
                detailed: false,
                limit: 10
            }
        ));
    }
}
