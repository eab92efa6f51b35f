use anyhow::Result;
use clap::Parser;
use gmail_bulk_delete::auth;
use gmail_bulk_delete::cli::{self, Cli, Commands, DeleteContext, ProgressReporter};
use gmail_bulk_delete::config::Config;
use gmail_bulk_delete::error::GmailError;
use gmail_bulk_delete::history::History;
use gmail_bulk_delete::workflow::DeletionOutcome;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            display_error(&e);
            eprintln!("\nFor help, run: gmail-bulk-delete --help");
            process::exit(1);
        }
    }
}

/// Exit code for a finished deletion
fn exit_code(outcome: &DeletionOutcome) -> i32 {
    match outcome {
        DeletionOutcome::Completed(report) if !report.has_failures() => 0,
        DeletionOutcome::Completed(_) => 2,
        DeletionOutcome::Cancelled(_) => cli::INTERRUPTED_EXIT_CODE,
        DeletionOutcome::Failed { .. } => 1,
    }
}

async fn run() -> Result<i32> {
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_bulk_delete=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_bulk_delete=info,warn"))
    };

    // Logs print above progress bars
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let reporter = ProgressReporter::new((*multi_progress).clone());

    match &cli.command {
        Commands::Auth { force } => {
            if *force && auth::clear_token_cache(&cli.token_cache).await? {
                println!("Removed cached token at {:?}", cli.token_cache);
            }

            let config = Config::load(&cli.config).await?;
            let client = cli::connect(&cli, &config, &reporter).await?;

            println!("Token cached at: {:?}", cli.token_cache);
            println!("Connected to account: {}", client.account_email().await?);
            Ok(0)
        }

        Commands::Presets => {
            cli::print_presets();
            Ok(0)
        }

        Commands::Preview { filter } => {
            let filter = filter.to_filter()?;
            let config = Config::load(&cli.config).await?;
            let session = cli::new_session(cli::connect(&cli, &config, &reporter).await?, &config);

            cli::preview(&session, &filter, &reporter).await?;
            Ok(0)
        }

        Commands::Delete { filter, yes } => {
            let filter = filter.to_filter()?;
            let config = Config::load(&cli.config).await?;
            let session = cli::new_session(cli::connect(&cli, &config, &reporter).await?, &config);

            let preview = cli::preview(&session, &filter, &reporter).await?;
            let ctx = DeleteContext {
                session,
                config: &config,
                history_file: &cli.history_file,
                reporter: &reporter,
            };

            match cli::delete_confirmed(&ctx, preview, *yes).await? {
                Some(outcome) => {
                    cli::print_report(&outcome);
                    Ok(exit_code(&outcome))
                }
                None => Ok(0),
            }
        }

        Commands::Interactive => {
            let config = Config::load(&cli.config).await?;
            let session = cli::new_session(cli::connect(&cli, &config, &reporter).await?, &config);
            let ctx = DeleteContext {
                session,
                config: &config,
                history_file: &cli.history_file,
                reporter: &reporter,
            };

            cli::run_interactive(&ctx).await?;
            Ok(0)
        }

        Commands::Status { detailed, limit } => {
            let history = History::load(&cli.history_file).await?;
            if history.records.is_empty() {
                println!("No deletion runs recorded yet.");
                println!("History file: {:?}", cli.history_file);
                return Ok(0);
            }

            println!("\n========================================");
            println!("Recent deletion runs");
            println!("========================================");
            for record in history.recent(*limit) {
                let outcome = record
                    .outcome
                    .map(|o| format!("{:?}", o).to_lowercase())
                    .unwrap_or_else(|| "unfinished".to_string());
                println!(
                    "{}  {:<10} {:>6} deleted {:>4} failed  {}",
                    record.started_at.format("%Y-%m-%d %H:%M:%S"),
                    outcome,
                    record.deleted,
                    record.failed,
                    record.query
                );

                if *detailed {
                    println!("    Run ID:   {}", record.run_id);
                    println!("    Previewed: {} matches", record.match_count);
                    if let Some(duration) = record.duration() {
                        println!("    Duration: {}s", duration.num_seconds());
                    }
                    if let Some(error) = &record.error {
                        println!("    Error:    {}", error);
                    }
                }
            }
            println!("========================================");
            println!("Total moved to trash: {}", history.total_deleted());
            Ok(0)
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;
            println!("Wrote default configuration to {:?}", output);
            Ok(0)
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(gmail_err) = error.downcast_ref::<GmailError>() {
        match gmail_err {
            GmailError::AuthError(_) => {
                eprintln!("\nHint: Your Gmail session is missing or expired.");
                eprintln!("      Make sure credentials.json comes from Google Cloud Console,");
                eprintln!("      then run: gmail-bulk-delete auth --force");
            }
            GmailError::InvalidFilter(_) => {
                eprintln!("\nHint: Check the filter flags, or list presets with: gmail-bulk-delete presets");
            }
            GmailError::RateLimitExceeded { .. } | GmailError::ServerError { .. } | GmailError::NetworkError(_) => {
                eprintln!("\nHint: Gmail is unavailable or throttling requests.");
                eprintln!("      Wait a minute and try again, or raise [retry] limits in config.");
            }
            GmailError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-bulk-delete init-config --force");
            }
            GmailError::StalePreview { .. } => {
                eprintln!("\nHint: The mailbox changed during confirmation; run the command again.");
            }
            _ => {}
        }
    }
}
