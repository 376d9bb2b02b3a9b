use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use monthly_invoices::cli::{self, Cli, Commands, ProgressReporter};
use monthly_invoices::config::Config;
use monthly_invoices::error::InvoiceError;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Vec<u8>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Vec::new(),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let msg = String::from_utf8_lossy(&self.buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
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
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            display_error(&e);
            e.downcast_ref::<InvoiceError>()
                .map(InvoiceError::exit_code)
                .unwrap_or(1)
        }
    };
    process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("monthly_invoices=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("monthly_invoices=info,warn"))
    };

    // Logs print above the per-provider spinners
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

    match &cli.command {
        Commands::Run(args) => {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping fetchers...");
                    let _ = cancel_tx.send(true);
                }
            });

            let outcome =
                cli::run_monthly(&cli, args, (*multi_progress).clone(), cancel_rx).await?;

            multi_progress.suspend(|| {
                println!("\n{}", outcome.summary);
                println!("Consolidated folder: {}", outcome.consolidated_dir.display());
                if let Some(previous) = &outcome.previous_dir {
                    println!("Previous output moved to: {}", previous.display());
                }
            });

            if outcome.cancelled {
                tracing::warn!("Run was cancelled; the summary reflects completed providers only");
            } else if outcome.has_failures() {
                tracing::warn!(
                    "Some providers failed; see {}",
                    outcome.summary_path.display()
                );
            }

            Ok(outcome.exit_code(args.strict))
        }

        Commands::Dedupe {
            root,
            extensions,
            apply,
            move_to,
            match_numbered,
        } => {
            let config = Config::load(&cli.config).await?;
            let reporter = ProgressReporter::with_multi_progress((*multi_progress).clone());
            let spinner = reporter.add_spinner(&format!("Scanning {}...", root.display()));

            let outcome = cli::run_dedupe(
                root,
                extensions,
                &config.consolidation.skip_dirs,
                *apply,
                move_to.clone(),
                *match_numbered,
            )
            .await?;

            reporter.finish_spinner(
                &spinner,
                &format!(
                    "Scanned {} file(s), {} duplicate(s)",
                    outcome.scanned, outcome.duplicates
                ),
            );
            if outcome.applied {
                println!("Removed {} duplicate(s)", outcome.removed);
            } else if outcome.duplicates > 0 {
                println!("Dry run: re-run with --apply to remove them");
            }
            Ok(0)
        }

        Commands::Status {
            month,
            year,
            base_dir,
        } => {
            match cli::load_status(base_dir, *month, *year).await? {
                Some((path, summary)) => {
                    println!("{}", summary);
                    println!("Summary file: {}", path.display());
                }
                None => {
                    println!("No run summary found for that month under {}", base_dir.display());
                }
            }
            Ok(0)
        }

        Commands::Auth {
            provider,
            graph_client_id,
        } => {
            cli::run_auth(&cli, provider, graph_client_id.clone()).await?;
            println!("Authentication finished for {}", provider);
            Ok(0)
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(InvoiceError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - providers.outlook.client_id: Graph application id");
            println!("  - providers.*.token_cache: where each finder keeps its tokens");
            println!("  - fetch.timeout_secs: upper bound for a single provider");
            println!("  - consolidation.extensions: which files count as invoices");
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

    if let Some(invoice_err) = error.downcast_ref::<InvoiceError>() {
        match invoice_err {
            InvoiceError::InvalidDateSpec(_) => {
                eprintln!("\nHint: pass --month 1-12, optionally with a four-digit --year.");
            }
            InvoiceError::AllProvidersFailed { summary_path } => {
                eprintln!("\nHint: per-provider errors are listed in {:?}.", summary_path);
                eprintln!("      For AUTH_REQUIRED run: monthly-invoices auth <provider>");
            }
            InvoiceError::ProviderAuthRequired { provider } => {
                eprintln!("\nHint: run: monthly-invoices auth {}", provider);
            }
            InvoiceError::ConfigError(_) => {
                eprintln!("\nHint: check your configuration file for errors.");
                eprintln!("      Run: monthly-invoices init-config --force");
            }
            InvoiceError::SummaryWriteError(_) => {
                eprintln!("\nHint: invoices were consolidated but the summary is missing.");
                eprintln!("      Check free space and permissions, then re-run.");
            }
            _ => {}
        }
    } else {
        eprintln!("\nFor help, run: monthly-invoices --help");
    }
}
