//! Command-line interface

use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::dedup::{plan_duplicates, remove_duplicates, DuplicateAction, ScanFilter};
use crate::error::{InvoiceError, Result};
use crate::fetcher::{CommandFetcher, InvoiceFetcher};
use crate::models::{parse_providers, Provider};
use crate::orchestrator::{Orchestrator, OrchestratorSettings, ProviderEvent, RunOutcome, RunRequest};
use crate::summary::{RunSummary, SUMMARY_FILE_NAME};
use crate::window::{DateWindow, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "monthly-invoices")]
#[command(version)]
#[command(about = "Fetch a month of invoices from every mailbox and merge them into one folder", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "invoices.toml", global = true)]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, deduplicate and consolidate one month of invoices
    Run(RunArgs),

    /// Find duplicate invoice files under a folder
    Dedupe {
        /// Folder to scan recursively
        root: PathBuf,

        /// File extensions to consider (repeatable)
        #[arg(long = "ext", default_value = "pdf")]
        extensions: Vec<String>,

        /// Actually remove duplicates (default is a dry run)
        #[arg(long)]
        apply: bool,

        /// Move duplicates here instead of deleting them
        #[arg(long)]
        move_to: Option<PathBuf>,

        /// Treat `name__2.pdf` as a copy of `name.pdf` regardless of content
        #[arg(long)]
        match_numbered: bool,
    },

    /// Show the run summary for a month
    Status {
        #[arg(long)]
        month: Option<u32>,

        #[arg(long)]
        year: Option<i32>,

        #[arg(long, default_value = "invoices")]
        base_dir: PathBuf,
    },

    /// Run a provider's finder interactively to seed its token cache
    Auth {
        /// gmail or outlook
        provider: String,

        /// Microsoft Graph application (client) id
        #[arg(long, env = "GRAPH_CLIENT_ID")]
        graph_client_id: Option<String>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "invoices.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Comma-separated providers (gmail, outlook)
    #[arg(long, default_value = "gmail,outlook")]
    pub providers: String,

    /// Month 1-12, defaults to the current month
    #[arg(long)]
    pub month: Option<u32>,

    /// Four-digit year, requires --month
    #[arg(long)]
    pub year: Option<i32>,

    /// Folder receiving provider and consolidated directories
    #[arg(long, default_value = "invoices")]
    pub base_dir: PathBuf,

    /// Extra arguments for the Gmail finder
    #[arg(long, env = "MONTHLY_GMAIL_ARGS", allow_hyphen_values = true)]
    pub gmail_extra_args: Option<String>,

    /// Extra arguments for the Graph finder
    #[arg(long, env = "MONTHLY_GRAPH_ARGS", allow_hyphen_values = true)]
    pub graph_extra_args: Option<String>,

    /// Microsoft Graph application (client) id
    #[arg(long, env = "GRAPH_CLIENT_ID")]
    pub graph_client_id: Option<String>,

    /// Run providers one after another instead of concurrently
    #[arg(long)]
    pub sequential: bool,

    /// Per-provider time limit in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Exit non-zero when any provider fails
    #[arg(long)]
    pub strict: bool,
}

impl RunArgs {
    /// Fold command-line overrides into the loaded configuration
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(secs) = self.timeout_secs {
            config.fetch.timeout_secs = secs;
        }
        if self.sequential {
            config.fetch.sequential = true;
        }
        config.validate()
    }

    fn extra_args_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Gmail => self.gmail_extra_args.as_deref(),
            Provider::Outlook => self.graph_extra_args.as_deref(),
        }
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the log writer so lines print above spinners
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one command fetcher per requested provider
pub fn build_fetchers(
    config: &Config,
    args: &RunArgs,
    providers: &[Provider],
) -> Result<Vec<Arc<dyn InvoiceFetcher>>> {
    let filter = config.consolidation.scan_filter();
    providers
        .iter()
        .map(|&provider| {
            let client_id = match provider {
                Provider::Outlook => args.graph_client_id.clone(),
                Provider::Gmail => None,
            };
            let fetcher = CommandFetcher::from_config(
                provider,
                config.providers.get(provider),
                args.extra_args_for(provider),
                client_id,
                filter.clone(),
            )?;
            Ok(Arc::new(fetcher) as Arc<dyn InvoiceFetcher>)
        })
        .collect()
}

/// Resolve inputs, build the fetchers and run one month end to end
pub async fn run_monthly(
    cli: &Cli,
    args: &RunArgs,
    multi: MultiProgress,
    cancel: watch::Receiver<bool>,
) -> Result<RunOutcome> {
    let window = DateWindow::resolve(args.month, args.year, &SystemClock)?;
    let providers = parse_providers(&args.providers)?;

    let mut config = Config::load(&cli.config).await?;
    args.apply_to(&mut config)?;

    let fetchers = build_fetchers(&config, args, &providers)?;

    let reporter = ProgressReporter::with_multi_progress(multi);
    let spinners: Arc<Mutex<BTreeMap<Provider, ProgressBar>>> =
        Arc::new(Mutex::new(BTreeMap::new()));
    for &provider in &providers {
        let pb = reporter.add_spinner(&format!("[{}] waiting...", provider));
        if let Ok(mut map) = spinners.lock() {
            map.insert(provider, pb);
        }
    }

    let progress = {
        let spinners = spinners.clone();
        let multi = reporter.multi_progress().clone();
        Arc::new(move |event: &ProviderEvent| {
            let Ok(map) = spinners.lock() else {
                return;
            };
            match event {
                ProviderEvent::Started(provider) => {
                    if let Some(pb) = map.get(provider) {
                        pb.set_message(format!("[{}] fetching invoices...", provider));
                    }
                }
                ProviderEvent::Finished { provider, ok, files } => {
                    if let Some(pb) = map.get(provider) {
                        pb.finish_and_clear();
                        let line = if *ok {
                            format!("  ✓ [{}] {} invoice file(s)", provider, files)
                        } else {
                            format!("  ✗ [{}] failed", provider)
                        };
                        let _ = multi.println(line);
                    }
                }
            }
        })
    };

    let mut orchestrator =
        Orchestrator::new(OrchestratorSettings::from_config(&config)).with_event_callback(progress);
    for fetcher in fetchers {
        orchestrator = orchestrator.with_fetcher(fetcher);
    }

    let request = RunRequest::new(window, providers, args.base_dir.clone())
        .with_mode(config.fetch.mode())
        .with_cancel(cancel);

    info!("Running monthly invoices for {}", window);
    let result = orchestrator.run(&request).await;

    // Clear anything left spinning if the run aborted early
    if let Ok(map) = spinners.lock() {
        for pb in map.values() {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
    }

    result
}

/// Outcome of the standalone `dedupe` command
#[derive(Debug, Clone, Default)]
pub struct DedupeOutcome {
    pub scanned: usize,
    pub duplicates: usize,
    pub removed: usize,
    pub applied: bool,
}

pub async fn run_dedupe(
    root: &Path,
    extensions: &[String],
    skip_dirs: &[String],
    apply: bool,
    move_to: Option<PathBuf>,
    match_numbered: bool,
) -> Result<DedupeOutcome> {
    if !root.is_dir() {
        return Err(InvoiceError::ConfigError(format!(
            "{:?} is not a directory",
            root
        )));
    }

    let root = root.to_path_buf();
    let filter = ScanFilter::new(extensions, skip_dirs);
    tokio::task::spawn_blocking(move || -> Result<DedupeOutcome> {
        let plan = plan_duplicates(&root, &filter, match_numbered)?;
        for dup in &plan.duplicates {
            println!("{} (duplicate of {})", dup.path.display(), dup.kept.display());
        }

        let mut outcome = DedupeOutcome {
            scanned: plan.scanned,
            duplicates: plan.duplicates.len(),
            removed: 0,
            applied: apply,
        };
        if apply {
            let action = match move_to {
                Some(dir) => DuplicateAction::MoveTo(dir),
                None => DuplicateAction::Delete,
            };
            outcome.removed = remove_duplicates(&plan, &action);
        }
        Ok(outcome)
    })
    .await
    .map_err(std::io::Error::from)?
}

/// Load the summary written for a month, if any
pub async fn load_status(
    base_dir: &Path,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<Option<(PathBuf, RunSummary)>> {
    let window = DateWindow::resolve(month, year, &SystemClock)?;
    let path = base_dir
        .join(window.consolidated_dir_name())
        .join(SUMMARY_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let summary = RunSummary::load(&path).await?;
    Ok(Some((path, summary)))
}

/// Bootstrap credentials for one provider
pub async fn run_auth(cli: &Cli, provider: &str, graph_client_id: Option<String>) -> Result<()> {
    let provider: Provider = provider.parse()?;
    let config = Config::load(&cli.config).await?;

    let fetcher = CommandFetcher::from_config(
        provider,
        config.providers.get(provider),
        None,
        graph_client_id,
        config.consolidation.scan_filter(),
    )?;
    fetcher.bootstrap_auth().await
}
