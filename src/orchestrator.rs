//! Monthly run orchestration: fan out to the provider fetchers, wait for all of
//! them, then deduplicate, consolidate and write the run summary.

use chrono::Local;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::consolidate::{consolidate, prepare_fresh_dir, ConsolidationReport};
use crate::dedup::{dedupe_provider_dir, iter_invoice_files, ScanFilter};
use crate::error::{InvoiceError, Result};
use crate::fetcher::{FetchRequest, InvoiceFetcher};
use crate::models::{FetchMode, Provider, ProviderRunResult};
use crate::summary::RunSummary;
use crate::window::DateWindow;

/// Lifecycle notifications for one provider, used to drive progress display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Started(Provider),
    Finished { provider: Provider, ok: bool, files: usize },
}

pub type EventCallback = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Tunables for a run that do not change between months
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timeout: Duration,
    pub filter: ScanFilter,
    pub dedupe_within_provider: bool,
    pub match_numbered_copies: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            filter: config.consolidation.scan_filter(),
            dedupe_within_provider: config.consolidation.dedupe_within_provider,
            match_numbered_copies: config.consolidation.match_numbered_copies,
        }
    }
}

/// One month's run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub window: DateWindow,
    pub providers: Vec<Provider>,
    pub base_dir: PathBuf,
    pub mode: FetchMode,
    /// Flips to `true` when the run should be abandoned
    pub cancel: Option<watch::Receiver<bool>>,
}

impl RunRequest {
    pub fn new(window: DateWindow, providers: Vec<Provider>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            window,
            providers,
            base_dir: base_dir.into(),
            mode: FetchMode::default(),
            cancel: None,
        }
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub summary_path: PathBuf,
    pub consolidated_dir: PathBuf,
    /// Where an earlier consolidated directory for the same month was moved
    pub previous_dir: Option<PathBuf>,
    pub results: Vec<ProviderRunResult>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.is_ok())
    }

    /// Process exit code for a run that returned normally
    pub fn exit_code(&self, strict: bool) -> i32 {
        if self.cancelled {
            InvoiceError::Cancelled.exit_code()
        } else if strict && self.has_failures() {
            5
        } else {
            0
        }
    }
}

pub struct Orchestrator {
    fetchers: BTreeMap<Provider, Arc<dyn InvoiceFetcher>>,
    settings: OrchestratorSettings,
    on_event: Option<EventCallback>,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            fetchers: BTreeMap::new(),
            settings,
            on_event: None,
        }
    }

    /// Register the fetcher for its provider, replacing any previous one
    pub fn with_fetcher(mut self, fetcher: Arc<dyn InvoiceFetcher>) -> Self {
        self.fetchers.insert(fetcher.provider(), fetcher);
        self
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn emit(&self, event: ProviderEvent) {
        if let Some(callback) = &self.on_event {
            callback(&event);
        }
    }

    /// Execute a monthly run.
    ///
    /// Provider failures are recorded in the outcome. The only errors returned
    /// are whole-run failures: bad input, directory setup, summary write, and
    /// [`InvoiceError::AllProvidersFailed`] once its summary is on disk.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let mut providers = request.providers.clone();
        providers.sort();
        providers.dedup();
        if providers.is_empty() {
            return Err(InvoiceError::ConfigError("no providers requested".to_string()));
        }
        for provider in &providers {
            if !self.fetchers.contains_key(provider) {
                return Err(InvoiceError::ConfigError(format!(
                    "no fetcher configured for {}",
                    provider
                )));
            }
        }

        info!(
            "Fetching invoices for {} from {} ({:?})",
            request.window,
            providers.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", "),
            request.mode
        );

        let mut jobs = Vec::with_capacity(providers.len());
        for provider in providers {
            let dir = request.base_dir.join(request.window.provider_dir_name(provider));
            tokio::fs::create_dir_all(&dir).await?;
            jobs.push((provider, dir));
        }

        let results = match request.mode {
            FetchMode::Parallel => {
                join_all(
                    jobs.into_iter()
                        .map(|(provider, dir)| self.fetch_one(request, provider, dir)),
                )
                .await
            }
            FetchMode::Sequential => {
                let mut results = Vec::with_capacity(jobs.len());
                for (provider, dir) in jobs {
                    results.push(self.fetch_one(request, provider, dir).await);
                }
                results
            }
        };

        let cancelled = request.is_cancelled();
        if cancelled {
            warn!("Run cancelled; consolidating whatever completed");
        }

        let consolidated_dir = request.base_dir.join(request.window.consolidated_dir_name());
        let (previous_dir, report) = self.consolidate(&consolidated_dir, &results).await?;

        let summary = RunSummary::build(request.window, &results, &report);
        let summary_path = summary.write(&consolidated_dir).await?;

        for result in results.iter().filter(|r| !r.is_ok()) {
            warn!(
                "[{}] failed: {}",
                result.provider(),
                result.error().unwrap_or("unknown error")
            );
        }

        if summary.all_failed() && !cancelled {
            return Err(InvoiceError::AllProvidersFailed { summary_path });
        }

        Ok(RunOutcome {
            summary,
            summary_path,
            consolidated_dir,
            previous_dir,
            results,
            cancelled,
        })
    }

    async fn fetch_one(
        &self,
        request: &RunRequest,
        provider: Provider,
        dir: PathBuf,
    ) -> ProviderRunResult {
        // Checked in run()
        let Some(fetcher) = self.fetchers.get(&provider).cloned() else {
            let error = InvoiceError::ConfigError(format!("no fetcher configured for {}", provider));
            return ProviderRunResult::failed(provider, dir, &error);
        };

        let fetch_request = FetchRequest {
            provider,
            window: request.window,
            output_dir: dir.clone(),
        };
        let timeout = self.settings.timeout;

        self.emit(ProviderEvent::Started(provider));
        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(request.cancel.clone()) => Err(InvoiceError::Cancelled),
            fetched = tokio::time::timeout(timeout, fetcher.fetch(&fetch_request)) => match fetched {
                Ok(result) => result,
                Err(_) => Err(InvoiceError::ProviderFetchError {
                    provider,
                    message: format!("timed out after {}s", timeout.as_secs()),
                }),
            },
        };

        let result = match outcome {
            Ok(report) => {
                debug!("[{}] fetcher reported {} file(s)", provider, report.files.len());
                match self.collect_files(&dir).await {
                    Ok(files) => ProviderRunResult::succeeded(provider, dir, files),
                    Err(e) => {
                        let error = InvoiceError::ProviderFetchError {
                            provider,
                            message: format!("failed to read {:?}: {}", dir, e),
                        };
                        ProviderRunResult::failed(provider, dir, &error)
                    }
                }
            }
            Err(e) => {
                if !e.is_provider_scoped() {
                    warn!("[{}] unexpected error from fetcher: {}", provider, e);
                }
                ProviderRunResult::failed(provider, dir, &e)
            }
        };

        self.emit(ProviderEvent::Finished {
            provider,
            ok: result.is_ok(),
            files: result.files().len(),
        });
        result
    }

    /// Deduplicate a provider directory in place and list what survives
    async fn collect_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let dir = dir.to_path_buf();
        let filter = self.settings.filter.clone();
        let dedupe = self.settings.dedupe_within_provider;
        let numbered = self.settings.match_numbered_copies;

        tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            if dedupe {
                dedupe_provider_dir(&dir, &filter, numbered)?;
            }
            iter_invoice_files(&dir, &filter)
        })
        .await
        .map_err(std::io::Error::from)?
    }

    async fn consolidate(
        &self,
        dest: &Path,
        results: &[ProviderRunResult],
    ) -> Result<(Option<PathBuf>, ConsolidationReport)> {
        let dest = dest.to_path_buf();
        let results = results.to_vec();
        let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();

        tokio::task::spawn_blocking(move || -> Result<(Option<PathBuf>, ConsolidationReport)> {
            let previous = prepare_fresh_dir(&dest, &stamp)?;
            let report = consolidate(&dest, &results)?;
            Ok((previous, report))
        })
        .await
        .map_err(std::io::Error::from)?
    }
}

/// Resolves once the signal reads `true`; never resolves without a signal
async fn wait_cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
