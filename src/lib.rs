//! Monthly Invoice Acquisition
//!
//! Pulls one calendar month of invoice attachments from every configured mail
//! provider, removes duplicates, and merges the survivors into a single
//! folder with a machine-readable run summary.
//!
//! # Overview
//!
//! - **Window**: resolve the target month into a half-open date interval
//! - **Fetching**: run one fetcher per provider, in parallel or in sequence
//! - **Deduplication**: content-hash duplicates inside and across providers
//! - **Consolidation**: copy distinct files into `invoices_MM_YYYY/`
//! - **Summary**: atomically write `run_summary.json`
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use monthly_invoices::{config::Config, fetcher::CommandFetcher};
//! use monthly_invoices::orchestrator::{Orchestrator, OrchestratorSettings, RunRequest};
//! use monthly_invoices::{DateWindow, Provider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("invoices.toml".as_ref()).await?;
//!     let gmail = CommandFetcher::from_config(
//!         Provider::Gmail,
//!         config.providers.get(Provider::Gmail),
//!         None,
//!         None,
//!         config.consolidation.scan_filter(),
//!     )?;
//!
//!     let orchestrator = Orchestrator::new(OrchestratorSettings::from_config(&config))
//!         .with_fetcher(Arc::new(gmail));
//!     let window = DateWindow::for_month(2025, 12)?;
//!     let outcome = orchestrator
//!         .run(&RunRequest::new(window, vec![Provider::Gmail], "invoices"))
//!         .await?;
//!     println!("{}", outcome.summary);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`window`] - Month window resolution and injectable clock
//! - [`fetcher`] - Fetcher trait and the external-command implementation
//! - [`orchestrator`] - Fan-out, join, consolidation and summary for one run
//! - [`dedup`] - Directory walking, hashing and intra-provider deduplication
//! - [`consolidate`] - Cross-provider merge into the consolidated folder
//! - [`summary`] - `run_summary.json` model and atomic writer
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod cli;
pub mod config;
pub mod consolidate;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod summary;
pub mod window;

// Re-export commonly used types for convenience
pub use error::{InvoiceError, Result};

// Core data models
pub use models::{ConsolidatedFile, FetchMode, Provider, ProviderRunResult, ProviderStatus};

pub use window::{Clock, DateWindow, FixedClock, SystemClock};

pub use config::{Config, ConsolidationConfig, FetchConfig, ProviderCommandConfig, ProvidersConfig};

// Fetcher seam
pub use fetcher::{CommandFetcher, FetchReport, FetchRequest, InvoiceFetcher};

pub use orchestrator::{Orchestrator, OrchestratorSettings, RunOutcome, RunRequest};
pub use summary::RunSummary;

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter, RunArgs};
