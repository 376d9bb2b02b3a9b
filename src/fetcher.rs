//! Invoice fetchers: the seam between the orchestrator and the per-provider
//! download tools
//!
//! A fetcher downloads every invoice of one provider for one month window into
//! a directory it owns for the duration of the call. The production
//! implementation drives an external finder program; tests substitute a mock.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ProviderCommandConfig;
use crate::dedup::{iter_invoice_files, ScanFilter};
use crate::error::{InvoiceError, Result, AUTH_REQUIRED};
use crate::models::Provider;
use crate::window::DateWindow;

/// What a single fetcher call should download
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub provider: Provider,
    pub window: DateWindow,
    pub output_dir: PathBuf,
}

/// What a fetcher reports back once it has finished writing
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub files: Vec<PathBuf>,
}

/// Trait defining invoice download for one provider
#[async_trait]
pub trait InvoiceFetcher: Send + Sync {
    fn provider(&self) -> Provider;

    /// Download the window's invoices into `request.output_dir`.
    ///
    /// Missing or expired credentials must surface as
    /// [`InvoiceError::ProviderAuthRequired`]; any other failure as
    /// [`InvoiceError::ProviderFetchError`].
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport>;
}

/// Split a command-line fragment into arguments, honouring single quotes,
/// double quotes and backslash escapes.
pub fn split_args(raw: &str) -> Result<Vec<String>> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(InvoiceError::ConfigError(format!(
            "unterminated quote in arguments: {}",
            raw
        )));
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// Fetcher that runs an external finder program and waits for it
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    provider: Provider,
    program: String,
    base_args: Vec<String>,
    extra_args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    token_cache: Option<PathBuf>,
    client_id: Option<String>,
    authority: String,
    auth_args: Vec<String>,
    auth_required_exit_code: Option<i32>,
    filter: ScanFilter,
}

impl CommandFetcher {
    /// Build a fetcher from its config section.
    ///
    /// `extra_args` (from the CLI or environment) is appended after the
    /// section's own `extra_args`; `client_id` overrides the configured one.
    pub fn from_config(
        provider: Provider,
        section: &ProviderCommandConfig,
        extra_args: Option<&str>,
        client_id: Option<String>,
        filter: ScanFilter,
    ) -> Result<Self> {
        let client_id = client_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| section.client_id.clone());
        if provider == Provider::Outlook && client_id.is_none() {
            return Err(InvoiceError::ConfigError(
                "outlook requires a Graph client id (--graph-client-id, GRAPH_CLIENT_ID \
                 or providers.outlook.client_id)"
                    .to_string(),
            ));
        }

        let mut all_extra = section.extra_args.clone();
        if let Some(raw) = extra_args {
            all_extra.extend(split_args(raw)?);
        }

        Ok(Self {
            provider,
            program: section.program().to_string(),
            base_args: section.base_args(provider),
            extra_args: all_extra,
            env: section.env.clone(),
            working_dir: section.working_dir.clone(),
            token_cache: section.token_cache.clone(),
            client_id,
            authority: section.authority().to_string(),
            auth_args: section.auth_args.clone(),
            auth_required_exit_code: section.auth_required_exit_code,
            filter,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Flags identifying the account, shared by fetch and auth runs
    fn account_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.provider == Provider::Outlook {
            if let Some(client_id) = &self.client_id {
                args.push("--client-id".to_string());
                args.push(client_id.clone());
            }
            args.push("--authority".to_string());
            args.push(self.authority.clone());
        }
        if let Some(cache) = &self.token_cache {
            args.push(ProviderCommandConfig::token_cache_flag(self.provider).to_string());
            args.push(cache.display().to_string());
        }
        args
    }

    /// Full argument list for a fetch of `request`
    pub fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let dir = &request.output_dir;
        let p = self.provider;

        let mut args = self.base_args.clone();
        args.extend([
            "--start-date".to_string(),
            request.window.start().format("%Y-%m-%d").to_string(),
            "--end-date".to_string(),
            request.window.end().format("%Y-%m-%d").to_string(),
            "--invoices-dir".to_string(),
            dir.display().to_string(),
            "--download-report".to_string(),
            dir.join(format!("download_report_{}.json", p)).display().to_string(),
            "--save-json".to_string(),
            dir.join(format!("invoices_{}.json", p)).display().to_string(),
            "--save-csv".to_string(),
            dir.join(format!("invoices_{}.csv", p)).display().to_string(),
        ]);
        args.extend(self.account_args());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Argument list for an interactive credential bootstrap
    pub fn build_auth_args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(self.account_args());
        args.extend(self.auth_args.iter().cloned());
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(cwd) = &self.working_dir {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    /// Run the finder attached to the terminal so the user can complete a
    /// login flow and seed the token cache.
    pub async fn bootstrap_auth(&self) -> Result<()> {
        let args = self.build_auth_args();
        info!("[{}] starting auth bootstrap: {} {}", self.provider, self.program, args.join(" "));

        let status = self
            .command(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(InvoiceError::ProviderFetchError {
                provider: self.provider,
                message: format!("auth bootstrap {}", describe_status(status)),
            })
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> InvoiceError {
        InvoiceError::ProviderFetchError {
            provider: self.provider,
            message: format!("failed to start {}: {}", self.program, e),
        }
    }

    fn classify_failure(&self, status: ExitStatus, saw_auth_marker: bool) -> InvoiceError {
        let auth_exit = self
            .auth_required_exit_code
            .map(|code| status.code() == Some(code))
            .unwrap_or(false);
        if saw_auth_marker || auth_exit {
            InvoiceError::ProviderAuthRequired {
                provider: self.provider,
            }
        } else {
            InvoiceError::ProviderFetchError {
                provider: self.provider,
                message: format!("{} {}", self.program, describe_status(status)),
            }
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Forward child output to the log. Returns whether an auth marker was seen.
async fn forward_lines<R>(provider: Provider, reader: Option<R>, stderr: bool) -> bool
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return false;
    };

    // Drain to EOF whatever the bytes are; closing the pipe early kills the finder.
    let mut saw_auth = false;
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("[{}] output stream closed: {}", provider, e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.contains(AUTH_REQUIRED) {
            saw_auth = true;
        }
        if stderr {
            warn!("[{}] {}", provider, line);
        } else {
            info!("[{}] {}", provider, line);
        }
    }
    saw_auth
}

#[async_trait]
impl InvoiceFetcher for CommandFetcher {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport> {
        let args = self.build_args(request);
        debug!("[{}] running {} {}", self.provider, self.program, args.join(" "));

        let mut child = self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, auth_out, auth_err) = tokio::join!(
            child.wait(),
            forward_lines(self.provider, stdout, false),
            forward_lines(self.provider, stderr, true),
        );
        let status = status.map_err(|e| InvoiceError::ProviderFetchError {
            provider: self.provider,
            message: format!("failed waiting for {}: {}", self.program, e),
        })?;

        if !status.success() {
            return Err(self.classify_failure(status, auth_out || auth_err));
        }

        let dir = request.output_dir.clone();
        let filter = self.filter.clone();
        let files = tokio::task::spawn_blocking(move || iter_invoice_files(&dir, &filter))
            .await
            .map_err(|e| InvoiceError::ProviderFetchError {
                provider: self.provider,
                message: format!("listing task failed: {}", e),
            })??;

        info!("[{}] finder finished, {} invoice file(s)", self.provider, files.len());
        Ok(FetchReport { files })
    }
}
