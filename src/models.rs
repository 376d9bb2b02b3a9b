use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{InvoiceError, Result};

/// Mail provider an invoice fetcher talks to.
///
/// The derived ordering (gmail before outlook) is the processing order for
/// sequential fetching and for cross-provider deduplication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Outlook,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Gmail, Provider::Outlook];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Outlook => "outlook",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gmail" => Ok(Provider::Gmail),
            "outlook" | "graph" | "msgraph" | "microsoft" => Ok(Provider::Outlook),
            other => Err(InvoiceError::UnknownProvider(other.to_string())),
        }
    }
}

/// Parse a comma-separated provider list.
///
/// Aliases are folded, duplicates dropped and the result put in processing
/// order. An empty list means every provider.
pub fn parse_providers(raw: &str) -> Result<Vec<Provider>> {
    let mut providers = Vec::new();
    for entry in raw.split(',') {
        if entry.trim().is_empty() {
            continue;
        }
        providers.push(entry.parse::<Provider>()?);
    }
    if providers.is_empty() {
        return Ok(Provider::ALL.to_vec());
    }
    providers.sort();
    providers.dedup();
    Ok(providers)
}

/// How fetchers are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Ok,
    Failed,
}

/// Outcome of one fetcher invocation
#[derive(Debug, Clone)]
pub struct ProviderRunResult {
    provider: Provider,
    status: ProviderStatus,
    output_dir: PathBuf,
    files: Vec<PathBuf>,
    error: Option<String>,
}

impl ProviderRunResult {
    pub fn succeeded(provider: Provider, output_dir: PathBuf, files: Vec<PathBuf>) -> Self {
        Self {
            provider,
            status: ProviderStatus::Ok,
            output_dir,
            files,
            error: None,
        }
    }

    pub fn failed(provider: Provider, output_dir: PathBuf, error: &InvoiceError) -> Self {
        Self {
            provider,
            status: ProviderStatus::Failed,
            output_dir,
            files: Vec::new(),
            error: Some(error.summary_message()),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn status(&self) -> ProviderStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ProviderStatus::Ok
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// A file selected for the consolidated directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedFile {
    /// Lowercase hex SHA-256 of the file content
    pub content_hash: String,
    pub source_provider: Provider,
    /// Location inside the provider directory the file was copied from
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_aliases() {
        assert_eq!("gmail".parse::<Provider>().unwrap(), Provider::Gmail);
        assert_eq!("Graph".parse::<Provider>().unwrap(), Provider::Outlook);
        assert_eq!(" msgraph ".parse::<Provider>().unwrap(), Provider::Outlook);
        assert_eq!("microsoft".parse::<Provider>().unwrap(), Provider::Outlook);
        assert!("yahoo".parse::<Provider>().is_err());
    }

    #[test]
    fn test_parse_providers_dedupes_and_orders() {
        assert_eq!(
            parse_providers("outlook,gmail,graph").unwrap(),
            vec![Provider::Gmail, Provider::Outlook]
        );
        assert_eq!(parse_providers("outlook").unwrap(), vec![Provider::Outlook]);
    }

    #[test]
    fn test_parse_providers_empty_means_all() {
        assert_eq!(parse_providers("").unwrap(), Provider::ALL.to_vec());
        assert_eq!(parse_providers(" , ").unwrap(), Provider::ALL.to_vec());
    }

    #[test]
    fn test_parse_providers_unknown_fails() {
        let result = parse_providers("gmail,unknown");
        assert!(matches!(result, Err(InvoiceError::UnknownProvider(name)) if name == "unknown"));
    }

    #[test]
    fn test_provider_serializes_lowercase() {
        let json = serde_json::to_string(&Provider::Outlook).unwrap();
        assert_eq!(json, "\"outlook\"");
    }

    #[test]
    fn test_failed_result_keeps_summary_message() {
        let result = ProviderRunResult::failed(
            Provider::Gmail,
            PathBuf::from("invoices/invoices_gmail_01_2025"),
            &InvoiceError::ProviderAuthRequired {
                provider: Provider::Gmail,
            },
        );
        assert!(!result.is_ok());
        assert_eq!(result.error(), Some("AUTH_REQUIRED"));
        assert!(result.files().is_empty());
    }
}
