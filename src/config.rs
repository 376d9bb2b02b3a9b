use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dedup::{ScanFilter, DEFAULT_SKIP_DIRS};
use crate::error::{InvoiceError, Result};
use crate::models::{FetchMode, Provider};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Upper bound on a single fetcher run
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub sequential: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            sequential: false,
        }
    }
}

impl FetchConfig {
    pub fn mode(&self) -> FetchMode {
        if self.sequential {
            FetchMode::Sequential
        } else {
            FetchMode::Parallel
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    #[serde(default = "default_true")]
    pub dedupe_within_provider: bool,
    #[serde(default)]
    pub match_numbered_copies: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
            dedupe_within_provider: true,
            match_numbered_copies: false,
        }
    }
}

impl ConsolidationConfig {
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter::new(&self.extensions, &self.skip_dirs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gmail: ProviderCommandConfig,
    #[serde(default)]
    pub outlook: ProviderCommandConfig,
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> &ProviderCommandConfig {
        match provider {
            Provider::Gmail => &self.gmail,
            Provider::Outlook => &self.outlook,
        }
    }

    pub fn get_mut(&mut self, provider: Provider) -> &mut ProviderCommandConfig {
        match provider {
            Provider::Gmail => &mut self.gmail,
            Provider::Outlook => &mut self.outlook,
        }
    }
}

/// How to launch the external finder for one provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderCommandConfig {
    /// Executable, default `python3`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// Leading arguments, default runs the provider's finder module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Extra arguments appended after the generated ones
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Passed through to the finder untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cache: Option<PathBuf>,
    /// Arguments added for `auth` bootstrap runs
    #[serde(default)]
    pub auth_args: Vec<String>,
    /// Exit status the finder uses to signal missing credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_required_exit_code: Option<i32>,
    /// Graph application (client) id, outlook only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Graph authority, outlook only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

impl ProviderCommandConfig {
    pub fn program(&self) -> &str {
        self.program.as_deref().unwrap_or("python3")
    }

    pub fn base_args(&self, provider: Provider) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => {
                let module = match provider {
                    Provider::Gmail => "invplatform.cli.gmail_invoice_finder",
                    Provider::Outlook => "invplatform.cli.graph_invoice_finder",
                };
                vec!["-m".to_string(), module.to_string()]
            }
        }
    }

    pub fn authority(&self) -> &str {
        self.authority.as_deref().unwrap_or("consumers")
    }

    /// Flag the finder takes its token cache path under
    pub fn token_cache_flag(provider: Provider) -> &'static str {
        match provider {
            Provider::Gmail => "--token",
            Provider::Outlook => "--token-cache",
        }
    }
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

fn default_skip_dirs() -> Vec<String> {
    DEFAULT_SKIP_DIRS.iter().map(|d| d.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| InvoiceError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| InvoiceError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                InvoiceError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| InvoiceError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| InvoiceError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            return Err(InvoiceError::ConfigError(
                "fetch.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.fetch.timeout_secs > 86_400 {
            return Err(InvoiceError::ConfigError(
                "fetch.timeout_secs cannot exceed 86400 (24 hours)".to_string(),
            ));
        }

        if self.consolidation.extensions.is_empty() {
            return Err(InvoiceError::ConfigError(
                "consolidation.extensions cannot be empty".to_string(),
            ));
        }
        for ext in &self.consolidation.extensions {
            if ext.trim_start_matches('.').is_empty() {
                return Err(InvoiceError::ConfigError(
                    "consolidation.extensions cannot contain empty strings".to_string(),
                ));
            }
        }
        for dir in &self.consolidation.skip_dirs {
            if dir.is_empty() || dir.contains('/') || dir.contains('\\') {
                return Err(InvoiceError::ConfigError(format!(
                    "consolidation.skip_dirs entry '{}' must be a plain folder name",
                    dir
                )));
            }
        }

        for provider in Provider::ALL {
            let section = self.providers.get(provider);
            if section.program().trim().is_empty() {
                return Err(InvoiceError::ConfigError(format!(
                    "providers.{}.program cannot be empty",
                    provider
                )));
            }
            if section.authority().trim().is_empty() {
                return Err(InvoiceError::ConfigError(format!(
                    "providers.{}.authority cannot be empty",
                    provider
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        for provider in Provider::ALL {
            let section = config.providers.get_mut(provider);
            section.program = Some(section.program().to_string());
            section.args = Some(section.base_args(provider));
        }
        config.providers.outlook.authority = Some("consumers".to_string());
        config.providers.outlook.auth_args = vec!["--interactive-auth".to_string()];
        config.save(path).await
    }
}
