//! Common test utilities and fixtures

#![allow(dead_code)]

use mockall::mock;
use monthly_invoices::error::{InvoiceError, Result};
use monthly_invoices::fetcher::{FetchReport, FetchRequest, InvoiceFetcher};
use monthly_invoices::models::Provider;
use monthly_invoices::window::DateWindow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// Mock implementation of InvoiceFetcher for testing
mock! {
    pub Fetcher {}

    #[async_trait::async_trait]
    impl InvoiceFetcher for Fetcher {
        fn provider(&self) -> Provider;
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport>;
    }
}

/// The December 2025 window used throughout the scenarios
pub fn december_2025() -> DateWindow {
    DateWindow::for_month(2025, 12).unwrap()
}

/// Write a file, creating parent folders as needed
pub fn write_invoice(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Names of the regular files directly inside `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Fetcher that writes the given files into its output directory and succeeds
pub fn writing_fetcher(provider: Provider, files: &[(&str, &[u8])]) -> MockFetcher {
    let files: Vec<(String, Vec<u8>)> = files
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_vec()))
        .collect();

    let mut mock = MockFetcher::new();
    mock.expect_provider().return_const(provider);
    mock.expect_fetch().times(1).returning(move |request| {
        let written = files
            .iter()
            .map(|(name, content)| write_invoice(&request.output_dir, name, content))
            .collect();
        Ok(FetchReport { files: written })
    });
    mock
}

/// Fetcher whose single call fails with the error built by `make_error`
pub fn failing_fetcher<F>(provider: Provider, make_error: F) -> MockFetcher
where
    F: Fn() -> InvoiceError + Send + Sync + 'static,
{
    let mut mock = MockFetcher::new();
    mock.expect_provider().return_const(provider);
    mock.expect_fetch()
        .times(1)
        .returning(move |_| Err(make_error()));
    mock
}

pub fn auth_required(provider: Provider) -> InvoiceError {
    InvoiceError::ProviderAuthRequired { provider }
}

/// Fetcher that appends its provider to `log` when called
pub fn recording_fetcher(provider: Provider, log: Arc<Mutex<Vec<Provider>>>) -> MockFetcher {
    let mut mock = MockFetcher::new();
    mock.expect_provider().return_const(provider);
    mock.expect_fetch().times(1).returning(move |request| {
        log.lock().unwrap().push(request.provider);
        Ok(FetchReport::default())
    });
    mock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_invoice_creates_parents() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_invoice(temp.path(), "nested/a.pdf", b"A");
        assert!(path.exists());
        assert_eq!(file_names(&temp.path().join("nested")), vec!["a.pdf"]);
    }

    #[test]
    fn test_december_window() {
        let window = december_2025();
        assert_eq!(window.label(), "12_2025");
    }
}
