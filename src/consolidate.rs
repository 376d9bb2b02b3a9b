//! Cross-provider deduplication and merge into the monthly consolidated folder

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::dedup::{ensure_unique, hash_file};
use crate::error::Result;
use crate::models::{ConsolidatedFile, ProviderRunResult};

/// Outcome of merging provider outputs
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    /// Winning files in processing order
    pub files: Vec<ConsolidatedFile>,
    /// Where each winner was copied, parallel to `files`
    pub copied_to: Vec<PathBuf>,
    pub total_before: usize,
    pub duplicates_removed: usize,
    /// Files that could not be read and were left out
    pub unreadable: usize,
    /// Winners that could not be copied into the consolidated folder
    pub copy_failed: usize,
}

impl ConsolidationReport {
    pub fn total_after(&self) -> usize {
        self.files.len()
    }
}

/// Content-hash index: first occurrence of a hash wins, later ones are rejected.
#[derive(Debug, Default)]
pub struct DedupIndex {
    entries: HashMap<String, ConsolidatedFile>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the hash was already claimed
    pub fn insert(&mut self, file: ConsolidatedFile) -> bool {
        if self.entries.contains_key(&file.content_hash) {
            return false;
        }
        self.entries.insert(file.content_hash.clone(), file);
        true
    }

    pub fn get(&self, content_hash: &str) -> Option<&ConsolidatedFile> {
        self.entries.get(content_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Move an existing consolidated directory aside and create an empty one.
///
/// Returns where the previous directory went, if there was one.
pub fn prepare_fresh_dir(dir: &Path, stamp: &str) -> Result<Option<PathBuf>> {
    let mut previous = None;
    if dir.exists() {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        let aside = ensure_unique(parent, &format!("{}.previous-{}", name, stamp))?;
        std::fs::rename(dir, &aside)?;
        info!("Moved previous consolidated output {:?} -> {:?}", dir, aside);
        previous = Some(aside);
    }
    std::fs::create_dir_all(dir)?;
    Ok(previous)
}

/// Copy every distinct file from the successful providers into `dest_dir`.
///
/// Providers are processed in their fixed order regardless of the order of
/// `results`. Losing duplicates stay where they are in the provider folder.
/// A name already used in `dest_dir` gets the provider name as prefix.
/// Unreadable sources and failed copies are counted and skipped.
pub fn consolidate(dest_dir: &Path, results: &[ProviderRunResult]) -> Result<ConsolidationReport> {
    merge_into(dest_dir, results, |source, dest| std::fs::copy(source, dest).map(|_| ()))
}

fn merge_into<F>(
    dest_dir: &Path,
    results: &[ProviderRunResult],
    mut copy: F,
) -> Result<ConsolidationReport>
where
    F: FnMut(&Path, &Path) -> std::io::Result<()>,
{
    std::fs::create_dir_all(dest_dir)?;

    let mut ordered: Vec<&ProviderRunResult> = results.iter().filter(|r| r.is_ok()).collect();
    ordered.sort_by_key(|r| r.provider());

    let mut report = ConsolidationReport::default();
    let mut index = DedupIndex::new();
    let mut used_names: HashSet<String> = HashSet::new();

    for result in ordered {
        let provider = result.provider();
        for source in result.files() {
            report.total_before += 1;

            let content_hash = match hash_file(source) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("[{}] skipping unreadable file {:?}: {}", provider, source, e);
                    report.unreadable += 1;
                    continue;
                }
            };

            if let Some(winner) = index.get(&content_hash) {
                debug!(
                    "[{}] {:?} duplicates {:?} from {}",
                    provider, source, winner.path, winner.source_provider
                );
                report.duplicates_removed += 1;
                continue;
            }

            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.pdf", &content_hash[..16]));
            let dest = if used_names.contains(&name) || dest_dir.join(&name).exists() {
                ensure_unique(dest_dir, &format!("{}_{}", provider, name))
            } else {
                Ok(dest_dir.join(&name))
            };

            // A failed copy leaves the hash unclaimed so a later identical file can still win.
            let copied = dest.and_then(|dest| {
                copy(source, &dest)?;
                Ok(dest)
            });
            let dest = match copied {
                Ok(dest) => dest,
                Err(e) => {
                    warn!(
                        "[{}] could not copy {:?} into {:?}: {}",
                        provider, source, dest_dir, e
                    );
                    report.copy_failed += 1;
                    continue;
                }
            };

            let candidate = ConsolidatedFile {
                content_hash,
                source_provider: provider,
                path: source.clone(),
            };
            index.insert(candidate.clone());
            if let Some(dest_name) = dest.file_name() {
                used_names.insert(dest_name.to_string_lossy().into_owned());
            }
            report.files.push(candidate);
            report.copied_to.push(dest);
        }
    }

    info!(
        "Consolidated into {:?}: before={}, after={}, duplicates={}, unreadable={}, copy_failed={}",
        dest_dir,
        report.total_before,
        report.total_after(),
        report.duplicates_removed,
        report.unreadable,
        report.copy_failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvoiceError;
    use crate::models::Provider;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_identical_files_attributed_to_gmail() {
        let temp = TempDir::new().unwrap();
        let gmail = temp.path().join("gmail");
        let outlook = temp.path().join("outlook");
        let g = write(&gmail, "bill.pdf", b"SAME");
        let o = write(&outlook, "copy.pdf", b"SAME");

        // Outlook listed first on purpose; gmail must still win.
        let results = vec![
            ProviderRunResult::succeeded(Provider::Outlook, outlook.clone(), vec![o.clone()]),
            ProviderRunResult::succeeded(Provider::Gmail, gmail.clone(), vec![g.clone()]),
        ];
        let dest = temp.path().join("merged");
        let report = consolidate(&dest, &results).unwrap();

        assert_eq!(report.total_before, 2);
        assert_eq!(report.total_after(), 1);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.files[0].source_provider, Provider::Gmail);
        assert!(dest.join("bill.pdf").exists());
        assert!(!dest.join("copy.pdf").exists());
        // Loser is left in place.
        assert!(o.exists());
    }

    #[test]
    fn test_name_collision_gets_provider_prefix() {
        let temp = TempDir::new().unwrap();
        let gmail = temp.path().join("gmail");
        let outlook = temp.path().join("outlook");
        let g = write(&gmail, "invoice.pdf", b"A");
        let o = write(&outlook, "invoice.pdf", b"B");

        let results = vec![
            ProviderRunResult::succeeded(Provider::Gmail, gmail, vec![g]),
            ProviderRunResult::succeeded(Provider::Outlook, outlook, vec![o]),
        ];
        let dest = temp.path().join("merged");
        consolidate(&dest, &results).unwrap();

        assert_eq!(std::fs::read(dest.join("invoice.pdf")).unwrap(), b"A");
        assert_eq!(std::fs::read(dest.join("outlook_invoice.pdf")).unwrap(), b"B");
    }

    #[test]
    fn test_failed_providers_are_ignored() {
        let temp = TempDir::new().unwrap();
        let gmail = temp.path().join("gmail");
        let results = vec![ProviderRunResult::failed(
            Provider::Gmail,
            gmail,
            &InvoiceError::ProviderAuthRequired {
                provider: Provider::Gmail,
            },
        )];
        let report = consolidate(&temp.path().join("merged"), &results).unwrap();
        assert_eq!(report.total_before, 0);
        assert_eq!(report.total_after(), 0);
    }

    #[test]
    fn test_zero_byte_files_dedupe_like_any_other() {
        let temp = TempDir::new().unwrap();
        let gmail = temp.path().join("gmail");
        let a = write(&gmail, "a.pdf", b"");
        let b = write(&gmail, "b.pdf", b"");
        let results = vec![ProviderRunResult::succeeded(Provider::Gmail, gmail, vec![a, b])];

        let report = consolidate(&temp.path().join("merged"), &results).unwrap();
        assert_eq!(report.total_after(), 1);
        assert_eq!(report.duplicates_removed, 1);
    }

    #[test]
    fn test_unreadable_source_is_counted_and_skipped() {
        let temp = TempDir::new().unwrap();
        let gmail = temp.path().join("gmail");
        let a = write(&gmail, "a.pdf", b"A");
        let gone = gmail.join("gone.pdf");
        let results = vec![ProviderRunResult::succeeded(Provider::Gmail, gmail, vec![a, gone])];

        let report = consolidate(&temp.path().join("merged"), &results).unwrap();
        assert_eq!(report.total_before, 2);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.total_after(), 1);
        assert_eq!(report.duplicates_removed, 0);
    }

    #[test]
    fn test_failed_copy_is_counted_and_later_files_still_merge() {
        let temp = TempDir::new().unwrap();
        let gmail = temp.path().join("gmail");
        let outlook = temp.path().join("outlook");
        let a = write(&gmail, "a.pdf", b"A");
        let shared = write(&gmail, "shared.pdf", b"SAME");
        let same = write(&outlook, "same.pdf", b"SAME");
        let results = vec![
            ProviderRunResult::succeeded(Provider::Gmail, gmail, vec![a, shared.clone()]),
            ProviderRunResult::succeeded(Provider::Outlook, outlook, vec![same.clone()]),
        ];

        let dest = temp.path().join("merged");
        let report = merge_into(&dest, &results, |source, target| {
            if source == shared.as_path() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "No space left on device",
                ));
            }
            std::fs::copy(source, target).map(|_| ())
        })
        .unwrap();

        assert_eq!(report.total_before, 3);
        assert_eq!(report.copy_failed, 1);
        assert_eq!(report.duplicates_removed, 0);
        assert_eq!(report.total_after(), 2);
        // The outlook copy of the same content takes the slot the failed copy left.
        assert_eq!(report.files[1].source_provider, Provider::Outlook);
        assert_eq!(report.files[1].path, same);
        assert!(dest.join("a.pdf").exists());
        assert!(dest.join("same.pdf").exists());
        assert!(!dest.join("shared.pdf").exists());
    }

    #[test]
    fn test_prepare_fresh_dir_moves_previous_aside() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("invoices_12_2025");
        write(&dir, "old.pdf", b"old");

        let previous = prepare_fresh_dir(&dir, "20260101120000").unwrap().unwrap();
        assert!(previous.join("old.pdf").exists());
        assert!(dir.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        assert_eq!(
            previous.file_name().unwrap(),
            "invoices_12_2025.previous-20260101120000"
        );
    }

    #[test]
    fn test_dedup_index_first_wins() {
        let mut index = DedupIndex::new();
        let first = ConsolidatedFile {
            content_hash: "abc".to_string(),
            source_provider: Provider::Gmail,
            path: PathBuf::from("g/a.pdf"),
        };
        let second = ConsolidatedFile {
            content_hash: "abc".to_string(),
            source_provider: Provider::Outlook,
            path: PathBuf::from("o/a.pdf"),
        };
        assert!(index.insert(first.clone()));
        assert!(!index.insert(second));
        assert_eq!(index.get("abc"), Some(&first));
        assert_eq!(index.len(), 1);
    }
}
