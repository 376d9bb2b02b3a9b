//! Content-hash deduplication of invoice files inside a single directory tree
//!
//! Files are walked in path order so that "first seen wins" is reproducible.
//! Duplicates are never deleted by the provider-level pass; they are moved
//! into a `duplicates/` folder next to the originals for manual review.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// Folder that receives duplicates moved out of a provider directory
pub const DUPLICATES_DIR: &str = "duplicates";

/// Folders never scanned for invoices
pub const DEFAULT_SKIP_DIRS: &[&str] = &["_tmp", "quarantine", DUPLICATES_DIR];

const HASH_CHUNK_SIZE: usize = 1 << 20;

/// Trailing `__<n>` added to disambiguate repeated downloads
static NUMBERED_COPY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)__\d+$").unwrap());

/// Which files count as invoices during a directory walk
#[derive(Debug, Clone)]
pub struct ScanFilter {
    extensions: Vec<String>,
    skip_dirs: Vec<String>,
}

impl ScanFilter {
    /// An empty extension list accepts every file
    pub fn new<E, S>(extensions: E, skip_dirs: S) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            skip_dirs: skip_dirs
                .into_iter()
                .map(|d| d.as_ref().to_string())
                .collect(),
        }
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|wanted| *wanted == e.to_lowercase()))
            .unwrap_or(false)
    }

    fn skips_dir(&self, name: &str) -> bool {
        self.skip_dirs.iter().any(|d| d == name)
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::new(["pdf"], DEFAULT_SKIP_DIRS.iter().copied())
    }
}

/// List invoice files under `root` in path order.
///
/// A missing root yields an empty list. Skipped folders are matched by name
/// anywhere below the root, not against the root itself.
pub fn iter_invoice_files(root: &Path, filter: &ScanFilter) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !filter.skips_dir(&entry.file_name().to_string_lossy())
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && filter.accepts_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// SHA-256 of the full file content as lowercase hex
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// File stem with any `__<n>` copy suffix removed
pub fn stem_key(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match NUMBERED_COPY.captures(&stem) {
        Some(caps) => caps[1].to_string(),
        None => stem,
    }
}

/// First free path for `name` inside `dir`: `name`, then `stem__2.ext`, `stem__3.ext`, ...
pub fn ensure_unique(dir: &Path, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let candidate = dir.join(name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let suffix = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 2;
    loop {
        let candidate = dir.join(format!("{}__{}{}", stem, counter, suffix));
        if !candidate.exists() {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// A file whose content was already seen under another path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub path: PathBuf,
    pub kept: PathBuf,
}

/// Result of scanning a directory for duplicates, before anything is moved
#[derive(Debug, Clone, Default)]
pub struct DedupePlan {
    pub scanned: usize,
    pub kept: Vec<PathBuf>,
    pub duplicates: Vec<Duplicate>,
    pub errors: usize,
}

/// Work out which files under `root` are duplicates.
///
/// With `match_numbered_copies`, `invoice__2.pdf` is a duplicate of
/// `invoice.pdf` even when the bytes differ.
pub fn plan_duplicates(
    root: &Path,
    filter: &ScanFilter,
    match_numbered_copies: bool,
) -> Result<DedupePlan> {
    let mut plan = DedupePlan::default();
    let mut seen_hash: HashMap<String, PathBuf> = HashMap::new();
    let mut seen_stem: HashMap<String, PathBuf> = HashMap::new();

    for path in iter_invoice_files(root, filter)? {
        plan.scanned += 1;
        let digest = match hash_file(&path) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to hash {:?}: {}", path, e);
                plan.errors += 1;
                continue;
            }
        };

        let keeper = seen_hash.get(&digest).cloned().or_else(|| {
            if match_numbered_copies {
                seen_stem.get(&stem_key(&path)).cloned()
            } else {
                None
            }
        });

        match keeper {
            Some(kept) => plan.duplicates.push(Duplicate { path, kept }),
            None => {
                seen_hash.insert(digest, path.clone());
                if match_numbered_copies {
                    seen_stem.insert(stem_key(&path), path.clone());
                }
                plan.kept.push(path);
            }
        }
    }

    Ok(plan)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupeStats {
    pub scanned: usize,
    pub kept: usize,
    pub moved: usize,
    pub errors: usize,
}

/// Move duplicate invoices inside a provider directory into its `duplicates/` folder
pub fn dedupe_provider_dir(
    dir: &Path,
    filter: &ScanFilter,
    match_numbered_copies: bool,
) -> Result<DedupeStats> {
    let plan = plan_duplicates(dir, filter, match_numbered_copies)?;
    let mut stats = DedupeStats {
        scanned: plan.scanned,
        kept: plan.kept.len(),
        moved: 0,
        errors: plan.errors,
    };

    if plan.duplicates.is_empty() {
        return Ok(stats);
    }

    let duplicates_dir = dir.join(DUPLICATES_DIR);
    for dup in &plan.duplicates {
        let name = dup
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let moved = ensure_unique(&duplicates_dir, &name)
            .and_then(|dest| std::fs::rename(&dup.path, &dest).map(|_| dest).map_err(Into::into));
        match moved {
            Ok(dest) => {
                debug!("Moved duplicate {:?} -> {:?} (kept {:?})", dup.path, dest, dup.kept);
                stats.moved += 1;
            }
            Err(e) => {
                warn!("Failed to move duplicate {:?}: {}", dup.path, e);
                stats.errors += 1;
            }
        }
    }

    info!(
        "Deduplicated {:?}: scanned={}, kept={}, moved={}",
        dir, stats.scanned, stats.kept, stats.moved
    );
    Ok(stats)
}

/// What to do with duplicates found by the standalone `dedupe` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateAction {
    Delete,
    MoveTo(PathBuf),
}

/// Apply a plan outside the provider workflow. Returns how many files were removed.
pub fn remove_duplicates(plan: &DedupePlan, action: &DuplicateAction) -> usize {
    let mut removed = 0;
    for dup in &plan.duplicates {
        let result: Result<()> = match action {
            DuplicateAction::Delete => std::fs::remove_file(&dup.path).map_err(Into::into),
            DuplicateAction::MoveTo(dest_dir) => {
                let name = dup
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ensure_unique(dest_dir, &name).and_then(|dest| {
                    std::fs::rename(&dup.path, &dest).map_err(Into::into)
                })
            }
        };
        match result {
            Ok(()) => {
                info!("[dedup] {:?} removed; kept {:?}", dup.path, dup.kept);
                removed += 1;
            }
            Err(e) => warn!("[dedup] {:?}: {}", dup.path, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_iter_skips_special_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "keep.pdf", b"PDF");
        write(root, "quarantine/skip.pdf", b"PDF");
        write(root, "_tmp/skip.pdf", b"PDF");
        write(root, "duplicates/skip.pdf", b"PDF");
        write(root, "nested/also.pdf", b"PDF");
        write(root, "notes.txt", b"text");

        let files = iter_invoice_files(root, &ScanFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["keep.pdf", "also.pdf"]);
    }

    #[test]
    fn test_iter_extension_is_case_insensitive() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "UPPER.PDF", b"A");
        write(temp.path(), "lower.pdf", b"B");

        let files = iter_invoice_files(temp.path(), &ScanFilter::default()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_iter_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let files =
            iter_invoice_files(&temp.path().join("absent"), &ScanFilter::default()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_iter_root_named_like_skip_dir_is_scanned() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("duplicates");
        write(&root, "a.pdf", b"A");

        let files = iter_invoice_files(&root, &ScanFilter::default()).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_hash_empty_file() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "empty.pdf", b"");
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_stem_key_strips_copy_suffix() {
        assert_eq!(stem_key(Path::new("invoice__2.pdf")), "invoice");
        assert_eq!(stem_key(Path::new("invoice.pdf")), "invoice");
        assert_eq!(stem_key(Path::new("a__b.pdf")), "a__b");
    }

    #[test]
    fn test_ensure_unique_adds_suffix() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "file.pdf", b"PDF");
        let unique = ensure_unique(temp.path(), "file.pdf").unwrap();
        assert_eq!(unique.file_name().unwrap(), "file__2.pdf");

        write(temp.path(), "file__2.pdf", b"PDF");
        let unique = ensure_unique(temp.path(), "file.pdf").unwrap();
        assert_eq!(unique.file_name().unwrap(), "file__3.pdf");
    }

    #[test]
    fn test_dedupe_provider_dir_moves_duplicates() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("gmail");
        write(&target, "a.pdf", b"PDF-A");
        write(&target, "a__2.pdf", b"PDF-A");
        write(&target, "b.pdf", b"PDF-B");

        let stats = dedupe_provider_dir(&target, &ScanFilter::default(), false).unwrap();
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.moved, 1);
        assert!(target.join("a.pdf").exists());
        assert!(!target.join("a__2.pdf").exists());
        assert!(target.join(DUPLICATES_DIR).join("a__2.pdf").exists());
    }

    #[test]
    fn test_numbered_copies_only_match_when_enabled() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "bill.pdf", b"one");
        write(temp.path(), "bill__2.pdf", b"two");

        let plan = plan_duplicates(temp.path(), &ScanFilter::default(), false).unwrap();
        assert!(plan.duplicates.is_empty());

        let plan = plan_duplicates(temp.path(), &ScanFilter::default(), true).unwrap();
        assert_eq!(plan.duplicates.len(), 1);
        assert_eq!(plan.duplicates[0].kept.file_name().unwrap(), "bill.pdf");
    }

    #[test]
    fn test_remove_duplicates_move_to() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        write(&root, "x.pdf", b"same");
        write(&root, "y.pdf", b"same");
        let quarantine = temp.path().join("review");

        let plan = plan_duplicates(&root, &ScanFilter::default(), false).unwrap();
        let removed = remove_duplicates(&plan, &DuplicateAction::MoveTo(quarantine.clone()));
        assert_eq!(removed, 1);
        assert!(root.join("x.pdf").exists());
        assert!(quarantine.join("y.pdf").exists());
    }
}
