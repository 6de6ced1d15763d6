//! Repository scanning
//!
//! Walks a directory tree and reads every text file the chunker should see, skipping
//! VCS, virtualenv and build directories, hidden files, and binary extensions.

use super::{ScanConfig, SourceFile};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory does not exist: {0}")]
    NotFound(String),
    #[error("Path is not a directory: {0}")]
    NotADirectory(String),
}

/// Read all eligible files under `root`, with paths relative to it
///
/// Unreadable and non-UTF-8 files are skipped, not reported as errors.
pub fn scan_repository(root: &Path, config: &ScanConfig) -> Result<Vec<SourceFile>, ScanError> {
    if !root.exists() {
        return Err(ScanError::NotFound(root.display().to_string()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.display().to_string()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e, config));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_eligible_file(&entry, config) {
            continue;
        }

        let path = entry.path();
        // Get relative path from base
        let relative_path = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string_lossy().to_string());

        match fs::read_to_string(path) {
            Ok(content) => {
                let last_modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                files.push(SourceFile {
                    path: relative_path,
                    content,
                    last_modified: DateTime::<Utc>::from(last_modified),
                });
            }
            // Binary content that slipped past the extension filter
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                log::debug!("Skipping non-UTF-8 file {}", relative_path);
            }
            Err(e) => {
                log::warn!("Failed to read file {}: {}", relative_path, e);
            }
        }
    }

    log::info!("Scanned {} files under {}", files.len(), root.display());
    Ok(files)
}

fn is_excluded_dir(entry: &DirEntry, config: &ScanConfig) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    config.ignore_dirs.iter().any(|d| name == d.as_str()) || (config.skip_hidden && name.starts_with('.'))
}

fn is_eligible_file(entry: &DirEntry, config: &ScanConfig) -> bool {
    let name = entry.file_name().to_string_lossy();
    if config.skip_hidden && name.starts_with('.') {
        return false;
    }

    let extension = entry
        .path()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    !config
        .skip_extensions
        .iter()
        .any(|skip| skip.trim_start_matches('.').eq_ignore_ascii_case(&extension))
}
