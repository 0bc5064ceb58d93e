//! Document snapshot tracker.
//!
//! Walks the configured input directories, captures a [`Snapshot`] of
//! document identities and signatures, and diffs two snapshots to classify
//! each document as added, modified, deleted, or unchanged. Identity is the
//! path string, so a renamed file shows up as a delete plus an add.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::models::{DocSignature, Snapshot, SnapshotDiff};

/// Scan all configured directories and return the current snapshot.
///
/// A missing or unreadable configured directory is fatal; individual
/// unreadable files are logged and skipped.
pub fn scan(config: &IndexConfig) -> Result<Snapshot> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut snapshot = Snapshot::new();

    for dir in &config.dirs {
        if !dir.is_dir() {
            return Err(Error::Io(format!(
                "input directory missing or unreadable: {}",
                dir.display()
            )));
        }

        let mut walker = WalkDir::new(dir).follow_links(false);
        if !config.recursive {
            walker = walker.max_depth(1);
        }

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            match file_signature(path) {
                Ok(sig) => {
                    snapshot.insert(identity(path), sig);
                }
                Err(e) => {
                    warn!("skipping unreadable file {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(snapshot)
}

/// Diff two snapshots. Comparison is by signature only; path identity
/// determines which document a signature belongs to.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> SnapshotDiff {
    let mut out = SnapshotDiff::default();

    for (path, sig) in current {
        match previous.get(path) {
            None => out.added.push(path.clone()),
            Some(prev_sig) if prev_sig != sig => out.modified.push(path.clone()),
            Some(_) => {}
        }
    }

    for path in previous.keys() {
        if !current.contains_key(path) {
            out.deleted.push(path.clone());
        }
    }

    out
}

/// Canonical identity for a document: its absolute path string.
pub fn identity(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn file_signature(path: &Path) -> std::io::Result<DocSignature> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let body = std::fs::read_to_string(path)?;

    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Ok(DocSignature {
        size: metadata.len(),
        mtime,
        content_hash,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| Error::Config(format!("invalid glob '{}': {}", pattern, e)))?,
        );
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {}", e)))
}
