use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::normalize::DocumentFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDocument {
    pub path: PathBuf,
    pub format: DocumentFormat,
}

/// An entry the walk could not descend into or stat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkFailure {
    pub path: Option<PathBuf>,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub root: PathBuf,
    pub documents: Vec<DiscoveredDocument>,
    /// Regular files whose extension maps to no known format.
    pub skipped: u64,
    pub failures: Vec<WalkFailure>,
}

/// Walks `root` and collects every file whose extension maps to a document
/// format, in path order.
pub fn discover_documents(root: &Path, excludes: &[String]) -> Result<Discovery> {
    let exclude_set = build_exclude_set(excludes)?;
    let mut documents = Vec::new();
    let mut skipped: u64 = 0;
    let mut failures = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !exclude_set.is_match(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                failures.push(WalkFailure {
                    path: err.path().map(Path::to_path_buf),
                    error: err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match DocumentFormat::from_path(entry.path()) {
            Some(format) => documents.push(DiscoveredDocument {
                path: entry.into_path(),
                format,
            }),
            None => skipped = skipped.saturating_add(1),
        }
    }

    Ok(Discovery {
        root: root.to_path_buf(),
        documents,
        skipped,
        failures,
    })
}

pub fn validate_excludes(excludes: &[String]) -> Result<()> {
    let _ = build_exclude_set(excludes)?;
    Ok(())
}

fn build_exclude_set(excludes: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in ["**/.git", "**/.git/**"] {
        builder.add(Glob::new(pat).with_context(|| format!("glob de exclusão inválido: {pat}"))?);
    }
    for pat in excludes {
        builder.add(Glob::new(pat).with_context(|| format!("glob de exclusão inválido: {pat}"))?);
    }
    Ok(builder.build()?)
}
