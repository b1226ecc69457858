//! Find Terraform root modules (directories with a backend) in a directory tree.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::options::absolute;
use crate::parser::ModuleLoader;

/// Directories never descended into
const IGNORED_DIRS: &[&str] = &[".git", ".terraform", ".terragrunt-cache"];

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to walk {root}: {source}")]
    Walk {
        root: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("invalid filter pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("failed to expand filter {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::GlobError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|s| IGNORED_DIRS.contains(&s))
            .unwrap_or(false)
}

/// Every directory under `root` (inclusive) that loads as a module with a
/// backend, in walk order.
///
/// Directories that cannot be loaded at all are skipped; walk errors are not.
pub fn find_root_modules(
    root: &Utf8Path,
    loader: &dyn ModuleLoader,
) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let mut root_modules = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e));

    for entry in walker {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            root: root.to_owned(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|p| DiscoveryError::NonUtf8Path(p.display().to_string()))?;

        match loader.load_dir(&path) {
            Ok(loaded) if loaded.module.backend.is_some() => root_modules.push(path),
            Ok(_) => {}
            Err(e) => debug!(dir = %path, error = %e, "failed to load module, skipping"),
        }
    }

    Ok(root_modules)
}

/// Root modules of all working directories, optionally narrowed by a filter glob.
///
/// The filter replaces the working directories as the set of paths to walk and
/// is expanded once; relative patterns are taken from `repo_root`. Results are
/// absolute and unique across every walked path, in first-seen order.
pub fn find_all_root_modules(
    working_dirs: &[Utf8PathBuf],
    repo_root: &Utf8Path,
    filter: Option<&str>,
    loader: &dyn ModuleLoader,
) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let working_paths = match filter {
        Some(pattern) => expand_filter(pattern, repo_root)?,
        None => working_dirs.to_vec(),
    };

    let mut seen = HashSet::new();
    let mut modules = Vec::new();
    for working_path in working_paths {
        for path in find_root_modules(&working_path, loader)? {
            let path = absolute(&path)?;
            if seen.insert(path.clone()) {
                modules.push(path);
            }
        }
    }

    Ok(modules)
}

fn expand_filter(pattern: &str, repo_root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let anchored = if Utf8Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        repo_root.join(pattern).into_string()
    };

    let paths = glob::glob(&anchored).map_err(|source| DiscoveryError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut matches = Vec::new();
    for path in paths {
        let path = path.map_err(|source| DiscoveryError::Glob {
            pattern: pattern.to_string(),
            source,
        })?;
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|p| DiscoveryError::NonUtf8Path(p.display().to_string()))?;
        matches.push(path);
    }
    Ok(matches)
}
