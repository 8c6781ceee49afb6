//! Output discovery on disk.

use regex_lite::Regex;
use std::path::{Path, PathBuf};

use super::types::OutputPattern;

/// Returns the non-empty regular files under `working_dir` matching `pattern`,
/// sorted by path.
pub async fn resolve_outputs(working_dir: &Path, pattern: &OutputPattern) -> Vec<PathBuf> {
    let mut found = match pattern {
        OutputPattern::File(name) => {
            let path = working_dir.join(name);
            if is_non_empty_file(&path).await {
                vec![path]
            } else {
                vec![]
            }
        }
        OutputPattern::Glob { dir, pattern } => {
            let Some(re) = glob_to_regex(pattern) else {
                return vec![];
            };
            let mut matched = Vec::new();
            let Ok(mut entries) = tokio::fs::read_dir(working_dir.join(dir)).await else {
                return vec![];
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                if re.is_match(&name.to_string_lossy()) && is_non_empty_file(&entry.path()).await
                {
                    matched.push(entry.path());
                }
            }
            matched
        }
        OutputPattern::Tree(dir) => list_files(&working_dir.join(dir))
            .await
            .into_iter()
            .filter(|(_, len)| *len > 0)
            .map(|(path, _)| path)
            .collect(),
    };
    found.sort();
    found
}

/// Lists every regular file below `dir`, with its size. Missing or
/// unreadable directories yield nothing.
pub async fn list_files(dir: &Path) -> Vec<(PathBuf, u64)> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            // symlink_metadata so a link cannot lead discovery outside the workspace
            let Ok(meta) = tokio::fs::symlink_metadata(entry.path()).await else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                files.push((entry.path(), meta.len()));
            }
        }
    }

    files.sort();
    files
}

/// Zero-byte files below `dir`, which output discovery skips.
pub async fn empty_files(dir: &Path) -> Vec<PathBuf> {
    list_files(dir)
        .await
        .into_iter()
        .filter(|(_, len)| *len == 0)
        .map(|(path, _)| path)
        .collect()
}

async fn is_non_empty_file(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

/// Converts a `*`-wildcard pattern into an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex_lite::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).ok()
}
