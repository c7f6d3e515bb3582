//! Keyed dependency cache.
//!
//! Keys are rendered from a template that may interpolate context variables
//! and `hashFiles('glob', ...)` — a SHA-256 digest over the sorted matching
//! manifest files. Restore tries the exact key first, then each restore key
//! as a prefix match. Saves are best-effort and never fail a job.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::interpolate;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub path: String,
    pub key: String,
    #[serde(default, rename = "restore-keys")]
    pub restore_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub hit: bool,
    pub exact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_key: Option<String>,
    pub requested_key: String,
}

/// Digest the contents of every file matching the given globs, resolved
/// relative to `workspace`. Paths are sorted so the digest is stable across
/// filesystem iteration order. An empty match set digests to the hash of
/// nothing, mirroring hosted-runner behavior.
pub fn hash_files(workspace: &Path, patterns: &[String]) -> Result<String> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        let absolute = workspace.join(pattern);
        let matches = glob::glob(&absolute.to_string_lossy()).map_err(|e| {
            Error::workflow_invalid_value(
                "hashFiles",
                Some(pattern.clone()),
                format!("Invalid glob pattern: {}", e),
            )
        })?;
        for entry in matches.flatten() {
            if entry.is_file() {
                paths.push(entry);
            }
        }
    }
    paths.sort();
    paths.dedup();

    let mut hasher = Sha256::new();
    for path in &paths {
        let content = fs::read(path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("hash {}", path.display())))
        })?;
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(&content);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Render a cache key template: context variables first, then `hashFiles()`.
pub fn render_key(
    template: &str,
    vars: &HashMap<String, String>,
    workspace: &Path,
) -> Result<String> {
    let rendered = interpolate::render(template, vars);

    static HASH_FILES_RE: OnceLock<Regex> = OnceLock::new();
    let re = HASH_FILES_RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*hashFiles\(([^)]*)\)\s*\}\}").expect("hashFiles regex is valid")
    });

    let mut result = String::new();
    let mut last = 0;
    for caps in re.captures_iter(&rendered) {
        let whole = caps.get(0).expect("capture 0 always present");
        let patterns = parse_hash_files_args(&caps[1])?;
        let digest = hash_files(workspace, &patterns)?;
        result.push_str(&rendered[last..whole.start()]);
        result.push_str(&digest);
        last = whole.end();
    }
    result.push_str(&rendered[last..]);
    Ok(result)
}

fn parse_hash_files_args(raw: &str) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let unquoted = trimmed
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .ok_or_else(|| {
                Error::workflow_invalid_value(
                    "hashFiles",
                    Some(trimmed.to_string()),
                    "Arguments must be single-quoted glob patterns",
                )
            })?;
        patterns.push(unquoted.to_string());
    }
    if patterns.is_empty() {
        return Err(Error::workflow_invalid_value(
            "hashFiles",
            None,
            "hashFiles() requires at least one pattern",
        ));
    }
    Ok(patterns)
}

// ---------------------------------------------------------------------------
// Local cache store
// ---------------------------------------------------------------------------

pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default store location, honoring `GREENLIGHT_CACHE_DIR`.
    pub fn default_location() -> Self {
        let root = std::env::var("GREENLIGHT_CACHE_DIR")
            .unwrap_or_else(|_| "~/.cache/greenlight".to_string());
        Self::new(PathBuf::from(shellexpand::tilde(&root).into_owned()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a key: exact match first, then each restore key as a prefix
    /// against stored entries. A prefix hit restores the newest entry.
    pub fn lookup(&self, key: &str, restore_keys: &[String]) -> RestoreOutcome {
        let exact = self.root.join(sanitize_key(key));
        if exact.is_dir() {
            return RestoreOutcome {
                hit: true,
                exact: true,
                matched_key: Some(key.to_string()),
                requested_key: key.to_string(),
            };
        }

        for prefix in restore_keys {
            if let Some(matched) = self.newest_with_prefix(prefix) {
                return RestoreOutcome {
                    hit: true,
                    exact: false,
                    matched_key: Some(matched),
                    requested_key: key.to_string(),
                };
            }
        }

        RestoreOutcome {
            hit: false,
            exact: false,
            matched_key: None,
            requested_key: key.to_string(),
        }
    }

    /// Copy a stored entry's contents to `target`. No-op on miss.
    pub fn restore(&self, outcome: &RestoreOutcome, target: &Path) -> Result<()> {
        let Some(matched) = &outcome.matched_key else {
            return Ok(());
        };
        let entry = self.root.join(sanitize_key(matched));
        copy_tree(&entry, target)
    }

    /// Save `source` under `key`. Best-effort: errors are returned so the
    /// caller can record a warning, but callers never fail the job on them.
    pub fn save(&self, key: &str, source: &Path) -> Result<()> {
        if !source.exists() {
            return Ok(());
        }
        let entry = self.root.join(sanitize_key(key));
        if entry.exists() {
            // Entries are immutable once written.
            return Ok(());
        }
        copy_tree(source, &entry)
    }

    pub fn clear(&self) -> Result<u64> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let entries = fs::read_dir(&self.root).map_err(|e| {
            Error::internal_io(e.to_string(), Some("read cache root".to_string()))
        })?;
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                fs::remove_dir_all(entry.path()).map_err(|e| {
                    Error::internal_io(e.to_string(), Some("clear cache entry".to_string()))
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn newest_with_prefix(&self, prefix: &str) -> Option<String> {
        let sanitized_prefix = sanitize_key(prefix);
        let entries = fs::read_dir(&self.root).ok()?;
        let mut candidates: Vec<(std::time::SystemTime, String)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&sanitized_prefix) && entry.path().is_dir() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                candidates.push((modified, name));
            }
        }
        candidates.sort();
        candidates.pop().map(|(_, name)| name)
    }
}

/// Keys become directory names; the mapping is char-wise so prefix matching
/// survives sanitization.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("mkdir {}", target.display())))
    })?;
    let entries = fs::read_dir(source).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", source.display())))
    })?;
    for entry in entries.flatten() {
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("copy {}", from.display())))
            })?;
        }
    }
    Ok(())
}
