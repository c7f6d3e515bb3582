//! Git primitives for fetching extension trees at pinned refs.

use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::command;

/// Clone a repository to a target directory.
pub fn clone_repo(url: &str, target_dir: &Path) -> Result<()> {
    command::run(
        "git",
        &["clone", url, &target_dir.to_string_lossy()],
        "git clone",
    )
    .map_err(|e| Error::git_command_failed(e.to_string()))?;
    Ok(())
}

/// Check out a specific ref (branch, tag, or commit) in a repository.
pub fn checkout(repo_dir: &Path, reference: &str) -> Result<()> {
    command::run_in(
        &repo_dir.to_string_lossy(),
        "git",
        &["checkout", "--force", reference],
        "git checkout",
    )
    .map_err(|e| Error::git_command_failed(e.to_string()))?;
    Ok(())
}

/// Fetch all refs so a later checkout can hit any pinned reference.
pub fn fetch_all(repo_dir: &Path) -> Result<()> {
    command::run_in(
        &repo_dir.to_string_lossy(),
        "git",
        &["fetch", "--all", "--tags"],
        "git fetch",
    )
    .map_err(|e| Error::git_command_failed(e.to_string()))?;
    Ok(())
}

pub(crate) fn is_git_repo(path: &str) -> bool {
    command::succeeded_in(path, "git", &["rev-parse", "--git-dir"])
}
