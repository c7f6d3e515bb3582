//! Two-phase migration backward-compatibility check.
//!
//! Proves that the current branch's schema migrations apply cleanly on top
//! of the schema state the previously released version produced, not only
//! against a freshly initialized schema:
//!
//! 1. Fetch the extension tree at the stable ref, overlay it onto the base
//!    tree, run the migrate command.
//! 2. Discard the overlay, re-fetch at the current ref, overlay again, run
//!    the migrate command and the drift check again.
//!
//! A migration that only works from scratch passes phase one and fails
//! phase two, which is exactly the signal this check exists to produce.
//!
//! The whole sequence runs against a scratch copy of the workspace; the
//! checkout is never overlaid, appended to, or otherwise modified.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::StepRunner;
use crate::git;
use crate::log_status;

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationCompatConfig {
    /// Extension repository URL or local path.
    pub repository: String,
    #[serde(rename = "stable-ref")]
    pub stable_ref: String,
    #[serde(rename = "current-ref", default = "default_current_ref")]
    pub current_ref: String,
    /// Directories copied from the extension tree onto the base tree.
    #[serde(rename = "overlay-paths", default)]
    pub overlay_paths: Vec<String>,
    /// Manifest fragments appended onto base-tree files between fetches.
    #[serde(rename = "append-manifests", default)]
    pub append_manifests: Vec<AppendManifest>,
    /// Migration command, run once per phase.
    pub migrate: String,
    /// Drift check command, run in the current-ref phase.
    #[serde(default)]
    pub check: Option<String>,
}

fn default_current_ref() -> String {
    "HEAD".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppendManifest {
    /// Path inside the extension tree.
    pub source: String,
    /// Path inside the base tree to append onto.
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: String,
    pub reference: String,
    pub migrate_exit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_exit: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCompatReport {
    pub phases: Vec<PhaseReport>,
    pub passed: bool,
}

/// Fetches an extension tree at a pinned ref into a destination directory.
pub trait TreeFetcher: Send + Sync {
    fn fetch(&self, repository: &str, reference: &str, dest: &Path) -> Result<()>;
}

/// Clone-once, checkout-per-ref fetcher backed by real git.
pub struct GitFetcher;

impl TreeFetcher for GitFetcher {
    fn fetch(&self, repository: &str, reference: &str, dest: &Path) -> Result<()> {
        if git::is_git_repo(&dest.to_string_lossy()) {
            git::fetch_all(dest)?;
        } else {
            git::clone_repo(repository, dest)?;
        }
        git::checkout(dest, reference)
    }
}

pub fn verify_migration_backward_compatibility(
    config: &MigrationCompatConfig,
    ctx: &RunContext,
    fetcher: &dyn TreeFetcher,
    runner: &dyn StepRunner,
) -> Result<MigrationCompatReport> {
    // Overlays and manifest appends mutate the tree they run against, so the
    // whole check operates on a scratch copy. The checkout stays pristine and
    // concurrently running jobs never observe a half-overlaid tree.
    let scratch = tempfile::tempdir().map_err(|e| {
        Error::internal_io(e.to_string(), Some("create scratch tree".to_string()))
    })?;
    let base = scratch.path().join("tree");
    copy_base_tree(&ctx.workspace, &base)?;
    let extension_dir = scratch.path().join("extension");
    let mut phases = Vec::with_capacity(2);

    // Snapshot append targets so the current-ref phase overlays the original
    // base tree, not the stable-ref phase's leftovers.
    let mut originals: Vec<(String, String)> = Vec::new();
    for append in &config.append_manifests {
        let target = base.join(&append.target);
        let content = if target.exists() {
            fs::read_to_string(&target).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read {}", target.display())))
            })?
        } else {
            String::new()
        };
        originals.push((append.target.clone(), content));
    }

    run_phase(
        "stable",
        &config.stable_ref,
        config,
        ctx,
        fetcher,
        runner,
        &base,
        &extension_dir,
        &originals,
        false,
        &mut phases,
    )?;

    run_phase(
        "current",
        &config.current_ref,
        config,
        ctx,
        fetcher,
        runner,
        &base,
        &extension_dir,
        &originals,
        config.check.is_some(),
        &mut phases,
    )?;

    Ok(MigrationCompatReport {
        phases,
        passed: true,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_phase(
    phase: &str,
    reference: &str,
    config: &MigrationCompatConfig,
    ctx: &RunContext,
    fetcher: &dyn TreeFetcher,
    runner: &dyn StepRunner,
    base: &Path,
    extension_dir: &Path,
    originals: &[(String, String)],
    run_check: bool,
    phases: &mut Vec<PhaseReport>,
) -> Result<()> {
    log_status!("migration", "Phase '{}': overlay at ref {}", phase, reference);

    fetcher.fetch(&config.repository, reference, extension_dir)?;
    apply_overlay(config, base, extension_dir, originals)?;

    let migrate = runner.run_script(&config.migrate, &ctx.env, base)?;
    let migrate_exit = migrate.exit_code;
    if migrate_exit != 0 {
        phases.push(PhaseReport {
            phase: phase.to_string(),
            reference: reference.to_string(),
            migrate_exit,
            check_exit: None,
        });
        return Err(Error::migration_compat_failed(
            phase,
            format!("migrate exited with {}: {}", migrate_exit, migrate.stderr),
        ));
    }

    let mut check_exit = None;
    if run_check {
        if let Some(check) = &config.check {
            let outcome = runner.run_script(check, &ctx.env, base)?;
            check_exit = Some(outcome.exit_code);
            if outcome.exit_code != 0 {
                phases.push(PhaseReport {
                    phase: phase.to_string(),
                    reference: reference.to_string(),
                    migrate_exit,
                    check_exit,
                });
                return Err(Error::migration_compat_failed(
                    phase,
                    format!(
                        "drift check exited with {}: {}",
                        outcome.exit_code, outcome.stderr
                    ),
                ));
            }
        }
    }

    phases.push(PhaseReport {
        phase: phase.to_string(),
        reference: reference.to_string(),
        migrate_exit,
        check_exit,
    });
    Ok(())
}

/// Copy overlay directories from the extension tree onto the scratch base
/// tree, discarding whatever a previous phase left there, then append
/// manifest fragments.
fn apply_overlay(
    config: &MigrationCompatConfig,
    base: &Path,
    extension_dir: &Path,
    originals: &[(String, String)],
) -> Result<()> {
    for overlay in &config.overlay_paths {
        let source = extension_dir.join(overlay);
        let target = base.join(overlay);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("discard {}", target.display())))
            })?;
        }
        if source.exists() {
            copy_dir(&source, &target)?;
        }
    }

    for append in &config.append_manifests {
        let source = extension_dir.join(&append.source);
        if !source.exists() {
            continue;
        }
        let fragment = fs::read_to_string(&source).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", source.display())))
        })?;
        let target = base.join(&append.target);
        let mut base = originals
            .iter()
            .find(|(path, _)| path == &append.target)
            .map(|(_, content)| content.clone())
            .unwrap_or_default();
        if !base.is_empty() && !base.ends_with('\n') {
            base.push('\n');
        }
        base.push_str(&fragment);
        fs::write(&target, base).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("write {}", target.display())))
        })?;
    }

    Ok(())
}

/// Populate the scratch base tree from the workspace. `.git` is skipped;
/// the check only needs the working files.
fn copy_base_tree(workspace: &Path, base: &Path) -> Result<()> {
    fs::create_dir_all(base).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("mkdir {}", base.display())))
    })?;
    let entries = fs::read_dir(workspace).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", workspace.display())))
    })?;
    for entry in entries.flatten() {
        if entry.file_name() == ".git" {
            continue;
        }
        let from = entry.path();
        let to = base.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("copy {}", from.display())))
            })?;
        }
    }
    Ok(())
}

fn copy_dir(source: &Path, target: &Path) -> Result<()> {
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
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("copy {}", from.display())))
            })?;
        }
    }
    Ok(())
}
