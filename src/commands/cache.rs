use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use greenlight::cache::{self, CacheStore};
use greenlight::workflow::{self, StepAction};
use greenlight::Error;

use super::CmdResult;

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show the composed cache keys for a job instance
    Key {
        /// Workflow definition file
        file: PathBuf,

        /// Job id
        #[arg(long)]
        job: String,

        /// Matrix value as axis=value (repeatable)
        #[arg(long = "matrix", value_name = "AXIS=VALUE")]
        matrix: Vec<String>,

        /// Directory manifests are hashed relative to (default: current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Remove every entry from the local cache store
    Clear,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum CacheOutput {
    Keys(CacheKeysOutput),
    Clear(CacheClearOutput),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeysOutput {
    pub job: String,
    pub keys: Vec<CacheKeyInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeyInfo {
    pub step: String,
    pub key: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restore_keys: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearOutput {
    pub removed: u64,
    pub root: String,
}

pub fn execute(args: CacheArgs) -> CmdResult<CacheOutput> {
    match args.command {
        CacheCommand::Key {
            file,
            job,
            matrix,
            workspace,
        } => {
            let output = show_keys(&file, &job, &matrix, workspace)?;
            Ok((CacheOutput::Keys(output), 0))
        }
        CacheCommand::Clear => {
            let store = CacheStore::default_location();
            let removed = store.clear()?;
            Ok((
                CacheOutput::Clear(CacheClearOutput {
                    removed,
                    root: store.root().display().to_string(),
                }),
                0,
            ))
        }
    }
}

fn show_keys(
    file: &PathBuf,
    job_id: &str,
    matrix: &[String],
    workspace: Option<PathBuf>,
) -> greenlight::Result<CacheKeysOutput> {
    let wf = workflow::load(file)?;
    let job = wf.job(job_id)?;

    let workspace = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| Error::internal_io(e.to_string(), Some("resolve workspace".to_string())))?,
    };

    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("runner.os".to_string(), job.runs_on.clone());
    for pair in matrix {
        let (axis, value) = pair.split_once('=').ok_or_else(|| {
            Error::validation_invalid_argument(
                "matrix",
                format!("Expected axis=value, got '{}'", pair),
                None,
                None,
            )
        })?;
        vars.insert(format!("matrix.{}", axis), value.to_string());
    }

    let mut keys = Vec::new();
    for (index, step) in job.steps.iter().enumerate() {
        let StepAction::Uses { action, with } = &step.action else {
            continue;
        };
        if action != "cache" {
            continue;
        }
        let config: cache::CacheConfig = serde_yml::from_value(with.clone()).map_err(|e| {
            Error::workflow_invalid_value(
                format!("jobs.{}.steps[{}].with", job_id, index),
                None,
                e.to_string(),
            )
        })?;
        let key = cache::render_key(&config.key, &vars, &workspace)?;
        let mut restore_keys = Vec::with_capacity(config.restore_keys.len());
        for template in &config.restore_keys {
            restore_keys.push(cache::render_key(template, &vars, &workspace)?);
        }
        keys.push(CacheKeyInfo {
            step: step.label(index),
            key,
            restore_keys,
        });
    }

    Ok(CacheKeysOutput {
        job: job_id.to_string(),
        keys,
    })
}
