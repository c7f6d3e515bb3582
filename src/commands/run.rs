use std::path::PathBuf;

use clap::Args;

use greenlight::cache::CacheStore;
use greenlight::executor::{DryRunRunner, ExecDeps, ShellRunner};
use greenlight::migration::GitFetcher;
use greenlight::scheduler::{self, RunOptions, RunStatus, WorkflowRunResult};
use greenlight::service::{DockerRuntime, NullRuntime};
use greenlight::{workflow, Error};

use super::CmdResult;

#[derive(Args)]
pub struct RunArgs {
    /// Workflow definition file
    pub file: PathBuf,

    /// Repository event to evaluate the trigger against
    #[arg(long, default_value = "pull_request")]
    pub event: String,

    /// Restrict the run to one job id
    #[arg(long)]
    pub job: Option<String>,

    /// Plan and report without executing steps or starting containers
    #[arg(long)]
    pub dry_run: bool,

    /// Directory the steps run in (default: current directory)
    #[arg(long)]
    pub workspace: Option<PathBuf>,
}

pub fn execute(args: RunArgs) -> CmdResult<WorkflowRunResult> {
    let wf = workflow::load(&args.file)?;

    let workspace = match args.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| Error::internal_io(e.to_string(), Some("resolve workspace".to_string())))?,
    };
    if !workspace.is_dir() {
        return Err(Error::validation_invalid_argument(
            "workspace",
            format!("Not a directory: {}", workspace.display()),
            None,
            None,
        ));
    }

    let store = CacheStore::default_location();
    let options = RunOptions {
        event: args.event,
        workspace,
        job: args.job,
    };

    let result = if args.dry_run {
        let deps = ExecDeps {
            runner: &DryRunRunner,
            services: &NullRuntime,
            store: &store,
            fetcher: &GitFetcher,
            dry_run: true,
        };
        scheduler::run(&wf, &options, &deps)?
    } else {
        let deps = ExecDeps {
            runner: &ShellRunner,
            services: &DockerRuntime,
            store: &store,
            fetcher: &GitFetcher,
            dry_run: false,
        };
        scheduler::run(&wf, &options, &deps)?
    };

    let exit_code = match result.status {
        RunStatus::Failed => 20,
        RunStatus::Success | RunStatus::NoRun => 0,
    };
    Ok((result, exit_code))
}
