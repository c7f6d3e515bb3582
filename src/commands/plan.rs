use std::path::PathBuf;

use clap::Args;

use greenlight::{scheduler, workflow};

use super::CmdResult;

#[derive(Args)]
pub struct PlanArgs {
    /// Workflow definition file
    pub file: PathBuf,

    /// Repository event to evaluate the trigger against
    #[arg(long, default_value = "pull_request")]
    pub event: String,
}

pub fn execute(args: PlanArgs) -> CmdResult<scheduler::WorkflowPlan> {
    let wf = workflow::load(&args.file)?;
    let plan = scheduler::plan(&wf, &args.event);
    Ok((plan, 0))
}
