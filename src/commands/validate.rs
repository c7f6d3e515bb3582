use std::path::PathBuf;

use clap::Args;

use greenlight::workflow;

use super::CmdResult;

#[derive(Args)]
pub struct ValidateArgs {
    /// Workflow definition file
    pub file: PathBuf,
}

pub fn execute(args: ValidateArgs) -> CmdResult<workflow::ValidationReport> {
    let wf = workflow::load(&args.file)?;
    let report = workflow::validate(&wf);
    // Advisory findings never fail validation; malformed files already
    // errored during load.
    Ok((report, 0))
}
