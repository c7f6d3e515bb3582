use clap::{Parser, Subcommand};

use greenlight::output;

mod commands;

use commands::{cache, plan, run, validate};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "greenlight")]
#[command(version = VERSION)]
#[command(about = "Validate, plan, and locally execute declarative CI workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a workflow file and report advisory findings
    Validate(validate::ValidateArgs),
    /// Evaluate the trigger and show the expanded job/step plan
    Plan(plan::PlanArgs),
    /// Execute a workflow for an event
    Run(run::RunArgs),
    /// Inspect or clear the local dependency cache
    Cache(cache::CacheArgs),
}

fn main() {
    let cli = Cli::parse();

    let (result, exit_code) = match cli.command {
        Commands::Validate(args) => output::map_cmd_result_to_json(validate::execute(args)),
        Commands::Plan(args) => output::map_cmd_result_to_json(plan::execute(args)),
        Commands::Run(args) => output::map_cmd_result_to_json(run::execute(args)),
        Commands::Cache(args) => output::map_cmd_result_to_json(cache::execute(args)),
    };

    if output::print_json_result(result).is_err() {
        std::process::exit(1);
    }
    std::process::exit(exit_code);
}
