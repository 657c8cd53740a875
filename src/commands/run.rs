use clap::Args;

use deckhand::task;

use super::{CmdResult, GlobalArgs, RunOutput};

#[derive(Args)]
pub struct RunArgs {
    /// Task specs run in order, e.g. `staging deploy` or `test:pkg/models,verbose=false`
    #[arg(required = true, value_name = "TASK")]
    pub tasks: Vec<String>,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let tasks = task::parse_tasks(&args.tasks)?;
    super::execute(tasks, global)
}
