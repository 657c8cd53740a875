use clap::Args;

use deckhand::Task;

use super::{CmdResult, GlobalArgs, RunOutput};

#[derive(Args)]
pub struct TestArgs {
    /// Package to test (defaults to every configured target)
    target: Option<String>,

    /// Plain `test` instead of `test -v ... -logtostderr`
    #[arg(long)]
    quiet: bool,

    /// Run `vet` instead of tests
    #[arg(long)]
    vet: bool,
}

#[derive(Args)]
pub struct TargetArgs {
    /// Package name (defaults to every configured target)
    target: Option<String>,
}

pub fn run(args: TestArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let task = Task::Test {
        target: args.target,
        verbose: !args.quiet,
        vet: args.vet,
    };
    super::execute(vec![task], global)
}

pub fn run_coverage(args: TargetArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    super::execute(vec![Task::TestCoverage { target: args.target }], global)
}

pub fn run_bench(args: TargetArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    super::execute(vec![Task::TestBench { target: args.target }], global)
}
