use clap::Args;
use std::path::PathBuf;

use deckhand::executor::SystemExecutor;
use deckhand::task::{self, RunOptions, Task, TaskReport};
use deckhand::{config, Context, Error, Stage};

pub type CmdResult<T> = deckhand::Result<(T, i32)>;

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to ./deckhand.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Select an environment before running the command
    #[arg(long, global = true, value_name = "STAGE")]
    pub env: Option<Stage>,

    /// Override a context value (repeatable), e.g. --set hosts=a,b
    #[arg(long = "set", global = true, value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub set: Vec<(String, String)>,

    /// Abort deploy when the build fails
    #[arg(long, global = true)]
    pub fail_fast: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Load config from the working directory, select `--env`, then apply `--set`.
pub fn load_context(global: &GlobalArgs) -> deckhand::Result<Context> {
    let workdir = std::env::current_dir().map_err(|e| {
        Error::internal_io(e.to_string(), Some("resolve working directory".to_string()))
    })?;
    let config = config::load(global.config.as_deref(), &workdir)?;
    let mut ctx = Context::new(config, workdir)?;

    if let Some(stage) = global.env {
        ctx.select_environment(stage);
    }
    for (key, value) in &global.set {
        ctx.apply_override(key, value)?;
    }

    Ok(ctx)
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub stage: Stage,
    pub hosts: Vec<String>,
    pub failures: usize,
    pub tasks: Vec<TaskReport>,
}

/// Run tasks against the real system. Tolerated failures exit 1.
pub fn execute(tasks: Vec<Task>, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let mut ctx = load_context(global)?;
    let executor = SystemExecutor::from_context(&ctx);
    let options = RunOptions {
        fail_fast: global.fail_fast,
    };

    let reports = task::run_tasks(&mut ctx, &executor, &tasks, options, &mut std::io::stderr())?;
    let failures: usize = reports.iter().map(|r| r.failures).sum();
    let exit_code = if failures > 0 { 1 } else { 0 };

    Ok((
        RunOutput {
            stage: ctx.stage,
            hosts: ctx.hosts,
            failures,
            tasks: reports,
        },
        exit_code,
    ))
}

pub mod run;
pub mod tasks;
pub mod test;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        deckhand::output::map_cmd_result_to_json($module::run_json($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        deckhand::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

/// Commands that map to exactly one argument-free task.
macro_rules! single {
    ($task:expr, $global:expr) => {
        deckhand::output::map_cmd_result_to_json(execute(vec![$task], $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (deckhand::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Tasks => dispatch!((), tasks),

        crate::Commands::Ping => single!(Task::Ping, global),
        crate::Commands::Deploy => single!(Task::Deploy, global),
        crate::Commands::Stop => single!(Task::Stop, global),
        crate::Commands::Start => single!(Task::Start, global),
        crate::Commands::Restart => single!(Task::Restart, global),
        crate::Commands::Status => single!(Task::Status, global),
        crate::Commands::Permissions => single!(Task::Permissions, global),
        crate::Commands::Mkdirs => single!(Task::Mkdirs, global),
        crate::Commands::Upstart => single!(Task::Upstart, global),
        crate::Commands::Uninstall => single!(Task::Uninstall, global),
        crate::Commands::Build => single!(Task::Build, global),

        crate::Commands::Test(args) => dispatch!(args, global, test),
        crate::Commands::TestCoverage(args) => {
            deckhand::output::map_cmd_result_to_json(test::run_coverage(args, global))
        }
        crate::Commands::TestBench(args) => {
            deckhand::output::map_cmd_result_to_json(test::run_bench(args, global))
        }
        crate::Commands::Run(args) => dispatch!(args, global, run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("hosts=a=b").unwrap(),
            ("hosts".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("hosts").is_err());
    }
}
