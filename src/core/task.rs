//! Named tasks and their sequential dispatch.
//!
//! Task specs follow `name[:arg,...,key=value]`, e.g. `test:pkg/models,verbose=false`
//! or `test_coverage:models`. Tasks run in the order given; the first error
//! stops the run. Tolerated failures are counted, not raised.

use serde::Serialize;
use std::io::Write;
use std::str::FromStr;

use crate::build::{self, BuildOutput};
use crate::context::{Context, Stage};
use crate::error::{Error, Result};
use crate::executor::{Executor, Runner};
use crate::health::{self, PingResult};
use crate::lifecycle::{self, DeployOutput, Sequence, Step};
use crate::test_runner::{self, TargetOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SelectEnvironment(Stage),
    Ping,
    Deploy,
    Stop,
    Start,
    Restart,
    Status,
    Permissions,
    Mkdirs,
    Upstart,
    Uninstall,
    Build,
    Test {
        target: Option<String>,
        verbose: bool,
        vet: bool,
    },
    TestCoverage {
        target: Option<String>,
    },
    TestBench {
        target: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TaskInfo {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

pub const CATALOG: &[TaskInfo] = &[
    TaskInfo {
        name: "production",
        usage: "production",
        description: "Select production hosts, stage and branch",
    },
    TaskInfo {
        name: "staging",
        usage: "staging",
        description: "Select staging hosts, stage and branch",
    },
    TaskInfo {
        name: "ping",
        usage: "ping",
        description: "GET /ping on every host and print the response",
    },
    TaskInfo {
        name: "deploy",
        usage: "deploy",
        description: "Build, install service, upload binary and metadata, fix permissions, restart",
    },
    TaskInfo {
        name: "stop",
        usage: "stop",
        description: "Stop the service (not running is not an error)",
    },
    TaskInfo {
        name: "start",
        usage: "start",
        description: "Start the service (already running is not an error)",
    },
    TaskInfo {
        name: "restart",
        usage: "restart",
        description: "Stop then start the service",
    },
    TaskInfo {
        name: "status",
        usage: "status",
        description: "Show service status; fails if the service manager does",
    },
    TaskInfo {
        name: "permissions",
        usage: "permissions",
        description: "Set ownership and group-write on the install directory",
    },
    TaskInfo {
        name: "mkdirs",
        usage: "mkdirs",
        description: "Create install and log directories",
    },
    TaskInfo {
        name: "upstart",
        usage: "upstart",
        description: "Render and install the service descriptor",
    },
    TaskInfo {
        name: "uninstall",
        usage: "uninstall",
        description: "Remove the install directory and service descriptor",
    },
    TaskInfo {
        name: "build",
        usage: "build",
        description: "Write build metadata and cross-compile the binary",
    },
    TaskInfo {
        name: "test",
        usage: "test[:target][,verbose][,vet]",
        description: "Run tests (or vet) per target",
    },
    TaskInfo {
        name: "test_coverage",
        usage: "test_coverage[:name]",
        description: "Run tests with a coverage profile per target",
    },
    TaskInfo {
        name: "test_bench",
        usage: "test_bench[:name]",
        description: "Run tests and benchmarks per target",
    },
];

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::SelectEnvironment(Stage::Production) => "production",
            Task::SelectEnvironment(Stage::Staging) => "staging",
            Task::Ping => "ping",
            Task::Deploy => "deploy",
            Task::Stop => "stop",
            Task::Start => "start",
            Task::Restart => "restart",
            Task::Status => "status",
            Task::Permissions => "permissions",
            Task::Mkdirs => "mkdirs",
            Task::Upstart => "upstart",
            Task::Uninstall => "uninstall",
            Task::Build => "build",
            Task::Test { .. } => "test",
            Task::TestCoverage { .. } => "test_coverage",
            Task::TestBench { .. } => "test_bench",
        }
    }
}

impl FromStr for Task {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (name, raw_args) = match spec.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (spec, None),
        };
        let name = name.replace('-', "_");
        let args = TaskArgs::parse(spec, raw_args)?;

        let task = match name.as_str() {
            "production" => Task::SelectEnvironment(Stage::Production),
            "staging" => Task::SelectEnvironment(Stage::Staging),
            "ping" => Task::Ping,
            "deploy" => Task::Deploy,
            "stop" => Task::Stop,
            "start" => Task::Start,
            "restart" => Task::Restart,
            "status" => Task::Status,
            "permissions" => Task::Permissions,
            "mkdirs" => Task::Mkdirs,
            "upstart" => Task::Upstart,
            "uninstall" => Task::Uninstall,
            "build" => Task::Build,
            "test" => {
                let target = args.string(0, &["x", "target"]);
                let verbose = args.flag(1, "verbose")?.unwrap_or(true);
                let vet = args.flag(2, "vet")?.unwrap_or(false);
                args.ensure_consumed(3, &["x", "target", "verbose", "vet"])?;
                return Ok(Task::Test {
                    target,
                    verbose,
                    vet,
                });
            }
            "test_coverage" | "test_bench" => {
                let target = args.string(0, &["name", "target"]);
                args.ensure_consumed(1, &["name", "target"])?;
                return Ok(if name == "test_coverage" {
                    Task::TestCoverage { target }
                } else {
                    Task::TestBench { target }
                });
            }
            _ => {
                return Err(Error::validation_unknown_task(
                    name,
                    CATALOG.iter().map(|t| t.name.to_string()).collect(),
                ))
            }
        };

        args.ensure_consumed(0, &[])?;
        Ok(task)
    }
}

struct TaskArgs<'s> {
    spec: &'s str,
    positional: Vec<&'s str>,
    keyword: Vec<(&'s str, &'s str)>,
}

impl<'s> TaskArgs<'s> {
    fn parse(spec: &'s str, raw: Option<&'s str>) -> Result<Self> {
        let mut positional = Vec::new();
        let mut keyword = Vec::new();

        for part in raw.into_iter().flat_map(|r| r.split(',')) {
            let part = part.trim();
            match part.split_once('=') {
                Some((k, v)) => keyword.push((k.trim(), v.trim())),
                None if !keyword.is_empty() => {
                    return Err(Error::validation_invalid_argument(
                        "task",
                        "Positional arguments must come before key=value arguments",
                        Some(spec.to_string()),
                        None,
                    ))
                }
                None => positional.push(part),
            }
        }

        Ok(Self {
            spec,
            positional,
            keyword,
        })
    }

    fn lookup(&self, index: usize, keys: &[&str]) -> Option<&'s str> {
        self.keyword
            .iter()
            .find(|(k, _)| keys.contains(k))
            .map(|(_, v)| *v)
            .or_else(|| self.positional.get(index).copied())
    }

    fn string(&self, index: usize, keys: &[&str]) -> Option<String> {
        self.lookup(index, keys)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn flag(&self, index: usize, key: &str) -> Result<Option<bool>> {
        match self.lookup(index, &[key]) {
            None | Some("") => Ok(None),
            Some(raw) => parse_bool(raw).map(Some).ok_or_else(|| {
                Error::validation_invalid_argument(
                    key,
                    "Expected a boolean (true/false, yes/no, 1/0)",
                    Some(raw.to_string()),
                    None,
                )
            }),
        }
    }

    fn ensure_consumed(&self, max_positional: usize, keys: &[&str]) -> Result<()> {
        let extra_positional = self.positional.len() > max_positional;
        let unknown_key = self.keyword.iter().find(|(k, _)| !keys.contains(k));

        if extra_positional || unknown_key.is_some() {
            return Err(Error::validation_invalid_argument(
                "task",
                "Too many or unknown arguments for task",
                Some(self.spec.to_string()),
                Some(keys.iter().map(|k| k.to_string()).collect()),
            ));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TaskOutcome {
    Environment {
        stage: Stage,
        hosts: Vec<String>,
        branch: String,
    },
    Remote {
        steps: Vec<Step>,
    },
    Build(BuildOutput),
    Deploy(DeployOutput),
    Tests {
        targets: Vec<TargetOutcome>,
    },
    Ping {
        results: Vec<PingResult>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task: String,
    /// Tolerated failures: ignored remote steps, failed test targets, failed build.
    pub failures: usize,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Abort `deploy` when the build fails.
    pub fail_fast: bool,
}

fn count_step_failures(steps: &[Step]) -> usize {
    steps.iter().map(Step::failed_hosts).sum()
}

fn count_target_failures(targets: &[TargetOutcome]) -> usize {
    targets.iter().filter(|t| !t.success).count()
}

fn remote_steps(
    runner: &Runner,
    op: fn(&mut Sequence) -> Result<()>,
) -> Result<TaskOutcome> {
    let mut seq = Sequence::new(runner);
    op(&mut seq)?;
    Ok(TaskOutcome::Remote {
        steps: seq.into_steps(),
    })
}

/// Run one task. Environment selection mutates `ctx`; everything else reads it.
pub fn run_task(
    ctx: &mut Context,
    executor: &dyn Executor,
    task: &Task,
    options: RunOptions,
    out: &mut dyn Write,
) -> Result<TaskReport> {
    log_status!("task", "{}", task.name());

    if let Task::SelectEnvironment(stage) = task {
        ctx.select_environment(*stage);
    }

    let ctx = &*ctx;
    let runner = Runner::new(executor, ctx);
    let outcome = match task {
        Task::SelectEnvironment(_) => TaskOutcome::Environment {
            stage: ctx.stage,
            hosts: ctx.hosts.clone(),
            branch: ctx.branch.clone(),
        },
        Task::Ping => TaskOutcome::Ping {
            results: health::ping(&runner, out)?,
        },
        Task::Deploy => TaskOutcome::Deploy(lifecycle::deploy(&runner, options.fail_fast)?),
        Task::Build => TaskOutcome::Build(build::run(&runner)?),
        Task::Stop => remote_steps(&runner, lifecycle::stop)?,
        Task::Start => remote_steps(&runner, lifecycle::start)?,
        Task::Restart => remote_steps(&runner, lifecycle::restart)?,
        Task::Status => remote_steps(&runner, lifecycle::status)?,
        Task::Permissions => remote_steps(&runner, lifecycle::permissions)?,
        Task::Mkdirs => remote_steps(&runner, lifecycle::mkdirs)?,
        Task::Upstart => remote_steps(&runner, lifecycle::upstart)?,
        Task::Uninstall => remote_steps(&runner, lifecycle::uninstall)?,
        Task::Test {
            target,
            verbose,
            vet,
        } => TaskOutcome::Tests {
            targets: test_runner::test(&runner, target.as_deref(), *verbose, *vet, out)?,
        },
        Task::TestCoverage { target } => TaskOutcome::Tests {
            targets: test_runner::test_coverage(&runner, target.as_deref(), out)?,
        },
        Task::TestBench { target } => TaskOutcome::Tests {
            targets: test_runner::test_bench(&runner, target.as_deref(), out)?,
        },
    };

    let failures = match &outcome {
        TaskOutcome::Environment { .. } | TaskOutcome::Ping { .. } => 0,
        TaskOutcome::Remote { steps } => count_step_failures(steps),
        TaskOutcome::Build(b) => usize::from(!b.success),
        TaskOutcome::Deploy(d) => usize::from(!d.build.success) + count_step_failures(&d.steps),
        TaskOutcome::Tests { targets } => count_target_failures(targets),
    };

    Ok(TaskReport {
        task: task.name().to_string(),
        failures,
        outcome,
    })
}

/// Run tasks in order; the first error stops the run.
pub fn run_tasks(
    ctx: &mut Context,
    executor: &dyn Executor,
    tasks: &[Task],
    options: RunOptions,
    out: &mut dyn Write,
) -> Result<Vec<TaskReport>> {
    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        reports.push(run_task(ctx, executor, task, options, out)?);
    }
    Ok(reports)
}

/// Parse every spec, reporting the first bad one.
pub fn parse_tasks<S: AsRef<str>>(specs: &[S]) -> Result<Vec<Task>> {
    if specs.is_empty() {
        return Err(Error::validation_missing_argument(vec!["tasks".to_string()]));
    }
    specs.iter().map(|s| s.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(spec: &str) -> Task {
        spec.parse().unwrap()
    }

    #[test]
    fn plain_names() {
        assert_eq!(parse("deploy"), Task::Deploy);
        assert_eq!(parse("production"), Task::SelectEnvironment(Stage::Production));
        assert_eq!(parse(" status "), Task::Status);
    }

    #[test]
    fn test_defaults_to_verbose_all_targets() {
        assert_eq!(
            parse("test"),
            Task::Test {
                target: None,
                verbose: true,
                vet: false
            }
        );
    }

    #[test]
    fn test_positional_args() {
        assert_eq!(
            parse("test:pkgA,False,True"),
            Task::Test {
                target: Some("pkgA".to_string()),
                verbose: false,
                vet: true
            }
        );
    }

    #[test]
    fn test_keyword_args() {
        assert_eq!(
            parse("test:vet=yes"),
            Task::Test {
                target: None,
                verbose: true,
                vet: true
            }
        );
        assert_eq!(
            parse("test:pkgA,verbose=0"),
            Task::Test {
                target: Some("pkgA".to_string()),
                verbose: false,
                vet: false
            }
        );
    }

    #[test]
    fn empty_target_means_all() {
        assert_eq!(
            parse("test:,false"),
            Task::Test {
                target: None,
                verbose: false,
                vet: false
            }
        );
    }

    #[test]
    fn coverage_and_bench_accept_dashes_and_names() {
        assert_eq!(
            parse("test-coverage:models"),
            Task::TestCoverage {
                target: Some("models".to_string())
            }
        );
        assert_eq!(
            parse("test_bench:name=http"),
            Task::TestBench {
                target: Some("http".to_string())
            }
        );
    }

    #[test]
    fn unknown_task_is_rejected() {
        let err = "deplyo".parse::<Task>().unwrap_err();
        assert_eq!(err.code.as_str(), "validation.unknown_task");
        assert_eq!(err.details["available"].as_array().unwrap().len(), CATALOG.len());
    }

    #[test]
    fn arguments_on_plain_task_are_rejected() {
        let err = "deploy:now".parse::<Task>().unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn bad_boolean_is_rejected() {
        let err = "test:pkgA,maybe".parse::<Task>().unwrap_err();
        assert_eq!(err.details["field"], "verbose");
    }

    #[test]
    fn positional_after_keyword_is_rejected() {
        assert!("test:vet=true,pkgA".parse::<Task>().is_err());
    }

    #[test]
    fn every_catalog_entry_parses() {
        for info in CATALOG {
            let task: Task = info.name.parse().unwrap();
            assert_eq!(task.name(), info.name);
        }
    }

    #[test]
    fn empty_task_list_is_missing_argument() {
        let err = parse_tasks::<&str>(&[]).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.missing_argument");
    }
}
