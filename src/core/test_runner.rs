//! Toolchain test, vet, coverage and benchmark runs, one target at a time.
//!
//! A failing target never stops the ones after it. Each target gets exactly
//! one command and one banner.

use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{LocalCommand, Policy, Runner};

const RULE_WIDTH: usize = 80;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    pub target: String,
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
}

/// The explicit target, or every configured one.
pub fn resolve_targets(ctx: &Context, target: Option<&str>) -> Vec<String> {
    match target {
        Some(t) => vec![t.to_string()],
        None => ctx.tests.clone(),
    }
}

fn toolchain(ctx: &Context) -> LocalCommand {
    LocalCommand::new(&ctx.build.toolchain).current_dir(&ctx.workdir)
}

fn with_gopath(cmd: LocalCommand, ctx: &Context) -> LocalCommand {
    cmd.env("GOPATH", ctx.workdir.to_string_lossy())
}

/// `go vet <t>`, `go test -v <t> -logtostderr`, or `go test <t>`.
pub fn test_command(ctx: &Context, target: &str, verbose: bool, vet: bool) -> LocalCommand {
    let cmd = if vet {
        toolchain(ctx).args(["vet", target])
    } else if verbose {
        toolchain(ctx).args(["test", "-v", target, "-logtostderr"])
    } else {
        toolchain(ctx).args(["test", target])
    };
    with_gopath(cmd, ctx)
}

/// Profile file for `target`; slashes become dots.
pub fn coverage_profile(ctx: &Context, target: &str) -> PathBuf {
    ctx.coverage_dir()
        .join(format!("{}.out", target.replace('/', ".")))
}

pub fn coverage_command(ctx: &Context, target: &str) -> LocalCommand {
    toolchain(ctx)
        .args(["test", "-cover"])
        .arg(format!(
            "-coverprofile={}",
            coverage_profile(ctx, target).display()
        ))
        .arg(target)
}

pub fn bench_command(ctx: &Context, target: &str) -> LocalCommand {
    with_gopath(toolchain(ctx).args(["test", target, "-bench=.*"]), ctx)
}

pub fn test(
    runner: &Runner,
    target: Option<&str>,
    verbose: bool,
    vet: bool,
    out: &mut dyn Write,
) -> Result<Vec<TargetOutcome>> {
    let ctx = runner.ctx();
    run_targets(runner, resolve_targets(ctx, target), out, |t| {
        test_command(ctx, t, verbose, vet)
    })
}

pub fn test_coverage(
    runner: &Runner,
    target: Option<&str>,
    out: &mut dyn Write,
) -> Result<Vec<TargetOutcome>> {
    let ctx = runner.ctx();
    let dir = ctx.coverage_dir();
    fs::create_dir_all(&dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("create {}", dir.display())))
    })?;

    run_targets(runner, resolve_targets(ctx, target), out, |t| {
        coverage_command(ctx, t)
    })
}

pub fn test_bench(
    runner: &Runner,
    target: Option<&str>,
    out: &mut dyn Write,
) -> Result<Vec<TargetOutcome>> {
    let ctx = runner.ctx();
    run_targets(runner, resolve_targets(ctx, target), out, |t| {
        bench_command(ctx, t)
    })
}

fn run_targets<F>(
    runner: &Runner,
    targets: Vec<String>,
    out: &mut dyn Write,
    command_for: F,
) -> Result<Vec<TargetOutcome>>
where
    F: Fn(&str) -> LocalCommand,
{
    let mut outcomes = Vec::with_capacity(targets.len());

    for target in targets {
        let cmd = command_for(&target);
        let output = runner.local(&cmd, Policy::IgnoreFailure)?;

        let text = output.combined();
        if !text.is_empty() {
            writeln!(out, "{}", text).map_err(write_error)?;
        }
        write_banner(out, &target, output.success)?;

        outcomes.push(TargetOutcome {
            target,
            command: cmd.display(),
            success: output.success,
            exit_code: output.exit_code,
        });
    }

    Ok(outcomes)
}

/// Banners go to stderr, so colour follows stderr rather than stdout.
pub fn set_banner_color(enabled: bool) {
    colored::control::set_override(enabled);
}

/// Green `OK: <name>` or red `FAILED: <name>`, a rule, and a blank line.
pub fn write_banner(out: &mut dyn Write, name: &str, success: bool) -> Result<()> {
    let rule = "-".repeat(RULE_WIDTH);
    let written = if success {
        writeln!(out, "{}", format!("OK: {}", name).green())
            .and_then(|_| writeln!(out, "{}", rule.green()))
    } else {
        writeln!(out, "{}", format!("FAILED: {}", name).red())
            .and_then(|_| writeln!(out, "{}", rule.red()))
    };
    written
        .and_then(|_| writeln!(out))
        .map_err(write_error)
}

fn write_error(e: std::io::Error) -> Error {
    Error::internal_io(e.to_string(), Some("write test report".to_string()))
}
