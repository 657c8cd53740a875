use serde::Serialize;
use std::fs;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{LocalCommand, Policy, Runner};

/// Contents of the `BUILD` file shipped next to the binary.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub builder: String,
    pub built_at: String,
    pub commit: String,
    pub toolchain_version: String,
}

impl BuildInfo {
    /// One value per line, in a fixed order.
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            self.builder, self.built_at, self.commit, self.toolchain_version
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub success: bool,
    pub exit_code: i32,
    pub command: String,
    pub binary: String,
    pub info: BuildInfo,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

/// `GOPATH=<workdir> GOARCH=<arch> GOOS=<os> go build -o <bin>/<app> <main>`
pub fn build_command(ctx: &Context) -> LocalCommand {
    LocalCommand::new(&ctx.build.toolchain)
        .args(["build", "-o"])
        .arg(ctx.local_binary().to_string_lossy())
        .arg(&ctx.main)
        .env("GOPATH", ctx.workdir.to_string_lossy())
        .env("GOARCH", &ctx.build.target_arch)
        .env("GOOS", &ctx.build.target_os)
        .current_dir(&ctx.workdir)
}

/// Gather build metadata. Missing git or toolchain leaves that line empty.
pub fn collect_build_info(runner: &Runner) -> Result<BuildInfo> {
    let ctx = runner.ctx();

    let commit = runner.local(
        &LocalCommand::new("git")
            .args(["log", "--pretty=oneline", "-1"])
            .current_dir(&ctx.workdir),
        Policy::IgnoreFailure,
    )?;
    let toolchain = runner.local(
        &LocalCommand::new(&ctx.build.toolchain)
            .arg("version")
            .current_dir(&ctx.workdir),
        Policy::IgnoreFailure,
    )?;

    Ok(BuildInfo {
        builder: ctx.user.clone(),
        built_at: chrono::Local::now()
            .format("%a %b %e %H:%M:%S %Z %Y")
            .to_string(),
        commit: first_line(&commit.stdout, commit.success),
        toolchain_version: first_line(&toolchain.stdout, toolchain.success),
    })
}

fn first_line(stdout: &str, success: bool) -> String {
    if !success {
        return String::new();
    }
    stdout.lines().next().unwrap_or_default().trim().to_string()
}

/// Write the metadata file and compile the binary.
///
/// A failed compile is reported in the output, not as an error; callers
/// decide whether it stops anything.
pub fn run(runner: &Runner) -> Result<BuildOutput> {
    let ctx = runner.ctx();
    let bin_dir = ctx.bin_dir();

    fs::create_dir_all(&bin_dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("create {}", bin_dir.display())))
    })?;

    let info = collect_build_info(runner)?;
    let info_path = ctx.local_build_info();
    fs::write(&info_path, info.render()).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", info_path.display())))
    })?;
    log_status!("build", "Wrote {}", info_path.display());

    let cmd = build_command(ctx);
    let output = runner.local(&cmd, Policy::IgnoreFailure)?;

    if output.success {
        log_status!("build", "Built {}", ctx.local_binary().display());
    } else {
        eprintln!(
            "[build] Build failed with exit code {}: {}",
            output.exit_code,
            output.stderr.trim()
        );
    }

    Ok(BuildOutput {
        success: output.success,
        exit_code: output.exit_code,
        command: cmd.display(),
        binary: ctx.local_binary().display().to_string(),
        info,
        stderr: output.stderr,
    })
}
