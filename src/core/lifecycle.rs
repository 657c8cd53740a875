//! Remote install and service lifecycle: directories, permissions, service
//! descriptor, upload, start/stop/status, uninstall.
//!
//! Every operation appends to a [`Sequence`], so composite tasks (`deploy`)
//! report each command they issued in the order it ran.

use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::build::{self, BuildOutput};
use crate::error::{Error, Result};
use crate::executor::{HostOutput, Policy, RemoteCommand, Runner};
use crate::service::{ServiceAction, ServiceManager};

/// Staging directory on the remote host for uploads before the privileged move.
pub const REMOTE_TMP: &str = "/tmp";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub command: String,
    pub tolerated: bool,
    pub hosts: Vec<HostOutput>,
}

impl Step {
    pub fn failed_hosts(&self) -> usize {
        self.hosts.iter().filter(|h| !h.success).count()
    }
}

pub struct Sequence<'r, 'a> {
    runner: &'r Runner<'a>,
    steps: Vec<Step>,
}

impl<'r, 'a> Sequence<'r, 'a> {
    pub fn new(runner: &'r Runner<'a>) -> Self {
        Self {
            runner,
            steps: Vec::new(),
        }
    }

    pub fn runner(&self) -> &'r Runner<'a> {
        self.runner
    }

    pub fn run(&mut self, cmd: RemoteCommand, policy: Policy) -> Result<()> {
        let hosts = self.runner.remote(&cmd, policy)?;
        self.steps.push(Step {
            command: cmd.to_shell_line(),
            tolerated: policy == Policy::IgnoreFailure,
            hosts,
        });
        Ok(())
    }

    pub fn put(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        let hosts = self.runner.put(local_path, remote_path)?;
        self.steps.push(Step {
            command: format!("put {} {}", local_path.display(), remote_path),
            tolerated: false,
            hosts,
        });
        Ok(())
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// Owner `user:user`, group-writable tree, executable binary.
pub fn permissions(seq: &mut Sequence) -> Result<()> {
    let ctx = seq.runner().ctx();
    let owner = format!("{}:{}", ctx.user, ctx.user);

    seq.run(
        RemoteCommand::sudo("chown").args(["-R", owner.as_str(), ctx.path.as_str()]),
        Policy::PropagateFailure,
    )?;
    seq.run(
        RemoteCommand::sudo("chmod").args(["-R", "g+w", ctx.path.as_str()]),
        Policy::PropagateFailure,
    )?;
    seq.run(
        RemoteCommand::sudo("chmod").arg("+x").arg(ctx.remote_binary()),
        Policy::IgnoreFailure,
    )
}

/// Create the install and log directories, then fix permissions.
pub fn mkdirs(seq: &mut Sequence) -> Result<()> {
    let ctx = seq.runner().ctx();

    seq.run(
        RemoteCommand::sudo("mkdir").args(["-p", ctx.path.as_str()]),
        Policy::PropagateFailure,
    )?;
    seq.run(
        RemoteCommand::sudo("mkdir").arg("-p").arg(ctx.remote_logs()),
        Policy::PropagateFailure,
    )?;
    permissions(seq)
}

/// Ensure directories, then render and install the service descriptor.
pub fn upstart(seq: &mut Sequence) -> Result<()> {
    mkdirs(seq)?;

    let ctx = seq.runner().ctx();
    let manager = ServiceManager::for_context(ctx);
    let descriptor = manager.render_descriptor(ctx);

    let mut file = tempfile::NamedTempFile::new()
        .map_err(|e| Error::internal_io(e.to_string(), Some("create descriptor file".to_string())))?;
    file.write_all(descriptor.as_bytes())
        .map_err(|e| Error::internal_io(e.to_string(), Some("write descriptor file".to_string())))?;

    let staged = format!("{}/{}", REMOTE_TMP, manager.descriptor_file_name(&ctx.app));
    seq.put(file.path(), &staged)?;
    seq.run(
        RemoteCommand::sudo("mv").arg(staged).arg(manager.descriptor_path(&ctx.app)),
        Policy::PropagateFailure,
    )?;

    if let Some(reload) = manager.reload() {
        seq.run(reload, Policy::PropagateFailure)?;
    }
    Ok(())
}

/// Tolerates a service that is not running.
pub fn stop(seq: &mut Sequence) -> Result<()> {
    let ctx = seq.runner().ctx();
    let cmd = ServiceManager::for_context(ctx).control(ServiceAction::Stop, &ctx.app);
    seq.run(cmd, Policy::IgnoreFailure)
}

/// Tolerates a service that is already running.
pub fn start(seq: &mut Sequence) -> Result<()> {
    let ctx = seq.runner().ctx();
    let cmd = ServiceManager::for_context(ctx).control(ServiceAction::Start, &ctx.app);
    seq.run(cmd, Policy::IgnoreFailure)
}

pub fn restart(seq: &mut Sequence) -> Result<()> {
    stop(seq)?;
    start(seq)
}

/// Read-only; a failing status call is an error.
pub fn status(seq: &mut Sequence) -> Result<()> {
    let ctx = seq.runner().ctx();
    let cmd = ServiceManager::for_context(ctx).control(ServiceAction::Status, &ctx.app);
    seq.run(cmd, Policy::PropagateFailure)
}

/// Remove the install directory and the service descriptor.
pub fn uninstall(seq: &mut Sequence) -> Result<()> {
    let ctx = seq.runner().ctx();
    ensure_removable(&ctx.path)?;
    let descriptor = ServiceManager::for_context(ctx).descriptor_path(&ctx.app);

    seq.run(
        RemoteCommand::sudo("rm").args(["-rf", ctx.path.as_str()]),
        Policy::PropagateFailure,
    )?;
    seq.run(
        RemoteCommand::sudo("rm").args(["-f", descriptor.as_str()]),
        Policy::PropagateFailure,
    )
}

fn ensure_removable(path: &str) -> Result<()> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || !path.starts_with('/') {
        return Err(Error::config_invalid_value(
            "path",
            Some(path.to_string()),
            "Install path must be an absolute directory other than '/'",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub build: BuildOutput,
    pub steps: Vec<Step>,
}

/// Build, install descriptor, ensure directories, ship binary and metadata,
/// fix permissions, restart. No rollback.
///
/// With `fail_fast`, a failed build stops before anything remote happens.
pub fn deploy(runner: &Runner, fail_fast: bool) -> Result<DeployOutput> {
    let ctx = runner.ctx();
    ctx.require_hosts()?;

    let build = build::run(runner)?;
    if !build.success {
        if fail_fast {
            return Err(Error::deploy_build_failed(build.exit_code, build.stderr));
        }
        eprintln!("[deploy] Warning: build failed, continuing with existing binary");
    }

    let mut seq = Sequence::new(runner);
    upstart(&mut seq)?;
    mkdirs(&mut seq)?;

    let info_tmp = format!("{}/{}", REMOTE_TMP, crate::context::BUILD_INFO_FILE);
    seq.put(&ctx.local_build_info(), &info_tmp)?;
    seq.run(
        RemoteCommand::sudo("mv")
            .arg(info_tmp)
            .arg(format!("{}/{}", ctx.path, crate::context::BUILD_INFO_FILE)),
        Policy::PropagateFailure,
    )?;

    let binary_tmp = format!("{}/{}", REMOTE_TMP, ctx.app);
    seq.put(&ctx.local_binary(), &binary_tmp)?;
    seq.run(
        RemoteCommand::sudo("mv")
            .arg(binary_tmp)
            .arg(format!("{}/", ctx.path)),
        Policy::PropagateFailure,
    )?;

    permissions(&mut seq)?;
    restart(&mut seq)?;

    log_status!("deploy", "Deployed {} to {} host(s)", ctx.app, ctx.hosts.len());

    Ok(DeployOutput {
        build,
        steps: seq.into_steps(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_relative_paths_are_not_removable() {
        assert!(ensure_removable("/").is_err());
        assert!(ensure_removable("//").is_err());
        assert!(ensure_removable("var/apps/api").is_err());
        assert!(ensure_removable("/var/apps/api").is_ok());
    }
}
