//! Command execution - routes structured commands to the local machine or to
//! every configured host over SSH.
//!
//! Tasks never build shell strings. They describe a command as a program plus
//! an argument vector ([`LocalCommand`], [`RemoteCommand`]) and hand it to a
//! [`Runner`], which applies the per-call [`Policy`] to the result.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::SshConfig;
use crate::context::Context;
use crate::error::{CommandFailedDetails, Error, Result, TargetDetails, UploadFailedDetails};
use crate::ssh::{self, CommandOutput, SshClient};
use crate::utils::shell;

/// What to do when a command exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Log a warning and keep going.
    IgnoreFailure,
    /// Return an error, aborting the calling task.
    PropagateFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Sudo,
    User,
}

/// A program run on the local machine, without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl LocalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Human-readable rendering for logs and reports.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell::quote_arg(v)))
            .collect();
        parts.push(shell::quote_arg(&self.program));
        parts.extend(self.args.iter().map(|a| shell::quote_arg(a)));
        parts.join(" ")
    }
}

/// A program run on each remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub privilege: Privilege,
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    pub fn sudo(program: impl Into<String>) -> Self {
        Self {
            privilege: Privilege::Sudo,
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn user(program: impl Into<String>) -> Self {
        Self {
            privilege: Privilege::User,
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The single quoted line sent over SSH.
    pub fn to_shell_line(&self) -> String {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        if self.privilege == Privilege::Sudo {
            argv.push("sudo".to_string());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        shell::quote_args(&argv)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport used by every task. Implementations must not apply failure
/// policy themselves; they only report what happened.
pub trait Executor {
    fn run_local(&self, cmd: &LocalCommand) -> CommandOutput;

    /// Run on `host`. `Err` is reserved for failures to set up the connection.
    fn run_remote(&self, host: &str, cmd: &RemoteCommand) -> Result<CommandOutput>;

    fn upload(&self, host: &str, local_path: &Path, remote_path: &str) -> Result<CommandOutput>;

    fn http_get(&self, url: &str) -> Result<HttpResponse>;
}

/// Executor backed by real processes: `ssh`/`scp` for hosts, direct spawn
/// for local programs, blocking reqwest for HTTP.
pub struct SystemExecutor {
    user: String,
    ssh: SshConfig,
}

impl SystemExecutor {
    pub fn new(user: impl Into<String>, ssh: SshConfig) -> Self {
        Self {
            user: user.into(),
            ssh,
        }
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.user.clone(), ctx.ssh.clone())
    }

    fn client(&self, host: &str) -> Result<SshClient> {
        SshClient::new(host, &self.user, &self.ssh)
    }
}

impl Executor for SystemExecutor {
    fn run_local(&self, cmd: &LocalCommand) -> CommandOutput {
        ssh::execute_local(
            &cmd.program,
            &cmd.args,
            cmd.current_dir.as_deref(),
            &cmd.env,
        )
    }

    fn run_remote(&self, host: &str, cmd: &RemoteCommand) -> Result<CommandOutput> {
        Ok(self.client(host)?.execute(&cmd.to_shell_line()))
    }

    fn upload(&self, host: &str, local_path: &Path, remote_path: &str) -> Result<CommandOutput> {
        Ok(self.client(host)?.upload_file(local_path, remote_path))
    }

    fn http_get(&self, url: &str) -> Result<HttpResponse> {
        let response = reqwest::blocking::get(url)
            .map_err(|e| Error::health_request_failed(url, e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::health_request_failed(url, e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Output of one remote command on one host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostOutput {
    pub host: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

/// Applies [`Policy`] on top of an [`Executor`] for one context.
pub struct Runner<'a> {
    executor: &'a dyn Executor,
    ctx: &'a Context,
}

impl<'a> Runner<'a> {
    pub fn new(executor: &'a dyn Executor, ctx: &'a Context) -> Self {
        Self { executor, ctx }
    }

    pub fn ctx(&self) -> &'a Context {
        self.ctx
    }

    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }

    pub fn local(&self, cmd: &LocalCommand, policy: Policy) -> Result<CommandOutput> {
        let line = cmd.display();
        log_status!("local", "{}", line);

        let output = self.executor.run_local(cmd);
        if output.success {
            return Ok(output);
        }

        match policy {
            Policy::IgnoreFailure => {
                eprintln!(
                    "[local] Warning: '{}' exited with {} (ignored)",
                    line, output.exit_code
                );
                Ok(output)
            }
            Policy::PropagateFailure => Err(Error::local_command_failed(CommandFailedDetails {
                command: line,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                target: TargetDetails {
                    host: None,
                    user: None,
                },
            })),
        }
    }

    /// Run `cmd` on every host, in order.
    pub fn remote(&self, cmd: &RemoteCommand, policy: Policy) -> Result<Vec<HostOutput>> {
        let hosts = self.ctx.require_hosts()?;
        let line = cmd.to_shell_line();
        let mut results = Vec::with_capacity(hosts.len());

        for host in hosts {
            log_status!("remote", "{}: {}", host, line);
            let output = self.executor.run_remote(host, cmd)?;

            if !output.success {
                match policy {
                    Policy::IgnoreFailure => {
                        eprintln!(
                            "[remote] Warning: {}: '{}' exited with {} (ignored)",
                            host, line, output.exit_code
                        );
                    }
                    Policy::PropagateFailure => {
                        return Err(Error::remote_command_failed(CommandFailedDetails {
                            command: line,
                            exit_code: output.exit_code,
                            stdout: output.stdout,
                            stderr: output.stderr,
                            target: TargetDetails {
                                host: Some(host.clone()),
                                user: Some(self.ctx.user.clone()),
                            },
                        }));
                    }
                }
            }

            results.push(HostOutput {
                host: host.clone(),
                success: output.success,
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }

        Ok(results)
    }

    /// Copy a local file to `remote_path` on every host. Always propagates.
    pub fn put(&self, local_path: &Path, remote_path: &str) -> Result<Vec<HostOutput>> {
        let hosts = self.ctx.require_hosts()?;
        let mut results = Vec::with_capacity(hosts.len());

        for host in hosts {
            log_status!("put", "{} -> {}:{}", local_path.display(), host, remote_path);
            let output = self.executor.upload(host, local_path, remote_path)?;
            if !output.success {
                return Err(Error::deploy_upload_failed(UploadFailedDetails {
                    local_path: local_path.display().to_string(),
                    remote_path: remote_path.to_string(),
                    host: host.clone(),
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                }));
            }
            results.push(HostOutput {
                host: host.clone(),
                success: true,
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::cell::RefCell;

    struct Scripted {
        fail_hosts: Vec<&'static str>,
        local_success: bool,
        seen: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(fail_hosts: Vec<&'static str>, local_success: bool) -> Self {
            Self {
                fail_hosts,
                local_success,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Executor for Scripted {
        fn run_local(&self, cmd: &LocalCommand) -> CommandOutput {
            self.seen.borrow_mut().push(cmd.display());
            if self.local_success {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed(2, "boom")
            }
        }

        fn run_remote(&self, host: &str, cmd: &RemoteCommand) -> Result<CommandOutput> {
            self.seen
                .borrow_mut()
                .push(format!("{}: {}", host, cmd.to_shell_line()));
            if self.fail_hosts.contains(&host) {
                Ok(CommandOutput::failed(1, "nope"))
            } else {
                Ok(CommandOutput::ok("done"))
            }
        }

        fn upload(&self, host: &str, _: &Path, remote_path: &str) -> Result<CommandOutput> {
            self.seen
                .borrow_mut()
                .push(format!("{}: put {}", host, remote_path));
            if self.fail_hosts.contains(&host) {
                Ok(CommandOutput::failed(1, "scp: permission denied"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        }

        fn http_get(&self, _: &str) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: 200,
                body: "pong".to_string(),
            })
        }
    }

    fn ctx(hosts: &[&str]) -> Context {
        let config = Config {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Config::default()
        };
        Context::new(config, PathBuf::from("/src")).unwrap()
    }

    #[test]
    fn sudo_command_renders_quoted_line() {
        let cmd = RemoteCommand::sudo("mkdir")
            .arg("-p")
            .arg("/var/apps/my app");
        assert_eq!(cmd.to_shell_line(), "sudo mkdir -p '/var/apps/my app'");
    }

    #[test]
    fn user_command_has_no_sudo() {
        let cmd = RemoteCommand::user("initctl").args(["status", "api"]);
        assert_eq!(cmd.to_shell_line(), "initctl status api");
    }

    #[test]
    fn local_display_includes_env() {
        let cmd = LocalCommand::new("go")
            .args(["test", "-v", "pkg"])
            .env("GOPATH", "/src/my proj");
        assert_eq!(cmd.display(), "GOPATH='/src/my proj' go test -v pkg");
    }

    #[test]
    fn remote_fans_out_over_hosts_in_order() {
        let ctx = ctx(&["web1", "web2"]);
        let exec = Scripted::new(vec![], true);
        let runner = Runner::new(&exec, &ctx);

        let results = runner
            .remote(&RemoteCommand::sudo("true"), Policy::PropagateFailure)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(
            *exec.seen.borrow(),
            vec!["web1: sudo true".to_string(), "web2: sudo true".to_string()]
        );
    }

    #[test]
    fn ignore_failure_continues_to_next_host() {
        let ctx = ctx(&["web1", "web2"]);
        let exec = Scripted::new(vec!["web1"], true);
        let runner = Runner::new(&exec, &ctx);

        let results = runner
            .remote(&RemoteCommand::sudo("initctl").arg("stop"), Policy::IgnoreFailure)
            .unwrap();

        assert!(!results[0].success);
        assert!(results[1].success);
    }

    #[test]
    fn propagate_failure_stops_at_failing_host() {
        let ctx = ctx(&["web1", "web2"]);
        let exec = Scripted::new(vec!["web1"], true);
        let runner = Runner::new(&exec, &ctx);

        let err = runner
            .remote(&RemoteCommand::user("initctl").arg("status"), Policy::PropagateFailure)
            .unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert_eq!(err.details["target"]["host"], "web1");
        assert_eq!(exec.seen.borrow().len(), 1);
    }

    #[test]
    fn remote_without_hosts_fails_even_when_ignoring() {
        let ctx = ctx(&[]);
        let exec = Scripted::new(vec![], true);
        let runner = Runner::new(&exec, &ctx);

        let err = runner
            .remote(&RemoteCommand::sudo("true"), Policy::IgnoreFailure)
            .unwrap_err();
        assert_eq!(err.code.as_str(), "ssh.no_hosts");
    }

    #[test]
    fn local_policy_controls_error() {
        let ctx = ctx(&[]);
        let exec = Scripted::new(vec![], false);
        let runner = Runner::new(&exec, &ctx);
        let cmd = LocalCommand::new("go").arg("build");

        assert!(!runner.local(&cmd, Policy::IgnoreFailure).unwrap().success);
        let err = runner.local(&cmd, Policy::PropagateFailure).unwrap_err();
        assert_eq!(err.code.as_str(), "local.command_failed");
        assert_eq!(err.details["exitCode"], 2);
    }

    #[test]
    fn failed_upload_is_deploy_upload_failed() {
        let ctx = ctx(&["web1"]);
        let exec = Scripted::new(vec!["web1"], true);
        let runner = Runner::new(&exec, &ctx);

        let err = runner.put(Path::new("bin/BUILD"), "/tmp/BUILD").unwrap_err();
        assert_eq!(err.code.as_str(), "deploy.upload_failed");
        assert_eq!(err.details["remotePath"], "/tmp/BUILD");
    }
}
