use crate::config::SshConfig;
use crate::error::{Error, Result};
use crate::utils::shell;
use std::path::Path;
use std::process::Command;

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub forward_agent: bool,
    pub scp_flags: Vec<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }

    /// Stdout and stderr joined, for display.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

impl From<std::io::Result<std::process::Output>> for CommandOutput {
    fn from(output: std::io::Result<std::process::Output>) -> Self {
        match output {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::failed(-1, format!("Command error: {}", e)),
        }
    }
}

impl SshClient {
    pub fn new(host: &str, user: &str, config: &SshConfig) -> Result<Self> {
        let identity_file = match &config.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(host);
        if is_local {
            log_status!("ssh", "Host '{}' is localhost, using local execution", host);
        }

        Ok(Self {
            host: host.to_string(),
            user: user.to_string(),
            port: config.port,
            identity_file,
            forward_agent: config.forward_agent,
            scp_flags: config.scp_flags.clone(),
            is_local,
        })
    }

    pub fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        if self.forward_agent {
            args.push("-A".to_string());
        }

        // Fail instead of prompting for a password.
        args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        args
    }

    pub fn build_scp_args(&self, local_path: &Path, remote_path: &str) -> Vec<String> {
        let mut args: Vec<String> = self.scp_flags.clone();

        if let Some(identity_file) = &self.identity_file {
            args.extend(["-i".to_string(), identity_file.clone()]);
        }

        if self.port != 22 {
            args.extend(["-P".to_string(), self.port.to_string()]);
        }

        args.push(local_path.to_string_lossy().to_string());
        args.push(format!(
            "{}@{}:{}",
            self.user,
            self.host,
            shell::quote_path(remote_path)
        ));

        args
    }

    pub fn execute(&self, command: &str) -> CommandOutput {
        if self.is_local {
            return execute_local_shell(command);
        }

        Command::new("ssh")
            .args(self.build_ssh_args(command))
            .output()
            .into()
    }

    pub fn upload_file(&self, local_path: &Path, remote_path: &str) -> CommandOutput {
        if self.is_local {
            return Command::new("cp")
                .arg(local_path)
                .arg(remote_path)
                .output()
                .into();
        }

        log_status!(
            "scp",
            "{} -> {}@{}:{}",
            local_path.display(),
            self.user,
            self.host,
            remote_path
        );

        Command::new("scp")
            .args(self.build_scp_args(local_path, remote_path))
            .output()
            .into()
    }
}

/// Run a program directly, without a shell.
pub fn execute_local(
    program: &str,
    args: &[String],
    current_dir: Option<&Path>,
    env: &[(String, String)],
) -> CommandOutput {
    let mut cmd = Command::new(program);
    cmd.args(args);

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    cmd.output().into()
}

fn execute_local_shell(command: &str) -> CommandOutput {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    cmd.output().into()
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(host: &str, config: SshConfig) -> SshClient {
        SshClient::new(host, "deploy", &config).unwrap()
    }

    #[test]
    fn ssh_args_default_port_with_agent_forwarding() {
        let c = client("web1.example.com", SshConfig::default());
        let args = c.build_ssh_args("sudo initctl start api");

        assert!(args.contains(&"-A".to_string()));
        assert!(!args.contains(&"-p".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(!args
            .iter()
            .any(|a| a.starts_with("ServerAlive") || a.starts_with("ConnectTimeout")));
        assert_eq!(args[args.len() - 2], "deploy@web1.example.com");
        assert_eq!(args[args.len() - 1], "sudo initctl start api");
    }

    #[test]
    fn ssh_args_custom_port_without_agent() {
        let config = SshConfig {
            port: 2222,
            forward_agent: false,
            ..SshConfig::default()
        };
        let args = client("web1", config).build_ssh_args("true");

        assert!(!args.contains(&"-A".to_string()));
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "2222");
    }

    #[test]
    fn scp_args_quote_remote_path() {
        let c = client("web1", SshConfig::default());
        let args = c.build_scp_args(Path::new("bin/BUILD"), "/tmp/BUILD");

        assert_eq!(args[0], "-O");
        assert_eq!(args[args.len() - 2], "bin/BUILD");
        assert_eq!(args[args.len() - 1], "deploy@web1:'/tmp/BUILD'");
    }

    #[test]
    fn missing_identity_file_is_an_error() {
        let config = SshConfig {
            identity_file: Some("/definitely/not/here/id_rsa".to_string()),
            ..SshConfig::default()
        };
        let err = SshClient::new("web1", "deploy", &config).err().unwrap();
        assert_eq!(err.code.as_str(), "ssh.identity_file_not_found");
    }

    #[test]
    fn localhost_is_local() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("::1"));
        assert!(!is_local_host("web1"));
        assert!(client("127.0.0.1", SshConfig::default()).is_local);
    }

    #[test]
    fn combined_output_joins_streams() {
        let out = CommandOutput {
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            success: false,
            exit_code: 1,
        };
        assert_eq!(out.combined(), "out\nerr");
        assert_eq!(CommandOutput::ok("x").combined(), "x");
    }

    #[cfg(unix)]
    #[test]
    fn execute_local_runs_without_shell() {
        let out = execute_local("echo", &["$HOME".to_string()], None, &[]);
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "$HOME");
    }

    #[cfg(unix)]
    #[test]
    fn execute_local_reports_missing_program() {
        let out = execute_local("deckhand-no-such-program", &[], None, &[]);
        assert!(!out.success);
        assert_eq!(out.exit_code, -1);
    }
}
