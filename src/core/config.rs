use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Config file looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "deckhand.json";

/// Root configuration structure for deckhand.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_app")]
    pub app: String,

    /// Remote install directory. Defaults to `/var/apps/<app>`.
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_main")]
    pub main: String,

    /// Test targets. Defaults to `[app]`.
    #[serde(default)]
    pub tests: Option<Vec<String>>,

    #[serde(default = "default_stage")]
    pub stage: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Hosts used before any environment is selected.
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub environments: EnvironmentsConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub ssh: SshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: default_app(),
            path: None,
            user: default_user(),
            main: default_main(),
            tests: None,
            stage: default_stage(),
            branch: default_branch(),
            hosts: Vec::new(),
            environments: EnvironmentsConfig::default(),
            service: ServiceConfig::default(),
            build: BuildConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

/// Host list and branch applied when an environment is selected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentPreset {
    pub hosts: Vec<String>,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    #[serde(default = "default_production")]
    pub production: EnvironmentPreset,

    #[serde(default = "default_staging")]
    pub staging: EnvironmentPreset,
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            production: default_production(),
            staging: default_staging(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManagerKind {
    #[default]
    Upstart,
    Systemd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default)]
    pub manager: ServiceManagerKind,

    /// Account the service process runs as.
    #[serde(default = "default_service_user")]
    pub user: String,

    /// Port the service listens on; also used by `ping`.
    #[serde(default = "default_service_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            manager: ServiceManagerKind::default(),
            user: default_service_user(),
            port: default_service_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,

    #[serde(default = "default_toolchain")]
    pub toolchain: String,

    #[serde(default = "default_target_os")]
    pub target_os: String,

    #[serde(default = "default_target_arch")]
    pub target_arch: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            bin_dir: default_bin_dir(),
            toolchain: default_toolchain(),
            target_os: default_target_os(),
            target_arch: default_target_arch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_forward_agent")]
    pub forward_agent: bool,

    #[serde(default = "default_scp_flags")]
    pub scp_flags: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            identity_file: None,
            forward_agent: default_forward_agent(),
            scp_flags: default_scp_flags(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_app() -> String {
    "appname".to_string()
}

fn default_user() -> String {
    "user".to_string()
}

fn default_main() -> String {
    "src/cmd/main.go".to_string()
}

fn default_stage() -> String {
    "staging".to_string()
}

fn default_branch() -> String {
    "staging".to_string()
}

fn default_production() -> EnvironmentPreset {
    EnvironmentPreset {
        hosts: vec!["host.com".to_string()],
        branch: "production".to_string(),
    }
}

fn default_staging() -> EnvironmentPreset {
    EnvironmentPreset {
        hosts: vec!["staging.host.com".to_string()],
        branch: "staging".to_string(),
    }
}

fn default_service_user() -> String {
    "deploy".to_string()
}

fn default_service_port() -> u16 {
    9999
}

fn default_bin_dir() -> String {
    "bin".to_string()
}

fn default_toolchain() -> String {
    "go".to_string()
}

fn default_target_os() -> String {
    "linux".to_string()
}

fn default_target_arch() -> String {
    "amd64".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_forward_agent() -> bool {
    true
}

fn default_scp_flags() -> Vec<String> {
    vec!["-O".to_string()]
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load configuration.
///
/// An explicit path must exist. Without one, `deckhand.json` in `workdir` is
/// used when present and built-in defaults otherwise.
pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Config> {
    match explicit {
        Some(path) => load_from_file(path),
        None => {
            let path = default_path(workdir);
            if path.exists() {
                load_from_file(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn default_path(workdir: &Path) -> PathBuf {
    workdir.join(CONFIG_FILE_NAME)
}

fn load_from_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse(&content, &path.display().to_string())
}

pub fn parse(content: &str, origin: &str) -> Result<Config> {
    serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = parse("{}", "inline").unwrap();
        assert_eq!(config.app, "appname");
        assert_eq!(config.user, "user");
        assert_eq!(config.main, "src/cmd/main.go");
        assert_eq!(config.stage, "staging");
        assert_eq!(config.branch, "staging");
        assert!(config.hosts.is_empty());
        assert_eq!(config.environments.production.hosts, vec!["host.com"]);
        assert_eq!(config.environments.staging.branch, "staging");
        assert_eq!(config.service.manager, ServiceManagerKind::Upstart);
        assert_eq!(config.service.port, 9999);
        assert_eq!(config.build.toolchain, "go");
        assert_eq!(config.ssh.scp_flags, vec!["-O"]);
        assert!(config.ssh.forward_agent);
    }

    #[test]
    fn nested_fields_use_camel_case() {
        let config = parse(
            r#"{
                "app": "api",
                "service": { "manager": "systemd", "port": 8080 },
                "build": { "binDir": "out", "targetArch": "arm64" },
                "ssh": { "identityFile": "~/.ssh/deploy", "forwardAgent": false },
                "environments": { "production": { "hosts": ["a", "b"], "branch": "main" } }
            }"#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.app, "api");
        assert_eq!(config.service.manager, ServiceManagerKind::Systemd);
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.service.user, "deploy");
        assert_eq!(config.build.bin_dir, "out");
        assert_eq!(config.build.target_arch, "arm64");
        assert_eq!(config.build.target_os, "linux");
        assert_eq!(config.ssh.identity_file.as_deref(), Some("~/.ssh/deploy"));
        assert!(!config.ssh.forward_agent);
        assert_eq!(config.environments.production.hosts, vec!["a", "b"]);
        assert_eq!(config.environments.staging.hosts, vec!["staging.host.com"]);
    }

    #[test]
    fn invalid_json_reports_origin() {
        let err = parse("{ not json", "deckhand.json").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
        assert_eq!(err.details["path"], "deckhand.json");
    }

    #[test]
    fn missing_default_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(None, dir.path()).unwrap();
        assert_eq!(config.app, "appname");
    }

    #[test]
    fn default_file_is_picked_up_from_workdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(default_path(dir.path()), r#"{ "app": "billing" }"#).unwrap();
        let config = load(None, dir.path()).unwrap();
        assert_eq!(config.app, "billing");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.json")), dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }
}
