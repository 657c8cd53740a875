//! Environment context shared by every task in one invocation.
//!
//! Built once from [`Config`] and passed by reference into each task.
//! Environment-selection tasks are the only mutators.

use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::{BuildConfig, Config, EnvironmentPreset, EnvironmentsConfig, ServiceConfig, SshConfig};
use crate::error::{Error, Result};

/// Name of the metadata file written next to the binary by `build`.
pub const BUILD_INFO_FILE: &str = "BUILD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Production,
    Staging,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Production => "production",
            Stage::Staging => "staging",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" => Ok(Stage::Production),
            "staging" => Ok(Stage::Staging),
            other => Err(Error::validation_invalid_argument(
                "stage",
                "Stage must be 'production' or 'staging'",
                Some(other.to_string()),
                Some(vec!["production".to_string(), "staging".to_string()]),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    pub app: String,
    /// Remote install directory.
    pub path: String,
    pub hosts: Vec<String>,
    /// Remote login user; also owns the install directory.
    pub user: String,
    pub branch: String,
    pub stage: Stage,
    /// Build entry point, relative to `workdir`.
    pub main: String,
    pub tests: Vec<String>,
    /// Local project root. Build output and `GOPATH` are relative to it.
    pub workdir: PathBuf,
    pub service: ServiceConfig,
    pub build: BuildConfig,
    pub ssh: SshConfig,
    environments: EnvironmentsConfig,
    /// `path` and `tests` follow `app` unless set explicitly.
    explicit_path: bool,
    explicit_tests: bool,
}

impl Context {
    pub fn new(config: Config, workdir: PathBuf) -> Result<Self> {
        if config.app.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "app",
                Some(config.app),
                "Application name cannot be empty",
            ));
        }
        if config.user.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "user",
                Some(config.user),
                "Remote user cannot be empty",
            ));
        }

        let stage = config.stage.parse::<Stage>().map_err(|_| {
            Error::config_invalid_value(
                "stage",
                Some(config.stage.clone()),
                "Stage must be 'production' or 'staging'",
            )
        })?;

        let explicit_path = config.path.as_deref().is_some_and(|p| !p.trim().is_empty());
        let explicit_tests = config.tests.is_some();
        let path = config
            .path
            .filter(|_| explicit_path)
            .unwrap_or_else(|| default_install_path(&config.app));
        let tests = config.tests.unwrap_or_else(|| vec![config.app.clone()]);

        Ok(Self {
            app: config.app,
            path,
            hosts: config.hosts,
            user: config.user,
            branch: config.branch,
            stage,
            main: config.main,
            tests,
            workdir,
            service: config.service,
            build: config.build,
            ssh: config.ssh,
            environments: config.environments,
            explicit_path,
            explicit_tests,
        })
    }

    /// Replace hosts, stage and branch with the preset for `stage`.
    pub fn select_environment(&mut self, stage: Stage) {
        let preset: &EnvironmentPreset = match stage {
            Stage::Production => &self.environments.production,
            Stage::Staging => &self.environments.staging,
        };

        self.hosts = preset.hosts.clone();
        self.branch = preset.branch.clone();
        self.stage = stage;

        log_status!(
            "env",
            "Selected {} ({} host(s), branch {})",
            stage,
            self.hosts.len(),
            self.branch
        );
    }

    /// Apply a single `key=value` override from the command line.
    ///
    /// An empty `path` or `tests` falls back to the value derived from `app`.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "app" => {
                self.app = non_empty("app", value)?;
                self.derive_from_app();
            }
            "path" => {
                self.explicit_path = !value.trim().is_empty();
                if self.explicit_path {
                    self.path = value.to_string();
                }
                self.derive_from_app();
            }
            "user" => self.user = non_empty("user", value)?,
            "branch" => self.branch = value.to_string(),
            "main" => self.main = value.to_string(),
            "stage" => self.stage = value.parse()?,
            "hosts" => self.hosts = split_list(value),
            "tests" => {
                let tests = split_list(value);
                self.explicit_tests = !tests.is_empty();
                if self.explicit_tests {
                    self.tests = tests;
                }
                self.derive_from_app();
            }
            "serviceUser" => self.service.user = value.to_string(),
            "port" => {
                self.service.port = value.parse().map_err(|_| {
                    Error::validation_invalid_argument(
                        "port",
                        "Port must be a number between 0 and 65535",
                        Some(value.to_string()),
                        None,
                    )
                })?
            }
            other => {
                return Err(Error::validation_invalid_argument(
                    "set",
                    format!("Unknown context key '{}'", other),
                    Some(other.to_string()),
                    Some(OVERRIDABLE_KEYS.iter().map(|k| k.to_string()).collect()),
                ))
            }
        }
        Ok(())
    }

    fn derive_from_app(&mut self) {
        if !self.explicit_path {
            self.path = default_install_path(&self.app);
        }
        if !self.explicit_tests {
            self.tests = vec![self.app.clone()];
        }
    }

    /// Hosts for remote operations; an empty list is an error.
    pub fn require_hosts(&self) -> Result<&[String]> {
        if self.hosts.is_empty() {
            return Err(Error::ssh_no_hosts(self.stage.as_str()));
        }
        Ok(&self.hosts)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.workdir.join(&self.build.bin_dir)
    }

    pub fn local_binary(&self) -> PathBuf {
        self.bin_dir().join(&self.app)
    }

    pub fn local_build_info(&self) -> PathBuf {
        self.bin_dir().join(BUILD_INFO_FILE)
    }

    pub fn coverage_dir(&self) -> PathBuf {
        self.bin_dir().join("testdata")
    }

    pub fn remote_binary(&self) -> String {
        format!("{}/{}", self.path, self.app)
    }

    pub fn remote_logs(&self) -> String {
        format!("{}/logs", self.path)
    }

    /// Values available to service descriptor templates.
    pub fn template_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("app", self.app.clone()),
            ("path", self.path.clone()),
            ("stage", self.stage.as_str().to_string()),
            ("branch", self.branch.clone()),
            ("user", self.user.clone()),
            ("service_user", self.service.user.clone()),
            ("port", self.service.port.to_string()),
            ("binary", self.remote_binary()),
            ("log_dir", self.remote_logs()),
        ]
    }
}

pub const OVERRIDABLE_KEYS: &[&str] = &[
    "app",
    "path",
    "user",
    "branch",
    "main",
    "stage",
    "hosts",
    "tests",
    "serviceUser",
    "port",
];

fn default_install_path(app: &str) -> String {
    format!("/var/apps/{}", app)
}

fn non_empty(key: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::validation_invalid_argument(
            key,
            format!("'{}' cannot be empty", key),
            None,
            None,
        ));
    }
    Ok(value.to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
