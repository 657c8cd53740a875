//! Service manager integration: descriptor templates and control commands.

use crate::config::ServiceManagerKind;
use crate::context::Context;
use crate::executor::RemoteCommand;
use crate::utils::template;

const UPSTART_TEMPLATE: &str = r#"description     "{{app}}"

start on filesystem
stop on runlevel [!2345]

respawn limit 10 5

exec su - {{service_user}} -c '{{binary}} -env={{stage}} -log_dir={{log_dir}} -v=1 -port={{port}}'
"#;

const SYSTEMD_TEMPLATE: &str = r#"[Unit]
Description={{app}}
After=network.target
StartLimitBurst=10
StartLimitIntervalSec=5

[Service]
User={{service_user}}
ExecStart={{binary}} -env={{stage}} -log_dir={{log_dir}} -v=1 -port={{port}}
Restart=on-failure

[Install]
WantedBy=multi-user.target
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Status,
}

impl ServiceAction {
    fn verb(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Status => "status",
        }
    }
}

pub struct ServiceManager {
    kind: ServiceManagerKind,
}

impl ServiceManager {
    pub fn for_context(ctx: &Context) -> Self {
        Self {
            kind: ctx.service.manager,
        }
    }

    /// Final location of the descriptor on the remote host.
    pub fn descriptor_path(&self, app: &str) -> String {
        format!("{}/{}", self.descriptor_dir(), self.descriptor_file_name(app))
    }

    pub fn descriptor_dir(&self) -> &'static str {
        match self.kind {
            ServiceManagerKind::Upstart => "/etc/init",
            ServiceManagerKind::Systemd => "/etc/systemd/system",
        }
    }

    pub fn descriptor_file_name(&self, app: &str) -> String {
        match self.kind {
            ServiceManagerKind::Upstart => format!("{}.conf", app),
            ServiceManagerKind::Systemd => format!("{}.service", app),
        }
    }

    pub fn render_descriptor(&self, ctx: &Context) -> String {
        let template = match self.kind {
            ServiceManagerKind::Upstart => UPSTART_TEMPLATE,
            ServiceManagerKind::Systemd => SYSTEMD_TEMPLATE,
        };
        template::render(template, &ctx.template_vars())
    }

    /// Control command for `action`. `status` is read-only and runs unprivileged.
    pub fn control(&self, action: ServiceAction, app: &str) -> RemoteCommand {
        let base = match (self.kind, action) {
            (ServiceManagerKind::Upstart, ServiceAction::Status) => RemoteCommand::user("initctl"),
            (ServiceManagerKind::Upstart, _) => RemoteCommand::sudo("initctl"),
            (ServiceManagerKind::Systemd, ServiceAction::Status) => {
                RemoteCommand::user("systemctl")
            }
            (ServiceManagerKind::Systemd, _) => RemoteCommand::sudo("systemctl"),
        };
        base.arg(action.verb()).arg(app)
    }

    /// Command to run after a descriptor is installed, if the manager needs one.
    pub fn reload(&self) -> Option<RemoteCommand> {
        match self.kind {
            ServiceManagerKind::Upstart => None,
            ServiceManagerKind::Systemd => Some(RemoteCommand::sudo("systemctl").arg("daemon-reload")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::executor::Privilege;
    use std::path::PathBuf;

    fn ctx(kind: ServiceManagerKind) -> Context {
        let mut config = Config {
            app: "api".to_string(),
            ..Config::default()
        };
        config.service.manager = kind;
        Context::new(config, PathBuf::from("/src")).unwrap()
    }

    #[test]
    fn upstart_descriptor_matches_context() {
        let ctx = ctx(ServiceManagerKind::Upstart);
        let text = ServiceManager::for_context(&ctx).render_descriptor(&ctx);

        assert!(text.starts_with("description     \"api\""));
        assert!(text.contains("respawn limit 10 5"));
        assert!(text.contains(
            "exec su - deploy -c '/var/apps/api/api -env=staging -log_dir=/var/apps/api/logs -v=1 -port=9999'"
        ));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn systemd_descriptor_matches_context() {
        let ctx = ctx(ServiceManagerKind::Systemd);
        let text = ServiceManager::for_context(&ctx).render_descriptor(&ctx);

        assert!(text.contains("User=deploy"));
        assert!(text.contains(
            "ExecStart=/var/apps/api/api -env=staging -log_dir=/var/apps/api/logs -v=1 -port=9999"
        ));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn descriptor_paths_per_manager() {
        let upstart = ServiceManager {
            kind: ServiceManagerKind::Upstart,
        };
        let systemd = ServiceManager {
            kind: ServiceManagerKind::Systemd,
        };
        assert_eq!(upstart.descriptor_path("api"), "/etc/init/api.conf");
        assert_eq!(systemd.descriptor_path("api"), "/etc/systemd/system/api.service");
    }

    #[test]
    fn status_is_unprivileged_start_stop_are_sudo() {
        let m = ServiceManager {
            kind: ServiceManagerKind::Upstart,
        };
        assert_eq!(m.control(ServiceAction::Status, "api").privilege, Privilege::User);
        assert_eq!(
            m.control(ServiceAction::Stop, "api").to_shell_line(),
            "sudo initctl stop api"
        );
        assert_eq!(
            m.control(ServiceAction::Start, "api").to_shell_line(),
            "sudo initctl start api"
        );
    }

    #[test]
    fn only_systemd_needs_reload() {
        let upstart = ServiceManager {
            kind: ServiceManagerKind::Upstart,
        };
        let systemd = ServiceManager {
            kind: ServiceManagerKind::Systemd,
        };
        assert!(upstart.reload().is_none());
        assert_eq!(
            systemd.reload().unwrap().to_shell_line(),
            "sudo systemctl daemon-reload"
        );
    }
}
