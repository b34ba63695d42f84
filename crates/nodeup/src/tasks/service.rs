//! systemd units.

use crate::host::NodeHost;
use converge::{
    Change, Changeset, Context, Diff, Error, RenderTarget, Result, Task, TaskKey, TargetKind,
};

/// A unit that should be installed, and optionally enabled and running.
///
/// A changed definition on a running unit restarts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Unit name, e.g. `kubelet.service`
    pub name: String,
    pub definition: String,
    pub enabled: bool,
    pub running: bool,
    /// Tasks the unit needs in place first (its config files)
    pub after: Vec<TaskKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub definition: String,
    pub enabled: bool,
    pub running: bool,
}

impl Service {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
            enabled: true,
            running: true,
            after: Vec::new(),
        }
    }

    fn apply(&self, host: &NodeHost, change: &Change<'_, ServiceState>) -> Result<()> {
        let services = host.services();
        let redefined = change.is_create() || change.touches("definition");
        if redefined {
            services.install_unit(&self.name, &self.definition)?;
            services.daemon_reload()?;
        }
        if self.enabled && (change.is_create() || change.touches("enabled")) {
            services.enable(&self.name)?;
        }
        if self.running {
            if change.is_create() || change.touches("running") {
                services.start(&self.name)?;
            } else if redefined {
                log::info!("Restarting {} after its definition changed", self.name);
                services.restart(&self.name)?;
            }
        }
        Ok(())
    }
}

impl Task<NodeHost> for Service {
    type State = ServiceState;

    fn kind(&self) -> &'static str {
        "Service"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.after.clone()
    }

    fn supports_target(&self, target: TargetKind) -> bool {
        target == TargetKind::Direct
    }

    fn find(&self, ctx: &Context<'_, NodeHost>) -> Result<Option<ServiceState>> {
        let status = ctx.api()?.services().status(&self.name)?;
        Ok(status.definition.map(|definition| ServiceState {
            definition,
            enabled: status.enabled,
            running: status.active,
        }))
    }

    fn expected(&self, _ctx: &Context<'_, NodeHost>) -> Result<ServiceState> {
        Ok(ServiceState {
            definition: self.definition.clone(),
            enabled: self.enabled,
            running: self.running,
        })
    }

    fn diff(&self, actual: Option<&ServiceState>, expected: &ServiceState) -> Changeset {
        // Disabling or stopping units is out of nodeup's hands; only report
        // the directions it can act on.
        let mut changes = Diff::new(actual, expected)
            .field("definition", |s| &s.definition)
            .field("enabled", |s| &s.enabled)
            .field("running", |s| &s.running)
            .finish();
        changes.retain(|c| match c.field.as_str() {
            "enabled" => expected.enabled,
            "running" => expected.running,
            _ => true,
        });
        changes
    }

    fn check_changes(&self, change: &Change<'_, ServiceState>) -> Result<()> {
        if change.is_create() && self.definition.trim().is_empty() {
            return Err(Error::required("definition"));
        }
        Ok(())
    }

    fn render(
        &self,
        _ctx: &Context<'_, NodeHost>,
        target: RenderTarget<'_, NodeHost>,
        change: &Change<'_, ServiceState>,
    ) -> Result<()> {
        match target {
            RenderTarget::Direct(host) => self.apply(host, change),
            RenderTarget::Terraform(_) | RenderTarget::CloudFormation(_) => Err(Error::NoRenderer {
                task: Task::key(self),
                target: target.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MemoryServices, ServiceManager};
    use converge::{ExecuteOptions, GraphBuilder, NoProgress, RunReport, Target, execute};

    const UNIT: &str = "[Service]\nExecStart=/usr/local/bin/kubelet\n";

    fn run(host: &NodeHost, service: Service) -> RunReport {
        let mut builder = GraphBuilder::new();
        builder.add_task(service).unwrap();
        let graph = builder.seal().unwrap();
        let ctx = Context::new(Target::Direct(host));
        execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress).unwrap()
    }

    #[test]
    fn test_install_enable_start() {
        let services = MemoryServices::new();
        let host = NodeHost::new("/", services);

        let report = run(&host, Service::new("kubelet.service", UNIT));
        assert_eq!(report.summary.created, 1);
        let status = host.services().status("kubelet.service").unwrap();
        assert!(status.enabled && status.active);

        let report = run(&host, Service::new("kubelet.service", UNIT));
        assert_eq!(report.summary.unchanged, 1);
    }

    #[test]
    fn test_stopped_unit_is_started_not_reinstalled() {
        let services = MemoryServices::new();
        services.install_unit("kubelet.service", UNIT).unwrap();
        services.enable("kubelet.service").unwrap();
        let host = NodeHost::new("/", services);

        let report = run(&host, Service::new("kubelet.service", UNIT));
        let task = report.get(&TaskKey::new("Service", "kubelet.service")).unwrap();
        assert_eq!(task.changes.fields(), vec!["running"]);
        assert!(host.services().status("kubelet.service").unwrap().active);
    }

    #[test]
    fn test_definition_change_restarts() {
        let host = NodeHost::new("/", MemoryServices::new());
        run(&host, Service::new("kubelet.service", UNIT));

        let report = run(&host, Service::new("kubelet.service", "[Service]\nExecStart=/bin/true\n"));
        assert_eq!(report.summary.updated, 1);
        assert_eq!(
            host.services().status("kubelet.service").unwrap().definition.as_deref(),
            Some("[Service]\nExecStart=/bin/true\n")
        );
    }

    #[test]
    fn test_disabled_unit_is_left_alone() {
        let host = NodeHost::new("/", MemoryServices::new());
        run(&host, Service::new("kubelet.service", UNIT));

        let mut quiet = Service::new("kubelet.service", UNIT);
        quiet.enabled = false;
        quiet.running = false;
        let report = run(&host, quiet);
        assert_eq!(report.summary.unchanged, 1);
    }

    #[test]
    fn test_empty_definition_is_required() {
        let host = NodeHost::new("/", MemoryServices::new());
        let report = run(&host, Service::new("empty.service", " "));
        assert_eq!(report.summary.failed, 1);
    }
}
