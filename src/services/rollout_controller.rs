//! Rollout controller - drives every service of an instruction through the
//! rollout state machine
//!
//! Services are rolled out one at a time, in instruction order. A service
//! whose rollout goes unhealthy is reverted and marked failed while its
//! siblings carry on; anything else that goes wrong aborts the whole run.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Instruction, ServiceSpec, Settings};
use crate::domain::manifest::{self, write_manifest};
use crate::domain::{
    BoundService, DeploymentReport, Removals, RolloutPhase, ServiceOutcome, ServiceRollout,
    Templates,
};
use crate::error::{DeployError, RolloutError};
use crate::infrastructure::{ClusterControl, CommandRunner};
use crate::services::{PortRegistry, ProxyReconciler};

/// File name of the proxy manifest rendered by the decommission pass
const REMOVAL_PROXY_MANIFEST: &str = "removed-proxy.json";

pub struct RolloutController {
    cluster: Arc<dyn ClusterControl>,
    runner: Arc<dyn CommandRunner>,
    templates: Templates,
    settings: Settings,
    /// Per-run directory the rendered manifests are written to
    workdir: PathBuf,
}

impl RolloutController {
    pub fn new(
        cluster: Arc<dyn ClusterControl>,
        runner: Arc<dyn CommandRunner>,
        templates: Templates,
        settings: Settings,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cluster,
            runner,
            templates,
            settings,
            workdir: workdir.into(),
        }
    }

    /// Roll out every service, then decommission removed ones.
    ///
    /// Returns the report even when some services rolled back; callers
    /// turn that into an error with [`DeploymentReport::into_result`].
    pub async fn run(&self, instruction: &mut Instruction) -> Result<DeploymentReport, DeployError> {
        let registry = PortRegistry::new(self.cluster.clone());
        let current = registry.current_services().await;

        let mut rng = StdRng::from_entropy();
        PortRegistry::assign_ports(&mut instruction.services, &current, &mut rng)?;

        let removals = removals(instruction, &current);
        let timeout = instruction.timeout();
        let reconciler = ProxyReconciler::new(
            self.cluster.clone(),
            self.settings.proxy.workload.as_str(),
            self.settings.proxy.route_host.as_str(),
            self.settings.proxy.acme_url(instruction.production_tls()),
        );

        let mut report = DeploymentReport::default();
        for service in instruction.services.iter_mut() {
            let rollout = self
                .deploy_service(service, &current, &reconciler, &removals, timeout)
                .await?;
            report.services.push(rollout);
        }

        if !removals.is_empty() {
            report.removed = self.decommission(&reconciler, &removals).await?;
        }

        Ok(report)
    }

    async fn deploy_service(
        &self,
        service: &mut ServiceSpec,
        current: &[BoundService],
        reconciler: &ProxyReconciler,
        removals: &Removals,
        timeout: Option<Duration>,
    ) -> Result<ServiceRollout, DeployError> {
        let mut rollout = ServiceRollout::new(service.name.as_str());
        let workload = format!("deployment/{}", service.name);

        if !service.force_deployment && current.iter().any(|s| s.name == service.name) {
            rollout.advance(RolloutPhase::ReadyCheck);
            let status = self.cluster.rollout_status(&workload, None).await?;
            if !status.success() {
                error!("❌ {} has an unsettled rollout, aborting", workload);
                for line in &status.lines {
                    error!("   {}", line);
                }
                return Err(RolloutError::NotReady {
                    name: service.name.clone(),
                }
                .into());
            }
        }

        rollout.advance(RolloutPhase::Rendering);
        let routes = reconciler
            .reconcile(&service.domains, service.service_port, removals)
            .await;
        service.deploy_proxy = routes.deploy_required;
        let rendered = manifest::render(service, &self.templates, &routes.proxy_state())?;
        let paths = rendered.write(&self.workdir, &service.name).await?;

        self.prepare_host(service).await?;

        if let Some(storage) = &paths.storage {
            rollout.advance(RolloutPhase::ApplyingStorage);
            let result = self.cluster.apply(storage).await?;
            if !result.success() {
                warn!(
                    "Storage apply for {} exited with {}, continuing",
                    service.name, result.code
                );
            }
        }

        rollout.advance(RolloutPhase::ApplyingWorkload);
        self.cluster
            .apply(&paths.workload)
            .await?
            .require_success(format!("apply -f {}", paths.workload.display()))?;

        if service.deploy_proxy {
            rollout.advance(RolloutPhase::ApplyingProxy);
            self.cluster
                .apply(&paths.proxy)
                .await?
                .require_success(format!("apply -f {}", paths.proxy.display()))?;
        }

        rollout.advance(RolloutPhase::Observing);
        let status = self.cluster.rollout_status(&workload, timeout).await?;

        if status.success() {
            rollout.advance(RolloutPhase::Committed);
            if let Some(command) = &service.post_command {
                rollout.advance(RolloutPhase::PostAction);
                self.runner.execute(command, true).await?;
            }
            rollout.finish(ServiceOutcome::Deployed);
        } else {
            rollout.advance(RolloutPhase::RollingBack);
            self.roll_back(&service.name, &workload, timeout).await;
            rollout.advance(RolloutPhase::RolledBack);
            rollout.finish(ServiceOutcome::RolledBack);
        }

        Ok(rollout)
    }

    /// Registry login, kubelet credentials and the service's pre-command
    async fn prepare_host(&self, service: &ServiceSpec) -> Result<(), DeployError> {
        if let Some(command) = &service.docker_login_command {
            self.runner.execute(command, true).await?;
        }

        let credentials = &self.settings.docker_credentials;
        if credentials.source.exists() {
            let command = format!(
                "sudo cp {} {}",
                credentials.source.display(),
                credentials.kubelet_dir.display()
            );
            self.runner.execute(&command, true).await?;
        }

        if let Some(command) = &service.pre_command {
            self.runner.execute(command, true).await?;
        }

        Ok(())
    }

    /// Dump pod logs, undo once and observe once more. Nothing here fails
    /// the run; the service is already marked failed.
    async fn roll_back(&self, name: &str, workload: &str, timeout: Option<Duration>) {
        error!("❌ Rollout of {} failed, rolling back", name);

        for (pod, lines) in self.cluster.pod_logs(name).await {
            error!("── logs of {} ──", pod);
            for line in lines {
                error!("   {}", line);
            }
        }

        match self.cluster.rollout_undo(workload).await {
            Ok(result) if result.success() => info!("↩️  Undo issued for {}", workload),
            Ok(result) => error!("Undo of {} exited with {}", workload, result.code),
            Err(e) => error!("Undo of {} failed: {}", workload, e),
        }

        match self.cluster.rollout_status(workload, timeout).await {
            Ok(result) if result.success() => info!("{} is back on its previous revision", workload),
            Ok(result) => error!(
                "{} still unhealthy after undo (exit {})",
                workload, result.code
            ),
            Err(e) => error!("Status of {} after undo unavailable: {}", workload, e),
        }
    }

    /// Drop routes of removed services, then delete their workloads
    async fn decommission(
        &self,
        reconciler: &ProxyReconciler,
        removals: &Removals,
    ) -> Result<Vec<String>, DeployError> {
        info!("🧹 Decommissioning: {}", removals.services.join(", "));

        let routes = reconciler.reconcile(&[], None, removals).await;
        if routes.deploy_required {
            let proxy = manifest::render_proxy(&self.templates, &routes.proxy_state())?;
            let path = write_manifest(&self.workdir, REMOVAL_PROXY_MANIFEST, &proxy).await?;
            self.cluster
                .apply(&path)
                .await?
                .require_success(format!("apply -f {}", path.display()))?;
        }

        for name in &removals.services {
            for resource in [format!("deployment/{}", name), format!("service/{}", name)] {
                let result = self.cluster.delete(&resource).await?;
                if !result.success() {
                    warn!("Delete of {} exited with {}", resource, result.code);
                }
            }
        }

        Ok(removals.services.clone())
    }
}

/// Domains and ports to drop, from the instruction and the pre-run registry
fn removals(instruction: &Instruction, current: &[BoundService]) -> Removals {
    let services: Vec<String> = instruction
        .remove_services
        .iter()
        .map(|s| s.name.clone())
        .collect();

    let mut domains: HashSet<String> = instruction.remove_domains.iter().cloned().collect();
    domains.extend(
        instruction
            .remove_services
            .iter()
            .flat_map(|s| s.domains.iter().cloned()),
    );

    let ports = current
        .iter()
        .filter(|s| services.contains(&s.name))
        .filter_map(|s| s.port)
        .collect();

    Removals {
        services,
        domains,
        ports,
    }
}
