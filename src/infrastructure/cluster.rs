//! Cluster control boundary
//!
//! The control plane is driven through its CLI. `ClusterControl` is the
//! capability set the rollout controller needs; `Kubectl` implements it by
//! shelling out through a [`CommandRunner`].

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::command::{CommandResult, CommandRunner};
use crate::error::CommandError;

/// Pod log lines kept per pod when a rollout fails
const POD_LOG_TAIL: u32 = 50;

/// Operations on cluster state. Workloads are addressed as `kind/name`.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Apply a manifest file. The exit code is returned, not judged.
    async fn apply(&self, manifest: &Path) -> Result<CommandResult, CommandError>;

    /// Rollout status; with a timeout the call watches until ready or expiry
    async fn rollout_status(
        &self,
        workload: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, CommandError>;

    async fn rollout_undo(&self, workload: &str) -> Result<CommandResult, CommandError>;

    async fn rollout_restart(&self, workload: &str) -> Result<CommandResult, CommandError>;

    /// Fetch a resource as JSON. Any failure reads as absent.
    async fn query(&self, resource: &str) -> Option<Value>;

    async fn delete(&self, resource: &str) -> Result<CommandResult, CommandError>;

    /// Recent logs of every pod labelled `app=<app>`
    async fn pod_logs(&self, app: &str) -> Vec<(String, Vec<String>)>;
}

/// `kubectl`-backed cluster control
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    command: String,
    namespace: String,
}

impl Kubectl {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        command: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            command: command.into(),
            namespace: namespace.into(),
        }
    }

    fn cmd(&self, args: &str) -> String {
        format!("{} {} --namespace {}", self.command, args, self.namespace)
    }
}

#[async_trait]
impl ClusterControl for Kubectl {
    async fn apply(&self, manifest: &Path) -> Result<CommandResult, CommandError> {
        let command = self.cmd(&format!("apply -f {}", manifest.display()));
        self.runner.execute(&command, false).await
    }

    async fn rollout_status(
        &self,
        workload: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, CommandError> {
        let mut args = format!("rollout status {}", workload);
        if let Some(timeout) = timeout {
            args.push_str(&format!(" --watch --timeout {}s", timeout.as_secs()));
        }
        self.runner.execute(&self.cmd(&args), false).await
    }

    async fn rollout_undo(&self, workload: &str) -> Result<CommandResult, CommandError> {
        let command = self.cmd(&format!("rollout undo {}", workload));
        self.runner.execute(&command, false).await
    }

    async fn rollout_restart(&self, workload: &str) -> Result<CommandResult, CommandError> {
        let command = self.cmd(&format!("rollout restart {}", workload));
        self.runner.execute(&command, false).await
    }

    async fn query(&self, resource: &str) -> Option<Value> {
        let command = self.cmd(&format!("get {} -o json", resource));
        let result = match self.runner.query(&command).await {
            Ok(result) => result,
            Err(e) => {
                debug!("Query for {} failed: {}", resource, e);
                return None;
            }
        };

        if !result.success() {
            debug!("Query for {} exited with {}", resource, result.code);
            return None;
        }

        match serde_json::from_str(&result.output()) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Query for {} returned unparsable JSON: {}", resource, e);
                None
            }
        }
    }

    async fn delete(&self, resource: &str) -> Result<CommandResult, CommandError> {
        let command = self.cmd(&format!("delete {} --ignore-not-found", resource));
        self.runner.execute(&command, false).await
    }

    async fn pod_logs(&self, app: &str) -> Vec<(String, Vec<String>)> {
        let command = self.cmd(&format!(
            "get pods --selector=app={} -o jsonpath='{{.items[*].metadata.name}}'",
            app
        ));
        let pods = match self.runner.query(&command).await {
            Ok(result) if result.success() => result.output(),
            _ => return Vec::new(),
        };

        let mut logs = Vec::new();
        for pod in pods.split_whitespace() {
            let command = self.cmd(&format!("logs {} --tail {}", pod, POD_LOG_TAIL));
            if let Ok(result) = self.runner.query(&command).await {
                logs.push((pod.to_string(), result.lines));
            }
        }
        logs
    }
}
