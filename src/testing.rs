//! Test doubles for the command and cluster boundaries

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::CommandError;
use crate::infrastructure::command::{CommandResult, RunOptions};
use crate::infrastructure::{ClusterControl, CommandRunner};

/// Runner answering by substring match; unmatched commands exit 0 silently
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, i32, Vec<String>)>,
    log: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// First matching pattern wins
    pub fn respond(mut self, pattern: &str, code: i32, lines: &[&str]) -> Self {
        self.responses.push((
            pattern.to_string(),
            code,
            lines.iter().map(|l| l.to_string()).collect(),
        ));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandResult, CommandError> {
        self.log.lock().unwrap().push(command.to_string());

        let (code, lines) = self
            .responses
            .iter()
            .find(|(pattern, _, _)| command.contains(pattern.as_str()))
            .map(|(_, code, lines)| (*code, lines.clone()))
            .unwrap_or((0, Vec::new()));

        if code != 0 && options.fail_on_error {
            return Err(CommandError::Failed {
                command: command.to_string(),
                code,
                lines,
            });
        }
        Ok(CommandResult { code, lines })
    }
}

/// Calls observed by [`FakeCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    /// File name of the applied manifest
    Apply(String),
    Status { workload: String, watched: bool },
    Undo(String),
    Restart(String),
    Delete(String),
    Query(String),
    PodLogs(String),
}

#[derive(Default)]
struct ClusterState {
    services: Vec<(String, Option<u16>)>,
    proxy: Option<Value>,
    statuses: HashMap<String, VecDeque<i32>>,
    failing_apply: Vec<String>,
    failing_undo: bool,
    calls: Vec<ClusterCall>,
}

/// In-memory cluster that applies manifests to its own state
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, name: &str, port: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .services
            .push((name.to_string(), Some(port)));
        self
    }

    pub fn with_proxy_sites(self, sites: &str, acme_url: &str) -> Self {
        self.state.lock().unwrap().proxy = Some(proxy_doc(sites, acme_url));
        self
    }

    /// Exit codes returned by successive status calls; 0 once exhausted
    pub fn with_status(self, workload: &str, codes: &[i32]) -> Self {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(workload.to_string(), codes.iter().copied().collect());
        self
    }

    /// Applying a file whose name contains `fragment` exits 1
    pub fn failing_apply(self, fragment: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_apply
            .push(fragment.to_string());
        self
    }

    pub fn failing_undo(self) -> Self {
        self.state.lock().unwrap().failing_undo = true;
        self
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn applied(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClusterCall::Apply(file) => Some(file),
                _ => None,
            })
            .collect()
    }

    pub fn live_env(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let value = state
            .proxy
            .as_ref()?
            .pointer("/spec/template/spec/containers/0/env")?
            .as_array()?
            .iter()
            .find(|e| e["name"] == key)
            .and_then(|e| e["value"].as_str())
            .map(str::to_string);
        value
    }

    pub fn live_sites(&self) -> Option<String> {
        self.live_env("SITES")
    }

    fn record(&self, call: ClusterCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn proxy_doc(sites: &str, acme_url: &str) -> Value {
    json!({
        "kind": "DaemonSet",
        "metadata": { "name": "proxy-auto-ssl" },
        "spec": { "template": { "spec": { "containers": [{
            "name": "proxy-auto-ssl",
            "env": [
                { "name": "SITES", "value": sites },
                { "name": "LETSENCRYPT_URL", "value": acme_url },
            ]
        }]}}}
    })
}

fn ok() -> CommandResult {
    CommandResult {
        code: 0,
        lines: Vec::new(),
    }
}

#[async_trait]
impl ClusterControl for FakeCluster {
    async fn apply(&self, manifest: &Path) -> Result<CommandResult, CommandError> {
        let file = manifest
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(ClusterCall::Apply(file.clone()));

        let mut state = self.state.lock().unwrap();
        if state.failing_apply.iter().any(|f| file.contains(f.as_str())) {
            return Ok(CommandResult {
                code: 1,
                lines: vec!["error: apply rejected".to_string()],
            });
        }

        let doc: Value = std::fs::read_to_string(manifest)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null);

        let kind = doc["kind"].as_str().map(str::to_string);
        match kind.as_deref() {
            Some("DaemonSet") => state.proxy = Some(doc),
            Some("List") => {
                for item in doc["items"].as_array().into_iter().flatten() {
                    if item["kind"] != "Service" {
                        continue;
                    }
                    let name = item["metadata"]["name"].as_str().unwrap_or_default();
                    let port = item
                        .pointer("/spec/ports/0/nodePort")
                        .and_then(Value::as_u64)
                        .map(|p| p as u16);
                    state.services.retain(|(n, _)| n != name);
                    state.services.push((name.to_string(), port));
                }
            }
            _ => {}
        }
        Ok(ok())
    }

    async fn rollout_status(
        &self,
        workload: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, CommandError> {
        self.record(ClusterCall::Status {
            workload: workload.to_string(),
            watched: timeout.is_some(),
        });

        let code = self
            .state
            .lock()
            .unwrap()
            .statuses
            .get_mut(workload)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0);
        Ok(CommandResult {
            code,
            lines: vec![format!("status of {workload}")],
        })
    }

    async fn rollout_undo(&self, workload: &str) -> Result<CommandResult, CommandError> {
        self.record(ClusterCall::Undo(workload.to_string()));
        let code = if self.state.lock().unwrap().failing_undo {
            1
        } else {
            0
        };
        Ok(CommandResult {
            code,
            lines: Vec::new(),
        })
    }

    async fn rollout_restart(&self, workload: &str) -> Result<CommandResult, CommandError> {
        self.record(ClusterCall::Restart(workload.to_string()));
        Ok(ok())
    }

    async fn query(&self, resource: &str) -> Option<Value> {
        self.record(ClusterCall::Query(resource.to_string()));
        let state = self.state.lock().unwrap();
        if resource == "service" {
            let items: Vec<Value> = state
                .services
                .iter()
                .map(|(name, port)| match port {
                    Some(p) => json!({
                        "metadata": { "name": name },
                        "spec": { "ports": [{ "nodePort": p }] }
                    }),
                    None => json!({ "metadata": { "name": name }, "spec": {} }),
                })
                .collect();
            return Some(json!({ "items": items }));
        }
        if resource.starts_with("daemonset/") {
            return state.proxy.clone();
        }
        None
    }

    async fn delete(&self, resource: &str) -> Result<CommandResult, CommandError> {
        self.record(ClusterCall::Delete(resource.to_string()));
        if let Some(name) = resource.strip_prefix("service/") {
            self.state
                .lock()
                .unwrap()
                .services
                .retain(|(n, _)| n != name);
        }
        Ok(ok())
    }

    async fn pod_logs(&self, app: &str) -> Vec<(String, Vec<String>)> {
        self.record(ClusterCall::PodLogs(app.to_string()));
        vec![(format!("{app}-0"), vec!["crash loop".to_string()])]
    }
}
