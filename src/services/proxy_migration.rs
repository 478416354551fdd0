//! Proxy config migration guard
//!
//! The proxy keeps its server configuration on a host path that survives
//! image upgrades. When that file still carries directives known to be
//! outdated, a pristine copy is pulled out of a throwaway container of the
//! proxy image, patched and written back, and the proxy is restarted.
//! A file without any outdated marker is left untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ProxyMigrationSettings, TextPatch};
use crate::error::{DeployError, MigrationGuardError};
use crate::infrastructure::{ClusterControl, CommandRunner};

/// What the guard did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Disabled,
    /// No persisted config on this host yet
    NoConfig,
    UpToDate,
    Migrated { patched: usize },
}

pub struct ProxyConfigMigration {
    runner: Arc<dyn CommandRunner>,
    cluster: Arc<dyn ClusterControl>,
    docker: String,
    proxy_workload: String,
    settings: ProxyMigrationSettings,
}

impl ProxyConfigMigration {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cluster: Arc<dyn ClusterControl>,
        docker: impl Into<String>,
        proxy_workload: impl Into<String>,
        settings: ProxyMigrationSettings,
    ) -> Self {
        Self {
            runner,
            cluster,
            docker: docker.into(),
            proxy_workload: proxy_workload.into(),
            settings,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.settings.host_config_dir.join(&self.settings.config_file)
    }

    pub async fn run(&self) -> Result<MigrationOutcome, DeployError> {
        if !self.settings.enabled {
            debug!("Proxy config migration disabled");
            return Ok(MigrationOutcome::Disabled);
        }

        let path = self.config_path();
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No proxy config at {}, nothing to migrate", path.display());
                return Ok(MigrationOutcome::NoConfig);
            }
            Err(source) => return Err(io_error(&path, source)),
        };

        if !needs_migration(&current, &self.settings.outdated_markers) {
            debug!("Proxy config at {} is up to date", path.display());
            return Ok(MigrationOutcome::UpToDate);
        }

        info!("🔄 Outdated proxy config found, migrating {}", path.display());
        self.extract_reference_config().await?;

        let pristine = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| io_error(&path, source))?;
        let (patched_content, patched) = apply_patches(&pristine, &self.settings.patches);
        tokio::fs::write(&path, &patched_content)
            .await
            .map_err(|source| io_error(&path, source))?;

        if needs_migration(&patched_content, &self.settings.outdated_markers) {
            warn!(
                "Proxy config at {} still contains outdated directives after patching",
                path.display()
            );
        }

        self.cluster
            .rollout_restart(&self.proxy_workload)
            .await?
            .require_success(format!("rollout restart {}", self.proxy_workload))?;

        info!("✅ Proxy config migrated ({} patches applied)", patched);
        Ok(MigrationOutcome::Migrated { patched })
    }

    /// Copy the image's config directory onto the host path. The reference
    /// container is removed even when the copy fails.
    async fn extract_reference_config(&self) -> Result<(), DeployError> {
        let container = format!("berth-proxy-reference-{}", Uuid::new_v4().simple());

        self.runner
            .execute(
                &format!("{} create --name {} {}", self.docker, container, self.settings.image),
                true,
            )
            .await?;

        let copied = self
            .runner
            .execute(
                &format!(
                    "{} cp {}:{}/. {}",
                    self.docker,
                    container,
                    self.settings.container_config_dir,
                    self.settings.host_config_dir.display()
                ),
                true,
            )
            .await;

        let removed = self
            .runner
            .execute(&format!("{} rm -f {}", self.docker, container), false)
            .await;
        if let Ok(result) = &removed {
            if !result.success() {
                warn!("Failed to remove reference container {}", container);
            }
        }

        copied?;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> DeployError {
    MigrationGuardError::Io {
        path: path.display().to_string(),
        source,
    }
    .into()
}

/// Whether any outdated marker is present
pub fn needs_migration(content: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| content.contains(m.as_str()))
}

/// Apply each patch once. A patch whose replacement is already present, or
/// whose target is missing, is skipped.
pub fn apply_patches(content: &str, patches: &[TextPatch]) -> (String, usize) {
    let mut out = content.to_string();
    let mut applied = 0;

    for patch in patches {
        if out.contains(patch.replace.as_str()) || !out.contains(patch.find.as_str()) {
            continue;
        }
        out = out.replacen(patch.find.as_str(), patch.replace.as_str(), 1);
        applied += 1;
    }

    (out, applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClusterCall, FakeCluster, ScriptedRunner};

    const OUTDATED: &str = "worker_processes 1;\nhttp {\n    keepalive_timeout  65;\n    ssl_protocols TLSv1 TLSv1.1 TLSv1.2;\n}\n";

    fn migration(
        dir: &Path,
        runner: Arc<ScriptedRunner>,
        cluster: Arc<FakeCluster>,
    ) -> ProxyConfigMigration {
        let settings = ProxyMigrationSettings {
            host_config_dir: dir.to_path_buf(),
            ..ProxyMigrationSettings::default()
        };
        ProxyConfigMigration::new(runner, cluster, "docker", "daemonset/proxy-auto-ssl", settings)
    }

    #[test]
    fn test_patches_are_idempotent() {
        let patches = ProxyMigrationSettings::default().patches;
        let (once, applied) = apply_patches(OUTDATED, &patches);
        assert_eq!(applied, 3);
        assert!(once.contains("client_max_body_size 100M;"));
        assert!(once.contains("TLSv1.3"));
        assert!(!needs_migration(
            &once,
            &ProxyMigrationSettings::default().outdated_markers
        ));

        let (twice, applied) = apply_patches(&once, &patches);
        assert_eq!(applied, 0);
        assert_eq!(twice, once);
    }

    #[tokio::test]
    async fn test_missing_config_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let cluster = Arc::new(FakeCluster::new());

        let outcome = migration(dir.path(), runner.clone(), cluster.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, MigrationOutcome::NoConfig);
        assert!(runner.commands().is_empty());
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_up_to_date_config_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let content = "http {\n    keepalive_timeout 300;\n}\n";
        std::fs::write(dir.path().join("nginx.conf"), content).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let cluster = Arc::new(FakeCluster::new());

        let outcome = migration(dir.path(), runner.clone(), cluster.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, MigrationOutcome::UpToDate);
        assert!(runner.commands().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("nginx.conf")).unwrap(),
            content
        );
    }

    #[tokio::test]
    async fn test_outdated_config_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        // The scripted `docker cp` does nothing, so the outdated file doubles
        // as the pristine copy.
        std::fs::write(dir.path().join("nginx.conf"), OUTDATED).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let cluster = Arc::new(FakeCluster::new());

        let outcome = migration(dir.path(), runner.clone(), cluster.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, MigrationOutcome::Migrated { patched: 3 });
        let commands = runner.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].starts_with("docker create --name berth-proxy-reference-"));
        assert!(commands[1].contains(":/usr/local/openresty/nginx/conf/."));
        assert!(commands[2].starts_with("docker rm -f berth-proxy-reference-"));
        assert_eq!(
            cluster.calls(),
            vec![ClusterCall::Restart("daemonset/proxy-auto-ssl".to_string())]
        );

        let written = std::fs::read_to_string(dir.path().join("nginx.conf")).unwrap();
        assert!(written.contains("proxy_read_timeout 300s;"));
    }

    #[tokio::test]
    async fn test_reference_container_removed_when_copy_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nginx.conf"), OUTDATED).unwrap();
        let runner = Arc::new(ScriptedRunner::new().respond("docker cp", 1, &["no such path"]));
        let cluster = Arc::new(FakeCluster::new());

        let result = migration(dir.path(), runner.clone(), cluster.clone())
            .run()
            .await;

        assert!(matches!(result, Err(DeployError::Command(_))));
        assert!(runner.commands()[2].starts_with("docker rm -f"));
        assert!(cluster.calls().is_empty());
    }
}
