//! `berth deploy` - roll out one instruction file.
//!
//! Takes the host lock, runs the certificate and proxy config guards, then
//! hands the instruction to the rollout controller. The instruction file is
//! deleted only after every service deployed.

use anyhow::{Context, Result};
use scopeguard::ScopeGuard;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::{Instruction, Settings};
use crate::domain::Templates;
use crate::error::ConfigError;
use crate::infrastructure::{ClusterControl, CommandRunner, Kubectl, Shell};
use crate::services::{CertificateGuard, ProxyConfigMigration, RolloutController};
use crate::{tools, ui};

pub async fn execute(
    settings: Settings,
    instruction_path: PathBuf,
    skip_cert_check: bool,
    skip_proxy_migration: bool,
) -> Result<()> {
    ui::print_header("berth deploy");

    tools::check_available(&settings.kubectl);
    let _lock = acquire_lock(&settings.lock_file)?;

    let runner: Arc<dyn CommandRunner> = Arc::new(Shell::new());
    let cluster: Arc<dyn ClusterControl> = Arc::new(Kubectl::new(
        runner.clone(),
        settings.kubectl.as_str(),
        settings.namespace.as_str(),
    ));

    // ─── Host guards ────────────────────────────────────────────────────────
    if skip_cert_check {
        info!("⏭️  Skipping certificate check");
    } else {
        CertificateGuard::new(runner.clone(), settings.certificates.clone())
            .check_and_renew()
            .await
            .context("Cluster certificate check failed")?;
    }

    if skip_proxy_migration {
        info!("⏭️  Skipping proxy config migration");
    } else {
        ProxyConfigMigration::new(
            runner.clone(),
            cluster.clone(),
            settings.docker.as_str(),
            settings.proxy.workload.as_str(),
            settings.proxy_migration.clone(),
        )
        .run()
        .await
        .context("Proxy config migration failed")?;
    }

    // ─── Rollout ────────────────────────────────────────────────────────────
    let mut instruction = Instruction::load(&instruction_path)
        .with_context(|| format!("Invalid instruction {}", instruction_path.display()))?;
    let templates = Templates::load(&settings.templates_dir).with_context(|| {
        format!(
            "Failed to load templates from {}",
            settings.templates_dir.display()
        )
    })?;

    info!("📦 Services: {}", instruction.services.len());
    info!("🗑️  Removals: {}", instruction.remove_services.len());

    std::fs::create_dir_all(&settings.work_root).with_context(|| {
        format!(
            "Failed to create work root {}",
            settings.work_root.display()
        )
    })?;
    let workdir = tempfile::Builder::new()
        .prefix("berth-")
        .tempdir_in(&settings.work_root)
        .context("Failed to create working directory")?;

    let started = Instant::now();
    let controller = RolloutController::new(
        cluster,
        runner,
        templates,
        settings.clone(),
        workdir.path(),
    );
    let report = controller.run(&mut instruction).await?;

    ui::print_report(&report, started.elapsed());
    report.into_result()?;

    if let Err(e) = tokio::fs::remove_file(&instruction_path).await {
        warn!(
            "Failed to remove instruction {}: {}",
            instruction_path.display(),
            e
        );
    }

    ui::print_success("Deployment complete");
    Ok(())
}

/// Take the cross-invocation lock. It is released when the guard drops.
fn acquire_lock(path: &Path) -> Result<ScopeGuard<PathBuf, impl FnOnce(PathBuf)>> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(ConfigError::Locked {
                path: path.display().to_string(),
            }
            .into());
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to create lock {}", path.display())));
        }
    };

    writeln!(
        file,
        "{} {}",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    )
    .with_context(|| format!("Failed to write lock {}", path.display()))?;

    Ok(scopeguard::guard(path.to_path_buf(), |path| {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to release lock {}: {}", path.display(), e);
        }
    }))
}
