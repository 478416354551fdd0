//! `berth migrate-proxy` - run the proxy config migration on its own.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Settings;
use crate::infrastructure::{ClusterControl, CommandRunner, Kubectl, Shell};
use crate::services::{MigrationOutcome, ProxyConfigMigration};
use crate::{tools, ui};

pub async fn execute(settings: Settings) -> Result<()> {
    ui::print_header("berth migrate-proxy");
    tools::check_available(&settings.docker);

    let runner: Arc<dyn CommandRunner> = Arc::new(Shell::new());
    let cluster: Arc<dyn ClusterControl> = Arc::new(Kubectl::new(
        runner.clone(),
        settings.kubectl.as_str(),
        settings.namespace.as_str(),
    ));

    let config_path = settings
        .proxy_migration
        .host_config_dir
        .join(&settings.proxy_migration.config_file);

    let outcome = ProxyConfigMigration::new(
        runner,
        cluster,
        settings.docker.as_str(),
        settings.proxy.workload.as_str(),
        settings.proxy_migration,
    )
    .run()
    .await
    .context("Proxy config migration failed")?;

    match outcome {
        MigrationOutcome::Disabled => ui::print_warning("Proxy config migration is disabled"),
        MigrationOutcome::NoConfig => ui::print_info(&format!(
            "No proxy config at {}, nothing to do",
            config_path.display()
        )),
        MigrationOutcome::UpToDate => ui::print_success("Proxy config is up to date"),
        MigrationOutcome::Migrated { patched } => ui::print_success(&format!(
            "Proxy config migrated with {} patches, proxy restarted",
            patched
        )),
    }

    Ok(())
}
