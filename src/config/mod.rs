//! # Configuration
//!
//! Two inputs drive a run:
//!
//! 1. **Settings** (`berth.yaml`, optional)
//!    - Host-level values: cluster CLI, template location, proxy workload,
//!      guard behavior. Every field has a default.
//!
//! 2. **Instruction** (JSON, one per invocation)
//!    - The services to deploy and the routes/services to remove.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let settings = config::load_settings(None)?;
//! let instruction = Instruction::load(Path::new("instruction.json"))?;
//! ```

mod instruction;
mod settings;

pub use instruction::{Instruction, ServiceSpec, VolumeSpec};
#[cfg(test)]
pub use instruction::HealthCheck;
pub use settings::{CertificateSettings, ProxyMigrationSettings, Settings, TextPatch};

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use crate::tools::{resolve_tool, tools};

/// Default settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "berth.yaml";

/// Load settings from an explicit path, `./berth.yaml`, or built-in defaults.
///
/// Tool overrides (`KUBECTL_BIN`, `DOCKER_BIN`) are applied last.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings(path)?,
        None if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
            read_settings(Path::new(DEFAULT_SETTINGS_FILE))?
        }
        None => {
            debug!("No {} found, using defaults", DEFAULT_SETTINGS_FILE);
            Settings::default()
        }
    };

    settings.kubectl = resolve_tool(tools::KUBECTL, &settings.kubectl);
    settings.docker = resolve_tool(tools::DOCKER, &settings.docker);
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse settings: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.yaml");
        std::fs::write(&path, "namespace: apps\ntemplates_dir: /srv/templates\n").unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.namespace, "apps");
        assert_eq!(settings.templates_dir, Path::new("/srv/templates"));
    }

    #[test]
    fn test_load_settings_missing_explicit_file() {
        assert!(load_settings(Some(Path::new("/nonexistent/berth.yaml"))).is_err());
    }
}
