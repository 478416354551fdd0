//! Centralized error types for berth
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

/// Top-level error type for berth operations
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Port allocation error: {0}")]
    Port(#[from] PortError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Rollout error: {0}")]
    Rollout(#[from] RolloutError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Proxy config migration error: {0}")]
    Migration(#[from] MigrationGuardError),
}

/// Instruction and settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Instruction file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid service domain: {domain}")]
    InvalidDomain { domain: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Duplicate service name in instruction: {name}")]
    DuplicateService { name: String },

    #[error("Service {name} is both deployed and removed")]
    RemovedAndDeployed { name: String },

    #[error("Domain {domain} is claimed by both {first} and {second}")]
    DomainConflict {
        domain: String,
        first: String,
        second: String,
    },

    #[error("No service to deploy and nothing to remove")]
    EmptyInstruction,

    #[error("Template not found: {path}")]
    TemplateMissing { path: String },

    #[error("Another deployment holds the lock at {path}. Remove it if that run is gone.")]
    Locked { path: String },
}

/// External command errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command `{command}` exited with code {code}")]
    Failed {
        command: String,
        code: i32,
        lines: Vec<String>,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
impl CommandError {
    /// Captured output of the failed command, if it ran at all
    pub fn lines(&self) -> &[String] {
        match self {
            Self::Failed { lines, .. } => lines,
            Self::Spawn { .. } => &[],
        }
    }
}

/// Port allocation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PortError {
    #[error("No free port left in {min}-{max} for service {service}")]
    Exhausted { service: String, min: u16, max: u16 },
}

/// Manifest rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template {template} has no slot at {pointer}")]
    TemplateShape {
        template: &'static str,
        pointer: String,
    },

    #[error("Failed to write manifest {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Rollout errors
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Deployment {name} is not ready for rollout")]
    NotReady { name: String },

    #[error("Rollout failed for: {}", names.join(", "))]
    ServicesFailed { names: Vec<String> },
}

/// Cluster certificate errors
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error(
        "The CA certificate must be renewed. Do this manually because it requires downtime: {command}"
    )]
    CaExpired { command: String },
}

/// Proxy configuration migration errors
#[derive(Error, Debug)]
pub enum MigrationGuardError {
    #[error("Failed to access proxy config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
