//! Deployment instruction: the unit of work for one invocation.
//!
//! The instruction is camelCase JSON written by whoever triggers the
//! deploy. It is read once, normalized, validated and then owned by the
//! rollout controller for the rest of the run.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::ConfigError;

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9][a-z0-9-]{0,61}[a-z0-9]$")
        .expect("domain pattern is valid")
});

/// Service names end up in resource names, shell commands and file names
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("name pattern is valid")
});

/// Instruction for a single deploy run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// Services to roll out, in order
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Bounded wait for each rollout; 0 disables the watch entirely
    #[serde(default = "default_timeout", alias = "deploymentTimeout")]
    pub deployment_timeout_seconds: u64,

    /// Services to decommission (workload deleted, routes dropped)
    #[serde(default)]
    pub remove_services: Vec<RemovedService>,

    /// Bare domains to drop from the proxy table
    #[serde(default)]
    pub remove_domains: Vec<String>,

    /// Unset or true selects the production ACME endpoint
    #[serde(default)]
    pub ssl_production_mode: Option<bool>,

    /// Optional shared key/value cache deployed alongside the services
    #[serde(default)]
    pub cache: Option<CacheSpec>,
}

fn default_timeout() -> u64 {
    120
}

/// One service to deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Workload/service identifier, also the prefix of derived resource names
    pub name: String,

    /// Container image reference
    pub image: String,

    /// Container-internal port
    pub app_port: u16,

    /// Externally reachable port, allocated by the port registry
    #[serde(default, skip_deserializing)]
    pub service_port: Option<u16>,

    /// Replica count
    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Public hostnames routed through the proxy
    #[serde(default)]
    pub domains: Vec<String>,

    /// Legacy single-domain form, folded into `domains`
    #[serde(default, skip_serializing)]
    pub domain: Option<String>,

    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub health_check: HealthCheck,

    /// Skip the readiness pre-check
    #[serde(default)]
    pub force_deployment: bool,

    #[serde(default)]
    pub pre_command: Option<String>,

    #[serde(default)]
    pub post_command: Option<String>,

    #[serde(default)]
    pub docker_login_command: Option<String>,

    /// Set when this service's routes changed the live proxy table
    #[serde(default, skip_deserializing)]
    pub deploy_proxy: bool,
}

fn default_instances() -> u32 {
    1
}

/// Persistent volume attached to a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub name: String,
    pub container_path: String,
    /// Size in GiB
    #[serde(alias = "sizeGi")]
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// A service being decommissioned
///
/// Accepts either a bare name or `{ "name": ..., "domains": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RemovedServiceRepr")]
pub struct RemovedService {
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RemovedServiceRepr {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        domains: Vec<String>,
    },
}

impl From<RemovedServiceRepr> for RemovedService {
    fn from(repr: RemovedServiceRepr) -> Self {
        match repr {
            RemovedServiceRepr::Name(name) => Self {
                name,
                domains: Vec::new(),
            },
            RemovedServiceRepr::Detailed { name, domains } => Self { name, domains },
        }
    }
}

/// Shared key/value cache, deployed as an unproxied service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    #[serde(default = "default_cache_name")]
    pub name: String,
    #[serde(default = "default_cache_image")]
    pub image: String,
    #[serde(default = "default_cache_port")]
    pub port: u16,
    #[serde(default = "default_cache_size")]
    pub size_gi: u32,
    #[serde(default = "default_instances")]
    pub instances: u32,
}

fn default_cache_name() -> String {
    "cache".to_string()
}

fn default_cache_image() -> String {
    "redis:7-alpine".to_string()
}

fn default_cache_port() -> u16 {
    6379
}

fn default_cache_size() -> u32 {
    1
}

impl CacheSpec {
    /// Expand into a plain service with one data volume and no routes
    pub fn to_service(&self) -> ServiceSpec {
        ServiceSpec {
            name: self.name.clone(),
            image: self.image.clone(),
            app_port: self.port,
            service_port: None,
            instances: self.instances,
            domains: Vec::new(),
            domain: None,
            volumes: vec![VolumeSpec {
                name: "data".to_string(),
                container_path: "/data".to_string(),
                size: self.size_gi,
            }],
            env: BTreeMap::new(),
            health_check: HealthCheck {
                path: None,
                disabled: true,
            },
            force_deployment: false,
            pre_command: None,
            post_command: None,
            docker_login_command: None,
            deploy_proxy: false,
        }
    }
}

impl Instruction {
    /// Read, normalize and validate an instruction file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut instruction: Instruction =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        instruction.normalize();
        instruction.validate()?;
        Ok(instruction)
    }

    /// Fold legacy fields, dedupe domains, expand the cache service
    pub fn normalize(&mut self) {
        for service in &mut self.services {
            if let Some(domain) = service.domain.take() {
                service.domains.insert(0, domain);
            }

            let mut seen = HashSet::new();
            service
                .domains
                .retain(|domain| seen.insert(domain.trim().to_string()));
            for domain in &mut service.domains {
                *domain = domain.trim().to_string();
            }
        }

        if let Some(cache) = self.cache.take() {
            if !self.services.iter().any(|s| s.name == cache.name) {
                self.services.insert(0, cache.to_service());
            }
        }
    }

    /// Reject instructions the controller cannot act on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty()
            && self.remove_services.is_empty()
            && self.remove_domains.is_empty()
        {
            return Err(ConfigError::EmptyInstruction);
        }

        let mut names = HashSet::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for service in &self.services {
            if !is_name_valid(&service.name) {
                return Err(ConfigError::InvalidValue {
                    field: "services[].name".to_string(),
                    value: service.name.clone(),
                });
            }
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::DuplicateService {
                    name: service.name.clone(),
                });
            }
            if service.app_port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.appPort", service.name),
                    value: "0".to_string(),
                });
            }
            for domain in &service.domains {
                if !is_domain_valid(domain) {
                    return Err(ConfigError::InvalidDomain {
                        domain: domain.clone(),
                    });
                }
                if let Some(first) = owners.insert(domain.as_str(), service.name.as_str()) {
                    return Err(ConfigError::DomainConflict {
                        domain: domain.clone(),
                        first: first.to_string(),
                        second: service.name.clone(),
                    });
                }
            }
        }

        for removed in &self.remove_services {
            if !is_name_valid(&removed.name) {
                return Err(ConfigError::InvalidValue {
                    field: "removeServices[].name".to_string(),
                    value: removed.name.clone(),
                });
            }
            if names.contains(removed.name.as_str()) {
                return Err(ConfigError::RemovedAndDeployed {
                    name: removed.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Observation timeout; `None` means check current state without waiting
    pub fn timeout(&self) -> Option<Duration> {
        match self.deployment_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn production_tls(&self) -> bool {
        self.ssl_production_mode.unwrap_or(true)
    }
}

impl ServiceSpec {
    /// Name of the persistent volume backing one of this service's volumes
    pub fn volume_name(&self, volume: &VolumeSpec) -> String {
        format!("{}-{}", self.name, volume.name)
    }
}

/// DNS-1123 label check for service names
pub fn is_name_valid(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Lowercase DNS hostname check
pub fn is_domain_valid(domain: &str) -> bool {
    DOMAIN_PATTERN.is_match(domain)
}
