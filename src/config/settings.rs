//! Host settings: tool commands, paths, proxy and guard configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host-level settings, read from `berth.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Namespace every workload lives in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Cluster CLI prefix (`KUBECTL_BIN` overrides)
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Container CLI prefix (`DOCKER_BIN` overrides)
    #[serde(default = "default_docker")]
    pub docker: String,

    /// Directory holding storage.json, service.json and proxy.json
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Parent of the per-run manifest directory
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Host lock serializing deploy runs
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub docker_credentials: DockerCredentialSettings,

    #[serde(default)]
    pub certificates: CertificateSettings,

    #[serde(default)]
    pub proxy_migration: ProxyMigrationSettings,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_kubectl() -> String {
    "microk8s kubectl".to_string()
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/tmp/berth.lock")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kubectl: default_kubectl(),
            docker: default_docker(),
            templates_dir: default_templates_dir(),
            work_root: default_work_root(),
            lock_file: default_lock_file(),
            proxy: ProxySettings::default(),
            docker_credentials: DockerCredentialSettings::default(),
            certificates: CertificateSettings::default(),
            proxy_migration: ProxyMigrationSettings::default(),
        }
    }
}

/// Shared TLS proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Live proxy workload as `kind/name`
    #[serde(default = "default_proxy_workload")]
    pub workload: String,

    /// Host every route points at
    #[serde(default = "default_route_host")]
    pub route_host: String,

    #[serde(default = "default_acme_production_url")]
    pub acme_production_url: String,

    #[serde(default = "default_acme_staging_url")]
    pub acme_staging_url: String,
}

fn default_proxy_workload() -> String {
    "daemonset/proxy-auto-ssl".to_string()
}

fn default_route_host() -> String {
    "localhost".to_string()
}

fn default_acme_production_url() -> String {
    "https://acme-v02.api.letsencrypt.org/directory".to_string()
}

fn default_acme_staging_url() -> String {
    "https://acme-staging-v02.api.letsencrypt.org/directory".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            workload: default_proxy_workload(),
            route_host: default_route_host(),
            acme_production_url: default_acme_production_url(),
            acme_staging_url: default_acme_staging_url(),
        }
    }
}

impl ProxySettings {
    pub fn acme_url(&self, production: bool) -> &str {
        if production {
            &self.acme_production_url
        } else {
            &self.acme_staging_url
        }
    }
}

/// Where registry credentials from `dockerLoginCommand` are handed to the kubelet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerCredentialSettings {
    #[serde(default = "default_credentials_source")]
    pub source: PathBuf,

    #[serde(default = "default_kubelet_dir")]
    pub kubelet_dir: PathBuf,
}

fn default_credentials_source() -> PathBuf {
    PathBuf::from("/root/.docker/config.json")
}

fn default_kubelet_dir() -> PathBuf {
    PathBuf::from("/var/snap/microk8s/common/var/lib/kubelet/")
}

impl Default for DockerCredentialSettings {
    fn default() -> Self {
        Self {
            source: default_credentials_source(),
            kubelet_dir: default_kubelet_dir(),
        }
    }
}

/// Cluster certificate expiry check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cert_check_command")]
    pub check_command: String,

    /// Prefix; the certificate file name is appended
    #[serde(default = "default_cert_renew_command")]
    pub renew_command: String,
}

fn default_true() -> bool {
    true
}

fn default_cert_check_command() -> String {
    "sudo microk8s refresh-certs --check".to_string()
}

fn default_cert_renew_command() -> String {
    "sudo microk8s refresh-certs --cert".to_string()
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_command: default_cert_check_command(),
            renew_command: default_cert_renew_command(),
        }
    }
}

/// One-shot rewrite of outdated proxy config on the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyMigrationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Proxy base image holding pristine config
    #[serde(default = "default_proxy_image")]
    pub image: String,

    #[serde(default = "default_container_config_dir")]
    pub container_config_dir: String,

    /// Persistent config directory mounted into the live proxy
    #[serde(default = "default_host_config_dir")]
    pub host_config_dir: PathBuf,

    /// File inside the config directory that markers and patches apply to
    #[serde(default = "default_config_file")]
    pub config_file: String,

    #[serde(default = "default_outdated_markers")]
    pub outdated_markers: Vec<String>,

    #[serde(default = "default_patches")]
    pub patches: Vec<TextPatch>,
}

/// Literal find/replace applied to the proxy config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPatch {
    pub find: String,
    pub replace: String,
}

fn default_proxy_image() -> String {
    "valian/docker-nginx-auto-ssl".to_string()
}

fn default_container_config_dir() -> String {
    "/usr/local/openresty/nginx/conf".to_string()
}

fn default_host_config_dir() -> PathBuf {
    PathBuf::from("/mnt/proxy-config")
}

fn default_config_file() -> String {
    "nginx.conf".to_string()
}

fn default_outdated_markers() -> Vec<String> {
    vec![
        "keepalive_timeout  65;".to_string(),
        "ssl_protocols TLSv1 TLSv1.1 TLSv1.2;".to_string(),
    ]
}

fn default_patches() -> Vec<TextPatch> {
    vec![
        TextPatch {
            find: "keepalive_timeout  65;".to_string(),
            replace: "keepalive_timeout 300;\n    proxy_connect_timeout 300s;\n    proxy_send_timeout 300s;\n    proxy_read_timeout 300s;\n    send_timeout 300s;".to_string(),
        },
        TextPatch {
            find: "http {\n".to_string(),
            replace: "http {\n    client_max_body_size 100M;\n".to_string(),
        },
        TextPatch {
            find: "ssl_protocols TLSv1 TLSv1.1 TLSv1.2;".to_string(),
            replace: "ssl_protocols TLSv1 TLSv1.1 TLSv1.2 TLSv1.3;\n    ssl_ciphers 'ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:AES128-GCM-SHA256:AES256-GCM-SHA384:HIGH:!aNULL:!MD5';".to_string(),
        },
    ]
}

impl Default for ProxyMigrationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            image: default_proxy_image(),
            container_config_dir: default_container_config_dir(),
            host_config_dir: default_host_config_dir(),
            config_file: default_config_file(),
            outdated_markers: default_outdated_markers(),
            patches: default_patches(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let settings: Settings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.kubectl, "microk8s kubectl");
        assert_eq!(settings.proxy.workload, "daemonset/proxy-auto-ssl");
        assert!(settings.certificates.enabled);
        assert_eq!(settings.proxy_migration.patches.len(), 3);
    }

    #[test]
    fn test_partial_override() {
        let settings: Settings = serde_yaml::from_str(
            "kubectl: kubectl\nproxy:\n  route_host: 127.0.0.1\ncertificates:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(settings.kubectl, "kubectl");
        assert_eq!(settings.proxy.route_host, "127.0.0.1");
        assert_eq!(settings.proxy.workload, "daemonset/proxy-auto-ssl");
        assert!(!settings.certificates.enabled);
    }

    #[test]
    fn test_acme_url_selection() {
        let proxy = ProxySettings::default();
        assert!(proxy.acme_url(true).contains("acme-v02"));
        assert!(proxy.acme_url(false).contains("staging"));
    }
}
