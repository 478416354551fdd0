//! Cluster certificate guard
//!
//! Expired server or front-proxy certificates are renewed in place before a
//! deploy touches the cluster. An expired CA stops the run: renewing it
//! restarts the control plane and is left to an operator.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::config::CertificateSettings;
use crate::error::{CertificateError, DeployError};
use crate::infrastructure::CommandRunner;

static DAYS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("days pattern is valid"));

/// Certificates checked after the CA, with the file passed to the renew command
const RENEWABLE: [(&str, &str); 2] = [
    (" server certificate ", "server.crt"),
    (" front proxy client ", "front-proxy-client.crt"),
];

const CA_MARKER: &str = " CA ";
const CA_FILE: &str = "ca.crt";

pub struct CertificateGuard {
    runner: Arc<dyn CommandRunner>,
    settings: CertificateSettings,
}

impl CertificateGuard {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: CertificateSettings) -> Self {
        Self { runner, settings }
    }

    /// Check expiry and renew what can be renewed. Returns the renewed files.
    pub async fn check_and_renew(&self) -> Result<Vec<&'static str>, DeployError> {
        if !self.settings.enabled {
            info!("Certificate check disabled");
            return Ok(Vec::new());
        }

        info!("🔐 Checking cluster certificates");
        let report = self
            .runner
            .execute(&self.settings.check_command, true)
            .await?;

        match find_days_left(&report.lines, CA_MARKER) {
            Some(days) if days <= 0 => {
                return Err(CertificateError::CaExpired {
                    command: self.renew_command(CA_FILE),
                }
                .into());
            }
            Some(days) => info!("CA certificate valid for {} more days", days),
            None => warn!("No CA certificate line in the check output, skipping"),
        }

        let mut renewed = Vec::new();
        for (marker, file) in RENEWABLE {
            match find_days_left(&report.lines, marker) {
                Some(days) if days <= 0 => {
                    warn!("Certificate {} expired, renewing", file);
                    self.runner.execute(&self.renew_command(file), true).await?;
                    renewed.push(file);
                }
                Some(days) => info!("{} valid for {} more days", file, days),
                None => warn!("No {} line in the check output, skipping", marker.trim()),
            }
        }

        Ok(renewed)
    }

    fn renew_command(&self, file: &str) -> String {
        format!("{} {}", self.settings.renew_command, file)
    }
}

/// Days left on the first line containing `marker`
pub fn find_days_left(lines: &[String], marker: &str) -> Option<i64> {
    lines
        .iter()
        .find(|line| line.contains(marker))
        .and_then(|line| days_left(line))
}

/// First integer on a line
pub fn days_left(line: &str) -> Option<i64> {
    DAYS_PATTERN.find(line)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    const HEALTHY: [&str; 3] = [
        "The CA certificate will expire in 3587 days.",
        "The server certificate will expire in 300 days.",
        "The front proxy client certificate will expire in 300 days.",
    ];

    fn guard(runner: Arc<ScriptedRunner>) -> CertificateGuard {
        CertificateGuard::new(runner, CertificateSettings::default())
    }

    #[test]
    fn test_days_left() {
        assert_eq!(days_left("The CA certificate will expire in 3587 days."), Some(3587));
        assert_eq!(days_left("expired -2 days ago"), Some(-2));
        assert_eq!(days_left("no digits here"), None);
    }

    #[tokio::test]
    async fn test_healthy_certificates_renew_nothing() {
        let runner = Arc::new(ScriptedRunner::new().respond("--check", 0, &HEALTHY));
        let renewed = guard(runner.clone()).check_and_renew().await.unwrap();

        assert!(renewed.is_empty());
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_server_certificate_is_renewed() {
        let runner = Arc::new(ScriptedRunner::new().respond(
            "--check",
            0,
            &[
                HEALTHY[0],
                "The server certificate will expire in 0 days.",
                HEALTHY[2],
            ],
        ));
        let renewed = guard(runner.clone()).check_and_renew().await.unwrap();

        assert_eq!(renewed, vec!["server.crt"]);
        assert_eq!(
            runner.commands()[1],
            "sudo microk8s refresh-certs --cert server.crt"
        );
    }

    #[tokio::test]
    async fn test_expired_ca_is_fatal() {
        let runner = Arc::new(ScriptedRunner::new().respond(
            "--check",
            0,
            &["The CA certificate will expire in 0 days.", HEALTHY[1], HEALTHY[2]],
        ));
        let err = guard(runner.clone()).check_and_renew().await.unwrap_err();

        match err {
            DeployError::Certificate(CertificateError::CaExpired { command }) => {
                assert!(command.ends_with("ca.crt"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_line_is_skipped() {
        let runner = Arc::new(ScriptedRunner::new().respond("--check", 0, &[HEALTHY[0]]));
        let renewed = guard(runner).check_and_renew().await.unwrap();
        assert!(renewed.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_runs_nothing() {
        let runner = Arc::new(ScriptedRunner::new());
        let settings = CertificateSettings {
            enabled: false,
            ..CertificateSettings::default()
        };
        CertificateGuard::new(runner.clone(), settings)
            .check_and_renew()
            .await
            .unwrap();
        assert!(runner.commands().is_empty());
    }
}
