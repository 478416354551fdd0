//! Proxy route reconciler
//!
//! The proxy's routing table lives in its workload environment and is
//! shared by every service on the host. The live value is re-read right
//! before each merge so a table changed since the last service is never
//! overwritten with a stale copy.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::routes::merge;
use crate::domain::{DesiredRoutes, ProxyState, Removals, RouteTable};
use crate::infrastructure::ClusterControl;

const SITES_KEY: &str = "SITES";
const ACME_URL_KEY: &str = "LETSENCRYPT_URL";

/// What the proxy is currently serving
#[derive(Debug, Clone, Default)]
pub struct LiveProxy {
    pub routes: RouteTable,
    pub acme_url: Option<String>,
}

/// Merged table and whether the proxy must be re-applied
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub routing: RouteTable,
    pub deploy_required: bool,
    pub allowed_domains: String,
    pub acme_url: String,
}

impl ReconcileOutcome {
    /// Environment values for the proxy manifest
    pub fn proxy_state(&self) -> ProxyState {
        ProxyState {
            sites: self.routing.serialize(),
            allowed_domains: self.allowed_domains.clone(),
            acme_url: self.acme_url.clone(),
        }
    }
}

pub struct ProxyReconciler {
    cluster: Arc<dyn ClusterControl>,
    workload: String,
    host: String,
    acme_url: String,
}

impl ProxyReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterControl>,
        workload: impl Into<String>,
        host: impl Into<String>,
        acme_url: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            workload: workload.into(),
            host: host.into(),
            acme_url: acme_url.into(),
        }
    }

    /// Read the live proxy. Missing or unreadable reads as empty.
    pub async fn live(&self) -> LiveProxy {
        let Some(doc) = self.cluster.query(&self.workload).await else {
            debug!("Proxy {} not found, starting from an empty table", self.workload);
            return LiveProxy::default();
        };

        LiveProxy {
            routes: RouteTable::parse(proxy_env(&doc, SITES_KEY).unwrap_or_default()),
            acme_url: proxy_env(&doc, ACME_URL_KEY).map(str::to_string),
        }
    }

    /// Merge `domains -> port` into the live table, dropping `removals`.
    /// `port` is `None` for a removal-only pass.
    pub async fn reconcile(
        &self,
        domains: &[String],
        port: Option<u16>,
        removals: &Removals,
    ) -> ReconcileOutcome {
        let live = self.live().await;

        let routing = merge(
            &live.routes,
            &DesiredRoutes {
                domains,
                port,
                host: &self.host,
                removals,
            },
        );

        let routes_changed = !routing.same_routes(&live.routes);
        let acme_changed =
            !routing.is_empty() && live.acme_url.as_deref() != Some(self.acme_url.as_str());
        let deploy_required = routes_changed || acme_changed;

        if deploy_required {
            info!(
                "🌐 Proxy update required (routes changed: {}, ACME endpoint changed: {})",
                routes_changed, acme_changed
            );
        } else {
            debug!("Proxy routing table unchanged");
        }

        ReconcileOutcome {
            allowed_domains: routing.allowed_domains_pattern(),
            routing,
            deploy_required,
            acme_url: self.acme_url.clone(),
        }
    }
}

/// Value of `key` in the first container's env
fn proxy_env<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.pointer("/spec/template/spec/containers/0/env")?
        .as_array()?
        .iter()
        .find(|e| e.get("name").and_then(Value::as_str) == Some(key))?
        .get("value")?
        .as_str()
}
