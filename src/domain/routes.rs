//! Proxy routing table
//!
//! The proxy reads its site table from one packed string,
//! `domain=host:port;domain=host:port;`. It is parsed into [`RouteEntry`]
//! records as soon as it is read and only serialized again when a proxy
//! manifest is rendered.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

static ROUTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^=\s;]+)=([^:\s;]+):(\d{1,5})$").expect("route pattern is valid")
});

/// One public domain routed to a local port
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteEntry {
    pub domain: String,
    pub host: String,
    pub port: u16,
}

impl RouteEntry {
    pub fn new(domain: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            domain: domain.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{};", self.domain, self.host, self.port)
    }
}

/// Ordered routes with unique domains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Parse a packed routing string. Malformed segments are dropped and a
    /// repeated domain keeps its first target.
    pub fn parse(sites: &str) -> Self {
        let mut table = Self::default();

        for segment in sites.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some(caps) = ROUTE_PATTERN.captures(segment) else {
                warn!("Dropping malformed route segment: {}", segment);
                continue;
            };
            let Ok(port) = caps[3].parse::<u16>() else {
                warn!("Dropping route with invalid port: {}", segment);
                continue;
            };

            let entry = RouteEntry::new(&caps[1], &caps[2], port);
            if table.contains_domain(&entry.domain) {
                warn!("Duplicate route for {}, keeping the first", entry.domain);
                continue;
            }
            table.entries.push(entry);
        }

        table
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.entries.iter().any(|e| e.domain == domain)
    }

    /// Append a route, replacing any existing route for the same domain
    pub fn upsert(&mut self, entry: RouteEntry) {
        self.entries.retain(|e| e.domain != entry.domain);
        self.entries.push(entry);
    }

    #[cfg(test)]
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.domain.as_str())
    }

    /// Same routes regardless of order
    pub fn same_routes(&self, other: &RouteTable) -> bool {
        let ours: BTreeSet<&RouteEntry> = self.entries.iter().collect();
        let theirs: BTreeSet<&RouteEntry> = other.entries.iter().collect();
        ours == theirs
    }

    /// Packed form consumed by the proxy
    pub fn serialize(&self) -> String {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Anchored alternation of every routed domain, for the proxy's
    /// certificate allow-list
    pub fn allowed_domains_pattern(&self) -> String {
        let alternation = self
            .entries
            .iter()
            .map(|e| regex::escape(&e.domain))
            .collect::<Vec<_>>()
            .join("|");
        format!("^({})$", alternation)
    }
}

/// Routes that must disappear from the table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removals {
    /// Services being decommissioned
    pub services: Vec<String>,
    pub domains: HashSet<String>,
    /// Ports of decommissioned services; every route to them goes
    pub ports: HashSet<u16>,
}

impl Removals {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.domains.is_empty() && self.ports.is_empty()
    }

    /// Whether a live route must go: listed explicitly, targeting a removed
    /// service's port, or named after a removed service by its leftmost label
    pub fn drops(&self, entry: &RouteEntry) -> bool {
        if self.domains.contains(&entry.domain) || self.ports.contains(&entry.port) {
            return true;
        }
        let label = entry.domain.split('.').next().unwrap_or_default();
        self.services.iter().any(|s| s == label)
    }
}

/// What one service wants from the proxy
#[derive(Debug, Clone)]
pub struct DesiredRoutes<'a> {
    pub domains: &'a [String],
    /// `None` for a removal-only pass
    pub port: Option<u16>,
    pub host: &'a str,
    pub removals: &'a Removals,
}

/// Merge desired routes into the live table.
///
/// Drops every live route that is being replaced, belongs to a removed
/// service (see [`Removals::drops`]), or still points at the service's port under a domain it no
/// longer claims. Everything else is kept in its original order, then the
/// desired routes are appended.
pub fn merge(live: &RouteTable, desired: &DesiredRoutes<'_>) -> RouteTable {
    let claimed: HashSet<&str> = desired.domains.iter().map(String::as_str).collect();

    let mut merged = RouteTable {
        entries: live
            .entries
            .iter()
            .filter(|e| !claimed.contains(e.domain.as_str()))
            .filter(|e| !desired.removals.drops(e))
            .filter(|e| Some(e.port) != desired.port)
            .cloned()
            .collect(),
    };

    if let Some(port) = desired.port {
        for domain in desired.domains {
            merged.upsert(RouteEntry::new(domain.as_str(), desired.host, port));
        }
    }

    merged
}
