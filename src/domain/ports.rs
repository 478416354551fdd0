//! NodePort-style port allocation
//!
//! Ports are stable per service name: an existing service keeps the port it
//! is already published on. New services get a uniform random draw from the
//! range, re-drawn on collision. Rejection sampling stays cheap only while
//! the range is far from full (tens of services in ~2.7k values); a saturated
//! range is reported instead of spinning.

use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::PortError;

pub const PORT_RANGE_MIN: u16 = 30000;
pub const PORT_RANGE_MAX: u16 = 32768;

/// A service known to the cluster and its externally bound port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundService {
    pub name: String,
    pub port: Option<u16>,
}

impl BoundService {
    pub fn new(name: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Extract `(name, nodePort)` pairs from a `get service -o json` list
pub fn parse_services(doc: &Value) -> Vec<BoundService> {
    let Some(items) = doc.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let name = item.pointer("/metadata/name")?.as_str()?.trim().to_string();
            let port = item
                .pointer("/spec/ports/0/nodePort")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok());
            Some(BoundService { name, port })
        })
        .collect()
}

/// Port for `name`: its current one if bound, otherwise a free draw
pub fn allocate_port<R: Rng + ?Sized>(
    name: &str,
    current: &[BoundService],
    rng: &mut R,
) -> Result<u16, PortError> {
    let name = name.trim();
    if let Some(port) = current
        .iter()
        .find(|s| s.name == name)
        .and_then(|s| s.port)
    {
        return Ok(port);
    }

    let taken: HashSet<u16> = current.iter().filter_map(|s| s.port).collect();
    let free = (PORT_RANGE_MIN..=PORT_RANGE_MAX)
        .filter(|p| !taken.contains(p))
        .count();
    if free == 0 {
        return Err(PortError::Exhausted {
            service: name.to_string(),
            min: PORT_RANGE_MIN,
            max: PORT_RANGE_MAX,
        });
    }

    loop {
        let candidate = rng.gen_range(PORT_RANGE_MIN..=PORT_RANGE_MAX);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }
}
