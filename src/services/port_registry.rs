//! Port registry - binds every service in an instruction to a stable port

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ServiceSpec;
use crate::domain::ports::{allocate_port, parse_services};
use crate::domain::BoundService;
use crate::error::PortError;
use crate::infrastructure::ClusterControl;

pub struct PortRegistry {
    cluster: Arc<dyn ClusterControl>,
}

impl PortRegistry {
    pub fn new(cluster: Arc<dyn ClusterControl>) -> Self {
        Self { cluster }
    }

    /// Services currently in the cluster. An unreadable listing is empty.
    pub async fn current_services(&self) -> Vec<BoundService> {
        match self.cluster.query("service").await {
            Some(doc) => parse_services(&doc),
            None => {
                debug!("Service listing unavailable, treating cluster as empty");
                Vec::new()
            }
        }
    }

    /// Set `service_port` on every service. Ports drawn earlier in the same
    /// call are treated as taken.
    pub fn assign_ports<R: Rng + ?Sized>(
        services: &mut [ServiceSpec],
        current: &[BoundService],
        rng: &mut R,
    ) -> Result<(), PortError> {
        let mut taken = current.to_vec();

        for service in services.iter_mut() {
            let port = allocate_port(&service.name, &taken, rng)?;
            info!("🔌 {} bound to port {}", service.name, port);
            service.service_port = Some(port);

            if !taken.iter().any(|s| s.name == service.name && s.port.is_some()) {
                taken.push(BoundService::new(service.name.as_str(), Some(port)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Instruction;
    use crate::testing::FakeCluster;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn services(names: &[&str]) -> Vec<ServiceSpec> {
        let services: Vec<_> = names
            .iter()
            .map(|n| serde_json::json!({ "name": n, "image": "i", "appPort": 80 }))
            .collect();
        let instruction: Instruction =
            serde_json::from_value(serde_json::json!({ "services": services })).unwrap();
        instruction.services
    }

    #[tokio::test]
    async fn test_current_services_from_cluster() {
        let cluster = Arc::new(FakeCluster::new().with_service("api", 31000));
        let registry = PortRegistry::new(cluster);

        let current = registry.current_services().await;
        assert_eq!(current, vec![BoundService::new("api", Some(31000))]);
    }

    #[test]
    fn test_assign_keeps_existing_and_avoids_siblings() {
        let mut specs = services(&["api", "a", "b", "c"]);
        let current = vec![BoundService::new("api", Some(31000))];
        let mut rng = StdRng::seed_from_u64(11);

        PortRegistry::assign_ports(&mut specs, &current, &mut rng).unwrap();

        assert_eq!(specs[0].service_port, Some(31000));
        let mut ports: Vec<u16> = specs.iter().filter_map(|s| s.service_port).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 4);
    }
}
