//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Services use infrastructure adapters to perform I/O operations.

pub mod certificates;
pub mod port_registry;
pub mod proxy_migration;
pub mod proxy_reconciler;
pub mod rollout_controller;

// Re-export commonly used types
pub use certificates::CertificateGuard;
pub use port_registry::PortRegistry;
pub use proxy_migration::{MigrationOutcome, ProxyConfigMigration};
pub use proxy_reconciler::ProxyReconciler;
pub use rollout_controller::RolloutController;
