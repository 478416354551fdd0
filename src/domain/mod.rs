//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod manifest;
pub mod ports;
pub mod rollout;
pub mod routes;

// Re-export commonly used types
pub use manifest::{ProxyState, Templates};
pub use ports::BoundService;
pub use rollout::{DeploymentReport, RolloutPhase, ServiceOutcome, ServiceRollout};
pub use routes::{DesiredRoutes, Removals, RouteTable};
