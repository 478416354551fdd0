//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Host shell commands
//! - The cluster control plane (through its CLI)

pub mod cluster;
pub mod command;

// Re-export commonly used types
pub use cluster::{ClusterControl, Kubectl};
pub use command::{CommandRunner, Shell};
