//! CLI definitions for berth
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "berth",
    version,
    about = "Rolling deployments behind a shared TLS proxy",
    long_about = "Deploys the services of an instruction file one by one, keeps the shared\nproxy routing table in sync and rolls back any service that does not become healthy."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to ./berth.yaml when present)
    #[arg(long, global = true, env = "BERTH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Roll out every service of an instruction file
    Deploy {
        /// Instruction JSON, deleted after a successful run
        #[arg(default_value = "instruction.json")]
        instruction: PathBuf,

        /// Skip the cluster certificate expiry check
        #[arg(long)]
        skip_cert_check: bool,

        /// Skip the proxy config migration guard
        #[arg(long)]
        skip_proxy_migration: bool,
    },

    /// Set the image of every service in an instruction file
    ReplaceImage {
        /// New image reference
        image: String,

        /// Instruction JSON to edit in place
        #[arg(long, default_value = "instruction.json")]
        instruction: PathBuf,
    },

    /// Migrate outdated proxy configuration on this host
    MigrateProxy,
}
