use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod config;
mod domain;
mod error;
mod infrastructure;
mod services;
mod tools;
mod ui;

#[cfg(test)]
mod testing;

use cli::{Cli, Commands};
use commands::{deploy, migrate_proxy, replace_image};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false) // Disable ANSI escape codes for cleaner output
        .init();

    let settings = config::load_settings(cli.config.as_deref())?;

    // Execute command
    match cli.command {
        Commands::Deploy {
            instruction,
            skip_cert_check,
            skip_proxy_migration,
        } => deploy::execute(settings, instruction, skip_cert_check, skip_proxy_migration).await,
        Commands::ReplaceImage { image, instruction } => {
            replace_image::execute(&instruction, &image).await
        }
        Commands::MigrateProxy => migrate_proxy::execute(settings).await,
    }
}
