// Terminal UI utilities

use colored::Colorize;
use std::time::Duration;

use crate::domain::DeploymentReport;

pub fn print_header(title: &str) {
    println!();
    println!(
        "{}",
        "╔════════════════════════════════════════════════════════════╗".bright_blue()
    );
    println!("{}", format!("║  {:<58}║", title).bright_blue());
    println!(
        "{}",
        "╚════════════════════════════════════════════════════════════╝".bright_blue()
    );
    println!();
}

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {}", message).bright_green().bold());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("❌ {}", message).bright_red().bold());
}

pub fn print_info(message: &str) {
    println!("{}", format!("ℹ️  {}", message).bright_cyan());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {}", message).bright_yellow());
}

/// Per-service summary after a run
pub fn print_report(report: &DeploymentReport, elapsed: Duration) {
    println!();
    println!("{}", "━━━ Rollout summary ━━━".bold());

    for service in &report.services {
        let took = service
            .duration()
            .map(|d| humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
            .unwrap_or_else(|| "-".to_string());
        let line = format!(
            "{} {:<24} {:<12} {}",
            service.phase().emoji(),
            service.name,
            took,
            service
                .phases()
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(" → ")
        );
        if service.is_success() {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }

    for name in &report.removed {
        println!("{}", format!("🗑️  {:<24} removed", name).yellow());
    }

    println!(
        "Total: {}",
        humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
    );
    println!();

    if !report.is_success() {
        print_error(&format!(
            "Rolled back: {}",
            report.failed_names().join(", ")
        ));
    }
}
