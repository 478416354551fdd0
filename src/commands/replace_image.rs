//! `berth replace-image` - point every service of an instruction at one image.
//!
//! The file is edited as raw JSON so fields berth doesn't model survive.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::ui;

pub async fn execute(instruction: &Path, image: &str) -> Result<()> {
    let content = tokio::fs::read_to_string(instruction)
        .await
        .with_context(|| format!("Failed to read {}", instruction.display()))?;
    let mut doc: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", instruction.display()))?;

    let replaced = replace_images(&mut doc, image)?;

    let output = serde_json::to_string_pretty(&doc)?;
    tokio::fs::write(instruction, output)
        .await
        .with_context(|| format!("Failed to write {}", instruction.display()))?;

    info!("🔁 {} service(s) now use {}", replaced, image);
    ui::print_success(&format!("Image replaced in {}", instruction.display()));
    Ok(())
}

/// Set `image` on every entry of `services`; returns how many were changed
pub fn replace_images(doc: &mut Value, image: &str) -> Result<usize> {
    let Some(services) = doc.get_mut("services").and_then(Value::as_array_mut) else {
        bail!("Instruction has no services list");
    };

    let mut replaced = 0;
    for service in services.iter_mut() {
        if let Some(service) = service.as_object_mut() {
            service.insert("image".to_string(), Value::String(image.to_string()));
            replaced += 1;
        }
    }
    Ok(replaced)
}
