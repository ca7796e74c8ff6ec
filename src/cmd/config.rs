//! Effective configuration view - `synthmon config`.

use std::path::Path;

use anyhow::Result;

use synthmon::config::WorkerConfig;

pub fn cmd_config(path: Option<&Path>) -> Result<()> {
    let config = WorkerConfig::load_or_default(path)?;

    println!("# Effective synthmon configuration (file, then environment overrides)");
    println!();
    print!("{}", config.to_toml()?);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    Ok(())
}
