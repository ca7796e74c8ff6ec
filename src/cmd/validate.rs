//! Step validation for a check file - `synthmon validate`.

use std::path::Path;

use anyhow::{Result, bail};

use synthmon::check::Check;
use synthmon::steps::StepTree;

use super::run::default_plugins;

pub fn cmd_validate(file: &Path) -> Result<()> {
    let check = Check::load(file)?;
    let tree = StepTree::build(&check.steps);
    let plugins = default_plugins();

    println!("Check: {} ({})", check.name, check.environment);
    println!("Steps: {}", tree.len().saturating_sub(1));

    if let Err(errors) = tree.validate(&plugins) {
        println!();
        println!("Validation errors:");
        for error in errors.iter() {
            println!("  - {}", error);
        }
        bail!("{} has {} invalid step(s)", file.display(), errors.len());
    }

    let transports = tree.supported_transports();
    if transports.is_empty() {
        bail!("No transport supports every step of {}", check.name);
    }
    println!("Transports: {}", transports);
    println!();
    println!("Check is valid.");
    Ok(())
}
