//! Configuration view and validation commands (`linewatch config`).

use anyhow::{Result, bail};

use linewatch::config::{CONFIG_DIR, CONFIG_FILE, LinewatchConfig};

use super::super::ConfigCommands;

pub fn cmd_config(config: &LinewatchConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!("# linewatch configuration");
            match &config.source {
                Some(path) => println!("# source: {}", path.display()),
                None => println!(
                    "# source: defaults (no {}/{} found)",
                    CONFIG_DIR, CONFIG_FILE
                ),
            }
            println!("# effective values include environment and CLI overrides");
            println!();
            print!("{}", config.toml.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                for problem in &problems {
                    eprintln!("  - {problem}");
                }
                bail!("Configuration has {} problem(s)", problems.len());
            }
        }
    }
    Ok(())
}
