//! Configuration view and validation commands: `sprintboard config`.

use std::path::Path;

use anyhow::Result;
use sprintboard::config::BoardConfig;

use super::super::ConfigCommands;

/// Show a secret without printing it.
fn mask(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", secret.chars().take(4).collect::<String>())
    }
}

fn print_config(config: &BoardConfig) {
    println!("[server]");
    println!("  host = \"{}\"", config.server.host);
    println!("  port = {}", config.server.port);
    println!("  cors_origin = \"{}\"", config.server.cors_origin);
    println!();
    println!("[database]");
    println!("  path = \"{}\"", config.database.path.display());
    println!();
    println!("[auth]");
    println!("  jwt_secret = \"{}\"", mask(&config.auth.jwt_secret));
    println!("  token_ttl_hours = {}", config.auth.token_ttl_hours);
    println!();
}

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Sprintboard Configuration");
            println!("=========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No sprintboard.toml found at {}", config_path.display());
                println!("Run 'sprintboard config init' to create one.");
            }
            println!();
            println!("Effective values (with env overrides):");
            let config = BoardConfig::resolve(config_path)?;
            print_config(&config);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = BoardConfig::resolve(config_path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("sprintboard.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            BoardConfig::default().save(config_path)?;
            println!("Created sprintboard.toml at {}", config_path.display());
            println!();
            println!("Set auth.jwt_secret (or JWT_SECRET) before serving real users.");
            println!();
        }
    }

    Ok(())
}
