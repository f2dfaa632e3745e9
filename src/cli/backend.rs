use anyhow::Result;

use crate::server::encryption::providers::local::generate_key;
use crate::server::settings::Settings;

#[derive(Debug, Clone, clap::Subcommand)]
pub enum BackendCommands {
    /// Start the HTTP server
    Server,
    /// Check configuration for errors and unused options
    CheckConfig,
    /// Print a fresh base64 AES-256 key for [encryption] key
    GenerateKey,
}

pub async fn handle_backend_command(cmd: BackendCommands) -> Result<()> {
    match cmd {
        BackendCommands::Server => {
            let settings = Settings::new()?;
            crate::server::run_server(settings).await
        }
        BackendCommands::CheckConfig => {
            println!("Checking configuration...");
            match Settings::new() {
                Ok(_) => {
                    println!("✓ Configuration is valid");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        BackendCommands::GenerateKey => {
            println!("{}", generate_key());
            Ok(())
        }
    }
}
