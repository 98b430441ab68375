//! Command-line entry point: start the server, or inspect/edit config.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "callcore")]
#[command(about = "Real-time voice AI contact-center core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook/media/admin server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "8443")]
        port: u16,
        /// Path to a TLS certificate (enables HTTPS together with --key)
        #[arg(long)]
        cert: Option<String>,
        /// Path to the TLS private key
        #[arg(long)]
        key: Option<String>,
    },
    /// Inspect or edit the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Set the Telnyx Call-Control API key
    SetApiKey { key: String },
    /// Set the public base URL the carrier uses for webhooks/media
    SetWebhookBaseUrl { url: String },
    /// Set the webhook HMAC signing key
    SetWebhookSigningKey { key: String },
    /// Set the maximum number of concurrent calls the process admits
    SetMaxConcurrentCalls { n: usize },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, cert, key } => {
            crate::server::start(&host, port, cert, key).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                crate::config::show_config()?;
            }
            ConfigCommands::SetApiKey { key } => {
                let mut config = Config::load()?;
                config.telnyx.api_key = key;
                config.save()?;
                println!("Telnyx API key saved.");
            }
            ConfigCommands::SetWebhookBaseUrl { url } => {
                let mut config = Config::load()?;
                config.telnyx.webhook_base_url = url;
                config.save()?;
                println!("Webhook base URL saved.");
            }
            ConfigCommands::SetWebhookSigningKey { key } => {
                let mut config = Config::load()?;
                config.telnyx.webhook_signing_key = key;
                config.save()?;
                println!("Webhook signing key saved.");
            }
            ConfigCommands::SetMaxConcurrentCalls { n } => {
                let mut config = Config::load()?;
                config.pipeline.max_concurrent_calls = n;
                config.save()?;
                println!("max_concurrent_calls set to {n}.");
            }
        },
    }

    Ok(())
}
