//! pett-login - inspect and exercise the Pett login handshake.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Inspect the backend session and run the login handshake in-process.
#[derive(Parser)]
#[command(name = "pett-login")]
#[command(about = "Pett login handshake tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.pett/login.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the config file
    #[arg(long, env = "PETT_BACKEND_URL", global = true)]
    backend_url: Option<String>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PETT_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Also print logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the backend session health
    Health,

    /// Restore an existing backend session without a popup
    Restore,

    /// End the backend session and advance the reset sequence
    Logout,

    /// Run parent and popup end to end in one process
    Simulate {
        /// Email typed into the popup
        #[arg(long)]
        email: String,

        /// Verification code typed into the popup
        #[arg(long)]
        code: String,

        /// Credential the identity provider issues
        #[arg(long)]
        token: String,

        /// Pet to register if the backend asks for one
        #[arg(long)]
        pet_name: Option<String>,

        /// Use a built-in backend that accepts any credential
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(
        cli.config.as_deref(),
        cli.backend_url.as_deref(),
        cli.log_level.as_deref(),
    )?;

    observability::init_with_config(observability::LogConfig {
        service_name: "pett-login".into(),
        default_level: config.log_level.clone(),
        also_stderr: cli.verbose,
        ..Default::default()
    })?;
    debug!(backend_url = %config.backend_url, "Configuration loaded");

    let result = match cli.command {
        Commands::Health => commands::health(&config, &cli.format).await,
        Commands::Restore => commands::restore(&config, &cli.format).await,
        Commands::Logout => commands::logout(&config, &cli.format).await,
        Commands::Simulate {
            email,
            code,
            token,
            pet_name,
            offline,
        } => {
            let args = commands::SimulateArgs {
                email,
                code,
                token,
                pet_name,
                offline,
            };
            commands::simulate(&config, args, &cli.format).await
        }
    };

    if let Err(e) = &result {
        output::print_error(&format!("{:#}", e), &cli.format);
        std::process::exit(1);
    }
    Ok(())
}
