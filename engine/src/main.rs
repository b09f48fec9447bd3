// ChatFlow chat backend
// Main entry point for the chatflow binary

use clap::Parser;
use chatflow_engine::cli::{Cli, Command};
use chatflow_engine::config::Config;
use chatflow_engine::handlers::{
    handle_ask, handle_doctor, handle_generate, handle_serve, handle_show_config, OutputFormat,
};
use chatflow_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("ChatFlow v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Serve { port } => {
            tracing::info!("Starting API server...");
            handle_serve(&config, port).await
        }

        Command::Ask { message } => {
            tracing::debug!("Asking: {}", message);
            handle_ask(message, &config, format).await
        }

        Command::Generate {
            prompt,
            max_length,
            temperature,
        } => {
            tracing::debug!("Generating from prompt: {}", prompt);
            handle_generate(prompt, max_length, temperature, &config, format).await
        }

        Command::Config => handle_show_config(&config, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
