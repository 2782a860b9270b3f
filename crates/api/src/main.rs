use anyhow::Context;
use api::{build_app, listen_address, tracing_filter};
use clap::{Parser, Subcommand};
use config::{emit_sample, persist, ResolvedConfig, Resolution, DEFAULT_CONFIG_FILE};
use search_providers::SearchGateway;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_SAMPLE_FILE: &str = "config.sample.json";

#[derive(Parser, Debug)]
#[command(name = "perplexity-mcp", version, about = "Perplexity search MCP server")]
struct Cli {
    /// Selected subcommand; `serve` when omitted.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the MCP server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeCommand {
    /// Configuration file (defaults to `config.json`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the resolved configuration with secrets redacted.
    Show {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Write an annotated sample configuration file.
    Sample {
        #[arg(long, value_name = "PATH", default_value = DEFAULT_SAMPLE_FILE)]
        output: PathBuf,
    },
    /// Re-resolve the configuration and write it back to disk.
    Save {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Destination (defaults to the configuration file).
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve(ServeCommand::default())) {
        Commands::Serve(command) => serve(command.config.as_deref()).await,
        Commands::Config { command } => run_config_command(command),
    }
}

async fn serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let Resolution { config, warnings } = ResolvedConfig::load(config_path);

    init_tracing(&config);

    for warning in &warnings {
        tracing::warn!(warning = %warning, "Configuration issue");
    }
    for line in config.summary().lines() {
        tracing::info!("{}", line);
    }

    let config = Arc::new(config);
    let gateway = Arc::new(SearchGateway::new(config.clone()));
    let app = build_app(&config, gateway);

    let bind_address = listen_address(&config);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    tracing::info!(address = %bind_address, path = %config.server.path, "Server started successfully");
    tracing::info!("Endpoints:");
    tracing::info!("  - POST/GET/DELETE {} (MCP streamable HTTP)", config.server.path);
    tracing::info!("  - GET /health (Health check)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn run_config_command(command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show { config } => {
            let resolution = ResolvedConfig::load(config.as_deref());
            print!("{}", render_resolution(&resolution));
        }
        ConfigCommand::Sample { output } => {
            emit_sample(&output)
                .with_context(|| format!("Failed to write sample to {}", output.display()))?;
            println!("Sample configuration written to {}", output.display());
        }
        ConfigCommand::Save { config, output } => {
            let resolution = ResolvedConfig::load(config.as_deref());
            let target = save_target(config, output);
            persist(&resolution.config, &target)
                .with_context(|| format!("Failed to save configuration to {}", target.display()))?;
            print!("{}", render_resolution(&resolution));
            println!("Configuration saved to {}", target.display());
        }
    }
    Ok(())
}

fn save_target(config: Option<PathBuf>, output: Option<PathBuf>) -> PathBuf {
    output
        .or(config)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn render_resolution(resolution: &Resolution) -> String {
    let mut rendered = String::new();
    for warning in &resolution.warnings {
        rendered.push_str(&format!("warning: {warning}\n"));
    }
    rendered.push_str(&resolution.config.summary());
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

fn init_tracing(config: &ResolvedConfig) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = tracing_filter(config, rust_log.as_deref());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let format = std::env::var("LOG_FORMAT").unwrap_or_default();

    // Initialize tracing based on LOG_FORMAT
    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .try_init(),
        "compact" => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Failed to initialize tracing: {e}");
    }
}
