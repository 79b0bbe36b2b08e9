//! mcp-gateway binary: CLI wiring around the gateway core.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mcp_gateway::gateway::Gateway;
use mcp_gateway::{server, Config, GatewayError};

#[derive(Parser)]
#[command(
    name = "mcp-gateway",
    version,
    about = "MCP gateway federating multiple backend MCP servers behind one endpoint"
)]
struct Cli {
    /// Path to the configuration file (default: ./config.yaml,
    /// ./config/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default)
    Serve,
    /// Load and validate the configuration, print a summary, and exit
    ConfigTest,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mcp-gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::ConfigTest => config_test(&config),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, GatewayError> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the filter is seeded from the
/// config's logging level. Logs go to stderr so stdout stays clean.
fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let default_level = if config.middleware.logging.enabled {
        config.middleware.logging.level.clone()
    } else {
        "error".to_string()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn serve(config: Config) -> ExitCode {
    init_tracing(&config);

    let gateway = match Gateway::new(&config) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            tracing::error!(error = %e, "failed to construct gateway");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.initialize().await {
        tracing::error!(error = %e, "failed to initialize gateway");
        return ExitCode::FAILURE;
    }

    if let Err(e) = server::run(&config, gateway).await {
        tracing::error!(error = %e, "server exited with error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn config_test(config: &Config) -> ExitCode {
    println!("Configuration OK");
    println!(
        "gateway: {}:{}{} (timeout {}s)",
        config.gateway.host, config.gateway.port, config.gateway.endpoint, config.gateway.timeout
    );

    for group in &config.groups {
        println!("group '{}' ({} backends):", group.name, group.backends.len());
        for backend in &group.backends {
            let target = match backend.transport.as_str() {
                "http" => backend.endpoint.clone().unwrap_or_default(),
                _ => backend.command.clone().unwrap_or_default(),
            };
            println!("  - {} [{}] {}", backend.name, backend.transport, target);
        }
    }

    ExitCode::SUCCESS
}
