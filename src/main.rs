use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dispenser_gateway::api::ApiServer;
use dispenser_gateway::{Config, Gateway};

/// Dispenser Gateway - WebSocket gateway for ball-dispensing machines
#[derive(Parser)]
#[command(name = "dispenser-gateway", version, about)]
struct Cli {
    /// Port to listen on (overrides env and config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, env = "DISPENSER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of static files for the web UI
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Acknowledgment deadline for commands, in milliseconds
    #[arg(long)]
    command_timeout_ms: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity, RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,dispenser_gateway=info",
        1 => "info,dispenser_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(static_dir) = cli.static_dir {
        config.server.static_dir = Some(static_dir);
    }
    if let Some(timeout_ms) = cli.command_timeout_ms {
        anyhow::ensure!(timeout_ms > 0, "command timeout must be greater than zero");
        config.commands.timeout = Duration::from_millis(timeout_ms);
    }
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        addr = %config.server.addr(),
        timeout = ?config.commands.timeout,
        history_limit = config.commands.history_limit,
        "starting dispenser gateway"
    );

    let gateway = Gateway::new(config.commands.clone());
    let server = ApiServer::new(gateway, config.server);

    server.run(shutdown_signal()).await?;

    tracing::info!("dispenser gateway stopped");
    Ok(())
}

/// Resolve on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal handler, keep serving
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
