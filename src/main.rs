use clap::Parser;
use proxypool::api::start_api_server;
use proxypool::config::Config;
use proxypool::{ConnectionPoolService, ProxyPoolError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "proxypool")]
#[command(about = "Managed HTTP connection pool for proxy repositories", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Management API bind address (overrides config, enables the API)
    #[arg(long)]
    api_bind: Option<String>,

    /// Management API port (overrides config, enables the API)
    #[arg(long)]
    api_port: Option<u16>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle config generation
    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        println!(
            "Edit the file and run: proxypool --config {:?}",
            config_path
        );
        return Ok(());
    }

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(bind) = args.api_bind {
        config.api.bind_address = bind;
        config.api.enabled = true;
    }
    if let Some(port) = args.api_port {
        config.api.bind_port = port;
        config.api.enabled = true;
    }

    init_logging(&config.logging.level, &config.logging.format)?;

    info!("proxypool v{} starting", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Loaded configuration from: {:?}", path),
        None => info!("No configuration file specified, using defaults"),
    }

    let service = Arc::new(ConnectionPoolService::from_config(&config));
    service.init()?;

    let shutdown = CancellationToken::new();
    let mut api_task = config.api.enabled.then(|| {
        tokio::spawn(start_api_server(
            config.api.clone(),
            Arc::clone(&service),
            shutdown.clone(),
        ))
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        },
        Some(result) = async {
            match api_task.as_mut() {
                Some(task) => Some(task.await),
                None => None,
            }
        } => {
            api_task = None;
            report_api_result(result);
        }
    }

    shutdown.cancel();
    if let Some(task) = api_task {
        report_api_result(task.await);
    }

    service.destroy().await;
    info!("Shutdown complete");

    Ok(())
}

fn report_api_result(result: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
    }
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| ProxyPoolError::Config(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    Ok(())
}
