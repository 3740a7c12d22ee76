//! Tierfolio - income and ledger engine server
//!
//! Loads configuration, starts the payout scheduler and serves the dashboard API.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tierfolio::config::{AppConfig, DEFAULT_CONFIG_PATH};
use tierfolio::core::Platform;
use tierfolio::web;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// HTTP bind address; overrides the config file
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Seconds between scheduler ticks; overrides the config file
    #[arg(long)]
    tick_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(tick_secs) = args.tick_secs {
        config.tick_secs = tick_secs;
    }
    config.validate()?;

    init_tracing(&config.logging.level, &config.logging.directory)?;

    info!("Starting Tierfolio v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", args.config);
    config.log_summary();

    // Initialize Prometheus metrics recorder
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let metrics_handle = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder))
        .map_err(|err| anyhow::anyhow!("failed to set metrics recorder: {err}"))?;
    info!("Prometheus metrics recorder initialized");

    let platform = Platform::builder()
        .settings(config.platform.clone())
        .plans(config.plans.clone())
        .build()?;
    info!("Income engine initialized");

    let scheduler_handle = income_engine::spawn_scheduler(
        platform.engine().clone(),
        Duration::from_secs(config.tick_secs),
    );
    info!("Payout scheduler running every {}s", config.tick_secs);

    let state = web::AppState::new(platform, metrics_handle, config.admin_token.clone())
        .with_hook_token(config.hook_token.clone());
    let web_handle = web::spawn(config.bind_address, state, config.cors_origins.clone());
    info!("Dashboard API live at http://{}", config.bind_address);

    setup_shutdown_handler().await;

    info!("Shutting down Tierfolio...");
    scheduler_handle.abort();
    web_handle.abort();
    info!("Tierfolio shut down gracefully");

    Ok(())
}

fn init_tracing(log_level: &str, log_dir: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let file_appender = tracing_appender::rolling::daily(log_dir, "tierfolio.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level_filter = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    // The writer flushes on drop; keep it for the life of the process.
    Box::leak(Box::new(guard));

    Ok(())
}

/// Setup graceful shutdown handler
async fn setup_shutdown_handler() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!("Failed to listen for shutdown signal: {:?}", err);
        }
    }
}
