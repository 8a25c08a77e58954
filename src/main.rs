//! # Pageshot — Web Page Capture Server
//!
//! Captures screenshots of web pages through a headless renderer sidecar,
//! streams capture progress over SSE, and fires recurring captures on cron
//! schedules.
//!
//! Usage:
//!   pageshot                       # Start server (default port 3030)
//!   pageshot --port 8080           # Custom port
//!   pageshot --config path.toml    # Custom config file

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pageshot_capture::delegate::HttpRenderEngine;
use pageshot_capture::executor::CaptureExecutor;
use pageshot_capture::progress::ProgressHub;
use pageshot_core::config::PageshotConfig;
use pageshot_gateway::AppState;
use pageshot_scheduler::{NotificationDispatcher, TaskScheduler, TaskStore};

#[derive(Parser)]
#[command(
    name = "pageshot",
    version,
    about = "📸 Pageshot — web page capture server with live progress and scheduling"
)]
struct Cli {
    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path (default: ~/.pageshot/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Renderer sidecar endpoint (overrides config)
    #[arg(long)]
    renderer: Option<String>,

    /// Disable the recurring-capture scheduler
    #[arg(long)]
    no_scheduler: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "pageshot=debug,tower_http=debug"
    } else {
        "pageshot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            PageshotConfig::load_from(std::path::Path::new(&path))?
        }
        None => PageshotConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(renderer) = &cli.renderer {
        config.renderer.endpoint = renderer.clone();
    }

    // Wire up the capture pipeline
    let engine = Arc::new(HttpRenderEngine::new(&config.renderer.endpoint));
    let executor = Arc::new(CaptureExecutor::new(engine, config.renderer.clone()));
    let hub = Arc::new(ProgressHub::new());

    // Scheduler with persisted task definitions
    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        executor.clone(),
        NotificationDispatcher::new(config.smtp.clone()),
        TaskStore::new(&TaskStore::default_path()),
    );
    if config.scheduler.enabled && !cli.no_scheduler {
        tokio::spawn(scheduler.clone().run_loop());
    } else {
        tracing::info!("📅 Scheduler disabled");
    }

    println!("📸 Pageshot v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   🌐 Gateway:  http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("   🖥️ Renderer: {}", config.renderer.endpoint);
    println!();

    let state = AppState::new(hub, executor, scheduler);
    pageshot_gateway::start(&config.gateway, state).await
}
