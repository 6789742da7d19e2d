//! Report server
//!
//! Serves the report HTTP API over a JSON dataset fixture or the generated
//! demo dataset.
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration file
//! - `check-consistency` - Run the aggregate/drill-down consistency checks
//!   over the configured dataset; exits non-zero on any violation
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config` flag
//! 2. `REPORTS_CONFIG` environment variable (path to TOML file)
//! 3. `./reports.toml` in current directory
//! 4. Default configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use report_engine::{
    api::{build_router, AppState},
    auth::TokenIdentityProvider,
    config::ApplicationConfig,
    metrics,
    report::conformance::ConformanceChecker,
    store::seed::demo_dataset,
    InMemoryStore, ReportEngine,
};
use tokio::signal;
use tracing::{debug, info, warn};

// =============================================================================
// CLI Definition
// =============================================================================

/// Report aggregation and drill-down server
#[derive(Parser)]
#[command(name = "reports-server")]
#[command(version)]
#[command(about = "Report aggregation and drill-down server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides REPORTS_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,

    /// Override dataset fixture path
    #[arg(short, long, global = true)]
    fixture: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,

    /// Check that every aggregate cell agrees with its drill-down
    CheckConsistency {
        /// Print violations as JSON
        #[arg(long)]
        json: bool,

        /// Inclusive start of the date window (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        start_date: Option<String>,

        /// Inclusive end of the date window (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        end_date: Option<String>,
    },
}

// =============================================================================
// Setup
// =============================================================================

type Loaded = (ApplicationConfig, Option<PathBuf>);

fn load_config(cli: &Cli) -> Result<Loaded, Box<dyn std::error::Error>> {
    let (mut config, source) = match &cli.config {
        Some(path) => {
            let mut config = ApplicationConfig::from_file(path)?;
            config.apply_env_overrides();
            (config, Some(path.clone()))
        }
        None => ApplicationConfig::load()?,
    };
    match &source {
        Some(path) => eprintln!("[config] Loaded configuration from {}", path.display()),
        None => eprintln!("[config] No configuration file found, using defaults"),
    }

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    if let Some(fixture) = &cli.fixture {
        config.data.fixture_path = Some(fixture.clone());
    }
    config.validate()?;
    Ok((config, source))
}

fn load_store(config: &ApplicationConfig) -> Result<InMemoryStore, Box<dyn std::error::Error>> {
    match &config.data.fixture_path {
        Some(path) => {
            let store = InMemoryStore::from_json_file(path)?;
            info!(path = %path.display(), "Loaded dataset fixture");
            Ok(store)
        }
        None => {
            info!("Serving generated demo dataset");
            Ok(InMemoryStore::new(demo_dataset()))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler installation failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(config: &ApplicationConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.server.listen_addr);
    println!("  Log level: {}", config.server.log_level);
    println!();
    println!("Engine Settings:");
    println!(
        "  Max concurrent queries: {}",
        config.engine.max_concurrent_queries
    );
    println!("  Query timeout: {} ms", config.engine.query_timeout_ms);
    println!(
        "  Page size: {} (max {})",
        config.engine.default_page_size, config.engine.max_page_size
    );
    println!();
    println!("Data:");
    match &config.data.fixture_path {
        Some(path) => println!("  Fixture: {}", path.display()),
        None => println!("  Fixture: none (demo dataset)"),
    }
    println!();
    println!("Auth:");
    println!("  Anonymous access: {}", config.auth.allow_anonymous);
    println!("  Tokens: {}", config.auth.tokens.len());

    Ok(())
}

/// Run the consistency checker over the configured dataset
async fn cmd_check_consistency(
    config: &ApplicationConfig,
    json: bool,
    start_date: Option<String>,
    end_date: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = load_store(config)?;
    let projects = store.project_ids();
    let engine = ReportEngine::new(Arc::new(store), config.engine.engine_config());

    let report = ConformanceChecker::new(engine)
        .with_date_range(start_date, end_date)
        .check_all(&projects)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Consistency Check");
        println!("=================");
        println!();
        println!("Projects: {}", projects.len());
        println!("Checks: {}", report.checked);
        println!("Violations: {}", report.violations.len());
        for violation in &report.violations {
            println!("  {}", violation);
        }
    }

    if !report.is_consistent() {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (config, source) = load_config(&cli)?;

    // RUST_LOG has already been folded into log_level by the env overrides
    let filter = tracing_subscriber::EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&config),
        Some(Commands::CheckConsistency {
            json,
            start_date,
            end_date,
        }) => {
            return cmd_check_consistency(&config, *json, start_date.clone(), end_date.clone())
                .await
        }
        Some(Commands::Start) | None => {}
    }

    info!("Starting report server v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary(source.as_deref());

    metrics::init();

    let store = load_store(&config)?;
    let engine = ReportEngine::new(Arc::new(store), config.engine.engine_config());
    let identity = Arc::new(TokenIdentityProvider::from_config(&config.auth));
    if identity.is_empty() && !config.auth.allow_anonymous {
        warn!("No auth tokens configured and anonymous access disabled; every report request will be rejected");
    }
    debug!(tokens = identity.len(), "Identity provider ready");

    let state = Arc::new(AppState::new(engine, identity));
    let app = build_router(state, &config.server.cors_allowed_origins);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
