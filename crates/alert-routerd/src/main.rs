//! alert-routerd - alert routing daemon
//!
//! Receives alerts over HTTP, suppresses noise and delivers batched
//! notifications to chat webhooks and email.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use alert_router::{LogNotifier, Notifier, Router, compile_routes};
use alert_routerd::api::ApiState;
use alert_routerd::{DaemonConfig, DispatchNotifier, logging, server};
use alert_store::SqliteStateStore;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "alert-routerd")]
#[command(about = "Alert routing daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file
        #[arg(
            short,
            long,
            env = "ALERT_ROUTER_CONFIG",
            default_value = "/etc/alert-router/config.toml"
        )]
        config: PathBuf,

        /// Override the listen address
        #[arg(long, env = "ALERT_ROUTER_ADDR")]
        listen: Option<SocketAddr>,

        /// Override the log level
        #[arg(long, env = "ALERT_ROUTER_LOG")]
        log_level: Option<String>,

        /// Log payloads instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a config file and print the compiled routes
    Check {
        /// Path to config file
        #[arg(
            short,
            long,
            env = "ALERT_ROUTER_CONFIG",
            default_value = "/etc/alert-router/config.toml"
        )]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            listen,
            log_level,
            dry_run,
        } => run(config, listen, log_level, dry_run).await,
        Commands::Check { config } => check(config),
    }
}

async fn run(
    config_path: PathBuf,
    listen: Option<SocketAddr>,
    log_level: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut config = DaemonConfig::from_file(&config_path)?;
    if let Some(addr) = listen {
        config.server.listen_addr = addr;
    }
    logging::init(&config.logging, log_level.as_deref())?;

    info!(
        config = %config_path.display(),
        storage = %config.storage.path.display(),
        "starting alert-routerd"
    );

    let store = Arc::new(SqliteStateStore::open(&config.storage.path).await?);

    let notifier: Arc<dyn Notifier> = if dry_run {
        info!("dry run: payloads are logged, not sent");
        Arc::new(LogNotifier)
    } else {
        Arc::new(DispatchNotifier::from_config(&config.chat, &config.email)?)
    };

    let routes = compile_routes(&config.routes);
    if routes.is_empty() {
        tracing::warn!("no valid routes configured; every alert will be unrouted");
    }
    let router = Arc::new(Router::start(
        routes,
        store.clone(),
        notifier,
        &config.router_settings(),
    )?);

    let state = Arc::new(
        ApiState::new(router.clone()).with_auth_token(config.server.auth_token.clone()),
    );
    let listener = server::bind(config.server.listen_addr).await?;
    let served = server::serve(listener, state, server::shutdown_signal()).await;

    router.shutdown().await;
    store.close().await;
    served?;

    info!("alert-routerd stopped");
    Ok(())
}

fn check(config_path: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(&config_path)?;
    logging::init(&config.logging, Some("warn"))?;

    let routes = compile_routes(&config.routes);
    println!(
        "{}: {} of {} route(s) valid",
        config_path.display(),
        routes.len(),
        config.routes.len()
    );
    for route in &routes {
        let destinations: Vec<String> = route
            .destinations()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "  {:<20} matchers={} group={}s dedupe={}s rate={}/min -> [{}]",
            route.name(),
            route.matchers().len(),
            route.group_window().as_secs(),
            route.dedupe_window().as_secs(),
            route.rate_limit_per_min(),
            destinations.join(", ")
        );
    }

    if routes.len() != config.routes.len() {
        anyhow::bail!("{} route(s) rejected", config.routes.len() - routes.len());
    }
    Ok(())
}
