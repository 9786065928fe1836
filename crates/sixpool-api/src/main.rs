//! Pool server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sixpool_api::{
    create_router, metrics, AddrMaintainer, AppState, PoolService, RouteMonitor, ServerConfig,
};
use sixpool_net::{probe_prefix, HttpChecker, SudoCommandRunner};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("sixpool=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting sixpool-api");

    let config = ServerConfig::from_env();
    info!(
        "Config: host={}, port={}, db_root={}, usable_num={}",
        config.host,
        config.port,
        config.db_root.display(),
        config.usable_num
    );

    // Without a global IPv6 prefix there is nothing to pool; refuse to start.
    let prefix = match probe_prefix(&config.exclude_interfaces) {
        Ok(prefix) => prefix,
        Err(e) => {
            error!("Failed to probe IPv6 prefix: {e}");
            std::process::exit(1);
        }
    };
    info!(
        interface = %prefix.interface,
        prefix = %prefix.prefix,
        prefix_bits = prefix.prefix_bits,
        "Probed IPv6 prefix"
    );

    let checker = Arc::new(HttpChecker::new(
        config.check_url.clone(),
        config.check_timeout,
    ));
    let pool = Arc::new(PoolService::new(
        config.clone(),
        prefix,
        checker,
        Arc::new(SudoCommandRunner),
    ));

    // Converge route and ndppd once up front; failures here are the same
    // transient class the route monitor retries every tick.
    if let Err(e) = pool.ensure_route().await {
        warn!("Initial route reconciliation failed: {e}");
    }

    // Initialize metrics
    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    // Start background services
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintainer = AddrMaintainer::new(Arc::clone(&pool), shutdown_rx.clone());
    let route_monitor = RouteMonitor::new(Arc::clone(&pool), shutdown_rx);
    let maintainer_handle = tokio::spawn(maintainer.run());
    let monitor_handle = tokio::spawn(route_monitor.run());

    // Create router
    let state = AppState::new(Arc::clone(&pool));
    let app = create_router(state, metrics_handle);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid bind address");

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Stop background services; each performs its own final save.
    let _ = shutdown_tx.send(true);
    let _ = maintainer_handle.await;
    let _ = monitor_handle.await;

    if let Err(e) = pool.save_all().await {
        warn!("Shutdown save failed: {e}");
    }

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}
