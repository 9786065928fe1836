//! One-shot route and ndppd reconciler.
//!
//! Probes the host's global IPv6 prefix, installs the local route, and
//! rewrites/restarts ndppd when its config is stale. Intended for cron or
//! manual recovery when ndppd wedges:
//!
//! ```text
//! route-updater                  # reconcile, restart only if stale
//! route-updater --restart-ndppd  # force a daemon restart
//! ```
//!
//! `SUDOPASS` is consulted for privileged shell-outs when not running as
//! root.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sixpool_net::{
    probe_prefix, NetResult, RouteEffector, DEFAULT_EXCLUDED_INTERFACES, DEFAULT_NDPPD_CONF,
};

#[derive(Parser, Debug)]
#[command(name = "route-updater", about = "Reconcile the IPv6 local route and ndppd config")]
struct Args {
    /// ndppd config file path
    #[arg(short = 'n', long, default_value = DEFAULT_NDPPD_CONF)]
    ndppd_conf: PathBuf,

    /// Restart ndppd even when the config is already current
    #[arg(short = 'r', long)]
    restart_ndppd: bool,
}

async fn reconcile(args: &Args) -> NetResult<()> {
    let exclude: Vec<String> = DEFAULT_EXCLUDED_INTERFACES
        .iter()
        .map(|s| s.to_string())
        .collect();
    let info = probe_prefix(&exclude)?;
    info!(
        interface = %info.interface,
        prefix = %info.prefix,
        prefix_bits = info.prefix_bits,
        "probed IPv6 prefix"
    );

    let effector = RouteEffector::new(&info).with_conf(&args.ndppd_conf);
    effector.run(args.restart_ndppd).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match reconcile(&args).await {
        Ok(()) => {
            info!("route and ndppd config reconciled");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("reconciliation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
