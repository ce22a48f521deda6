pub mod config;
pub mod core;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod net;
pub mod proxy;

use std::time::Duration;

use tracing::{error, info};

pub use proxy::{ProxyArgs, ProxyCore};

/// Runs the proxy to completion (until SIGINT) and returns the process exit
/// code: zero on clean shutdown, non-zero on any initialization failure.
pub async fn run(args: ProxyArgs) -> i32 {
    let proxy = match ProxyCore::bind(args).await {
        Ok(p) => p,
        Err(e) => {
            error!("[dtlsproxy] startup failed: {e}");
            return 1;
        }
    };

    proxy.run();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[dtlsproxy] failed to install signal handler: {e}");
        proxy.shutdown().await;
        return 1;
    }

    info!("[dtlsproxy] signal received, shutting down");
    proxy.shutdown().await;
    0
}

pub fn default_idle_timeout() -> Duration {
    Duration::from_secs(config::DEFAULT_IDLE_TIMEOUT_SECS)
}
