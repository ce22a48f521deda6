use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dtlsproxy::{default_idle_timeout, run, ProxyArgs};

/// DTLS-terminating UDP proxy
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Listen address, e.g. 0.0.0.0:5684 or [::]:5684
    #[arg(long)]
    pub listen: String,

    /// Backend address the decrypted traffic is relayed to
    #[arg(long)]
    pub backend: String,

    /// Path to the PSK keystore file (identity:hex_key per line)
    #[arg(long)]
    pub psk_file: PathBuf,

    /// Idle interval, in seconds, after which a session is torn down
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let idle_timeout = args
        .idle_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(default_idle_timeout);

    let exit_code = run(ProxyArgs {
        listen_addr: args.listen,
        backend_addr: args.backend,
        psk_file: args.psk_file,
        idle_timeout,
    })
    .await;

    std::process::exit(exit_code);
}
