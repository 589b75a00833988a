use anyhow::Context;
use clap::Parser;
use flix_bus::hub::{run, BusHubConfig};
use flix_bus::resolve_socket_path;
use flix_core::logging::{init_logging, resolve_log_dir, LogSettings};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "flix-bus", about = "Local notification bus for flix providers")]
struct Args {
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    stderr: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _log_guard = init_logging(&LogSettings {
        component: "flix-bus".to_string(),
        instance: String::new(),
        log_dir: resolve_log_dir(&args.log_dir),
        debug: args.debug,
        stderr: args.stderr,
    });

    if let Err(err) = serve(args).await {
        error!(event = "bus_hub_error", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn serve(args: Args) -> anyhow::Result<()> {
    let config = BusHubConfig {
        socket_path: resolve_socket_path(&args.socket),
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        queue_capacity: args.queue_capacity.max(1),
    };
    let socket = config.socket_path.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "bus_hub_signal");
        let _ = shutdown_tx.send(true);
    });

    run(config, shutdown_rx)
        .await
        .with_context(|| format!("serving bus on {}", socket.display()))
}
