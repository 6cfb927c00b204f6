use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use chatter_api::{server, ServiceContext};
use chatter_core::config::StoreBackend;
use chatter_core::logging::{init_logging_with_config, LogConfig};
use chatter_core::metrics::init_metrics;
use chatter_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use chatter_core::store::open_store;
use chatter_core::Config;

#[derive(Parser, Debug)]
#[command(name = "chatter-api")]
#[command(author, version, about = "Chat backend gRPC server", long_about = None)]
struct Args {
    /// TOML configuration file; CHATTER_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Storage backend (sqlite, memory)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Delete all stored data before serving
    #[arg(long)]
    clear: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config =
                Config::from_file(path).with_context(|| format!("loading {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => Config::from_env()?,
    };

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    if args.clear {
        config.store.clear_on_start = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    info!("Starting chatter API server");

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(config.metrics.bind_address)
            .install()
            .context("installing Prometheus exporter")?;
        init_metrics();
        info!("Metrics exported on {}", config.metrics.bind_address);
    }

    let store = open_store(&config.store).context("opening store")?;
    info!(backend = ?config.store.backend, "Store ready");

    let coordinator = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
    install_signal_handlers(coordinator.clone())?;

    let ctx = Arc::new(ServiceContext::new(
        store,
        coordinator.clone(),
        config.server.subscription_buffer,
    ));

    let listener = TcpListener::bind(config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;

    let signal = coordinator.clone();
    let mut server = tokio::spawn(server::serve(listener, ctx, async move {
        signal.wait_for_shutdown().await
    }));

    tokio::select! {
        result = &mut server => {
            // the server stopped without being asked to
            result??;
            return Ok(());
        }
        _ = coordinator.wait_for_shutdown() => {}
    }

    // live subscriptions end on the shutdown signal; bound whatever is left
    tokio::select! {
        drained = tokio::time::timeout(coordinator.timeout(), server) => match drained {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("Server task failed: {}", e),
            Err(_) => warn!(
                "In-flight calls still running after {:?}, exiting anyway",
                coordinator.timeout()
            ),
        },
        _ = coordinator.wait_for_immediate() => {
            warn!("Drain abandoned");
            return Ok(());
        }
    }

    coordinator.complete().await;
    Ok(())
}
