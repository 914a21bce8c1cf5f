//! Citadel gateway entrypoint
//!
//! Exit codes: 0 normal shutdown, 2 configuration error, 3 bind failure,
//! 4 provider initialization failure.

mod args;

use args::Args;
use clap::Parser;
use citadel_config::Config;
use citadel_server::Server;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: i32 = 2;
const EXIT_BIND: i32 = 3;
const EXIT_PROVIDER_INIT: i32 = 4;

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("runtime init failed: {e}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(config));
    std::process::exit(code);
}

async fn run(config: Config) -> i32 {
    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    tracing::info!(
        default_provider = %config.behaviour.default_provider,
        healing = config.healing.enabled,
        "starting citadel"
    );

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "provider initialization failed");
            return EXIT_PROVIDER_INIT;
        }
    };

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_address, error = %e, "bind failed");
            return EXIT_BIND;
        }
    };

    tracing::info!(address = %bind_address, "citadel ready");

    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_trigger.cancel();
    });

    if let Err(e) = server.serve(listener, shutdown).await {
        tracing::error!(error = %e, "server error");
        return 1;
    }

    tracing::info!("citadel stopped");
    0
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
