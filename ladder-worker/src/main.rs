//! `ladder-mm`: process bootstrap for the parametric ladder market maker
//! (§10.1, §10.6). Parses CLI flags, loads layered configuration, wires the
//! concrete HTTP/Redis adapters into the [`Orchestrator`], and runs it to
//! completion or until a shutdown signal arrives.

mod cli;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ladder_core::adapters::{HttpVenueClient, RedisPriceSource};
use ladder_core::config::WorkerConfig;
use ladder_core::errors::ConfigError;
use ladder_core::interfaces::{AccountApi, AuthApi, OrderApi};
use ladder_core::metrics::LadderMetrics;
use ladder_core::metrics_server::MetricsServer;
use ladder_core::orchestrator::{Orchestrator, OrchestratorError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exit codes, per §6/§10.6: 0 clean shutdown, distinct nonzero codes for
/// configuration failure vs. any other fatal startup condition.
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_STARTUP_ERROR: u8 = 3;

fn main() -> ExitCode {
    let args = cli::Args::parse();

    let config = match WorkerConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            // Logging isn't bootstrapped yet if the config itself failed to
            // load; a plain eprintln is the only thing guaranteed to land.
            eprintln!("fatal: failed to load configuration: {e:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let json_logs = args.json_logs || config.log_format == "json";
    logging::init_logger(&args.log_level, json_logs);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fatal: failed to start tokio runtime: {e}");
            return ExitCode::from(EXIT_STARTUP_ERROR);
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: WorkerConfig) -> ExitCode {
    info!(account_id = %config.account_id, api_base_url = %config.api_base_url, "ladder-mm starting up");

    let client = match HttpVenueClient::new(
        config.api_base_url.clone(),
        config.account_id.clone(),
        config.ledger_id.clone(),
        config.key_type.clone(),
        config.private_key_hex.clone(),
    ) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "fatal: failed to build venue HTTP client");
            return ExitCode::from(EXIT_STARTUP_ERROR);
        }
    };

    let price_source = match RedisPriceSource::new(&config.redis_connection_string) {
        Ok(ps) => Arc::new(ps),
        Err(e) => {
            error!(error = %e, "fatal: failed to build redis price source");
            return ExitCode::from(EXIT_STARTUP_ERROR);
        }
    };

    let metrics = match LadderMetrics::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(error = %e, "fatal: failed to initialize metrics registry");
            return ExitCode::from(EXIT_STARTUP_ERROR);
        }
    };

    let metrics_addr = config.metrics_listen_addr;
    let metrics_for_server = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = MetricsServer::new(metrics_addr, metrics_for_server).serve().await {
            error!(error = %e, "metrics server exited");
        }
    });

    let shutdown = CancellationToken::new();
    let shutdown_for_handler = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("shutdown signal received");
        shutdown_for_handler.cancel();
    }) {
        error!(error = %e, "fatal: failed to install signal handler");
        return ExitCode::from(EXIT_STARTUP_ERROR);
    }

    let order_api: Arc<dyn OrderApi> = client.clone();
    let account_api: Arc<dyn AccountApi> = client.clone();
    let auth_api: Arc<dyn AuthApi> = client;

    let orchestrator = Arc::new(Orchestrator::new(config, price_source, order_api, account_api, auth_api, metrics));

    match orchestrator.run(shutdown).await {
        Ok(()) => {
            info!("ladder-mm shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(OrchestratorError::Config(ConfigError::DecimalsMismatch { .. })) => {
            error!("fatal: venue-reported decimals do not match configuration");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
        Err(e @ OrchestratorError::Config(_)) => {
            error!(error = %e, "fatal: configuration error");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
        Err(e @ OrchestratorError::Startup(_)) => {
            error!(error = %e, "fatal: startup failure");
            ExitCode::from(EXIT_STARTUP_ERROR)
        }
    }
}
