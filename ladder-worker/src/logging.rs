//! Tracing bootstrap (§10.4), adapted from this codebase's own
//! `utils::logger::init_logger`: an `EnvFilter` that prefers `RUST_LOG` and
//! falls back to the configured level, switching between human-readable and
//! JSON output for production container logs.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logger(log_level: &str, json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_logs {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}
