use clap::Parser;
use std::process::ExitCode;
use tracing::Instrument;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod health;
mod lifecycle;
mod listener;
mod metrics;
mod pipeline;
mod proxy;
mod receiver;
mod service;
mod utils;

#[cfg(test)]
mod testing;

use config::{Cli, LogFormat, Settings};
use service::{exit_status, Service};

#[actix_web::main]
async fn main() -> ExitCode {
    let settings = match Cli::parse().into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    init_tracing(&settings);

    let root = tracing::info_span!("service", name = %settings.name);
    let status = run(settings).instrument(root.clone()).await;
    root.in_scope(|| tracing::info!("exiting"));

    ExitCode::from(status)
}

/// Structured logging, filtered by --log-level unless RUST_LOG is set.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_directive()));
    let layer = fmt::layer().with_target(true).with_thread_ids(true);
    let registry = tracing_subscriber::registry().with(filter);

    match settings.log_format {
        LogFormat::Logfmt => registry.with(layer).init(),
        LogFormat::Json => registry.with(layer.json()).init(),
    }
}

async fn run(settings: Settings) -> u8 {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %settings.listen,
        internal_listen = %settings.internal_listen,
        profiling = settings.profiling,
        "starting {}",
        settings.role.default_name()
    );

    let service = match Service::new(&settings) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "failed to start service");
            return 1;
        }
    };
    tracing::debug!(
        public = ?service.public_addrs(),
        internal = ?service.internal_addrs(),
        "listeners bound"
    );

    let outcome = service.run().await;
    if let Err(e) = &outcome {
        if !e.is_canceled() {
            tracing::error!(error = %e, "run group failed");
        }
    }
    exit_status(&outcome)
}
