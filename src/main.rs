#[macro_use]
extern crate tracing;

mod config;
mod controller;
mod download;
mod error;
mod identifier;
mod processor;
mod response;
mod routes;
mod staging;
mod storage;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::Server;
use strum::{Display, EnumString};
use tracing::Level;

use crate::controller::UploadController;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long in-flight uploads get to finish once a shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

#[derive(Debug, Parser)]
#[clap(author, version, about)]
pub struct ServerConfig {
    #[clap(short, long, env = "PICSTASH_CONFIG", default_value = "config.yaml")]
    /// The file path to the server config file.
    config: PathBuf,

    #[clap(long, env = "PICSTASH_HOST", default_value = "0.0.0.0")]
    /// The binding host address of the server.
    host: String,

    #[clap(long, env = "PORT")]
    /// The port to bind to, overriding the port in the config file.
    port: Option<u16>,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    /// The log level filter, any logs that are above this level wont be displayed.
    log_level: LogLevel,
}

/// Completes once `signal` fires.
///
/// If the signal cannot be listened for the error is logged and this
/// never completes, the server keeps running rather than stopping at once.
async fn wait_for_shutdown(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("Shutdown requested, finishing in-flight uploads"),
        Err(e) => {
            warn!("Failed to listen for the shutdown signal: {}", e);
            futures::future::pending::<()>().await;
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: ServerConfig = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::from(args.log_level))
        .init();

    let cfg = config::RuntimeConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config from {:?}", &args.config))?;

    // Any store that cannot be built stops the server here, before it
    // starts accepting uploads.
    let stores = storage::connect_all(&cfg.stores)
        .await
        .context("failed to connect storage backends")?;
    let store = storage::select_active(stores, cfg.active_store)?;
    info!("Uploads will be saved to the {} store", store.backend_name());

    let controller = Arc::new(UploadController::new(&cfg, store)?);
    let app = routes::router(controller.clone());

    let port = args.port.unwrap_or(cfg.port);
    let addr: SocketAddr = format!("{}:{}", &args.host, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", &args.host, port))?;

    info!("Serving on http://{}", addr);
    Server::new(TcpListener::bind(addr))
        .run_with_graceful_shutdown(
            app,
            wait_for_shutdown(tokio::signal::ctrl_c()),
            Some(SHUTDOWN_GRACE),
        )
        .await?;

    controller.shutdown();

    Ok(())
}
