//! tiercache daemon
//!
//! Runs the multi-level cache with its preloader and exposes health and
//! Prometheus endpoints.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          tiercache                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Analyzer    │───▶│  Preloader   │───▶│ MultiLevel   │       │
//! │  │              │    │  (ticker)    │    │ Cache        │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          /healthz /readyz            /metrics                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::adapters::{PrometheusExporter, SeedFileLoader};
use tiercache::{CacheContext, Config, InMemoryRemoteTier, MultiLevelCache, SystemClock};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - multi-level adaptive cache daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// JSON seed file used as the preloader's source of truth
    #[arg(long, env = "TIERCACHE_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting tiercache");

    let config = match &args.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            Config::default()
        }
    };

    let ctx = CacheContext::from_config(
        config,
        Arc::new(InMemoryRemoteTier::new()),
        Arc::new(SystemClock),
    )
    .context("building cache context")?;

    let loader = match &args.seed_file {
        Some(path) => SeedFileLoader::from_file(path)
            .with_context(|| format!("loading seed file {}", path.display()))?,
        None => {
            warn!("No seed file given; preloads will find nothing to load");
            SeedFileLoader::from_map(Default::default())
        }
    };
    let preloader = ctx.start_preloader(Arc::new(loader));

    let exporter =
        Arc::new(PrometheusExporter::new(ctx.cache.clone()).context("registering metrics")?);

    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .with_context(|| format!("invalid health address {}", args.health_addr))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {}", args.metrics_addr))?;

    let health_cache = ctx.cache.clone();
    let health = tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_cache).await {
            error!("Health server error: {:#}", e);
        }
    });

    let metrics = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exporter).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    if let Some(handle) = preloader {
        handle.shutdown().await;
    }
    health.abort();
    metrics.abort();

    info!("tiercache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let directives = format!("{},hyper=warn", args.log_level.to_lowercase());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn health_handler(
    req: Request<hyper::body::Incoming>,
    cache: Arc<MultiLevelCache>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        "/readyz" => {
            if cache.ping().await {
                text_response(StatusCode::OK, "ok")
            } else {
                text_response(StatusCode::SERVICE_UNAVAILABLE, "remote tier unreachable")
            }
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn metrics_handler(
    req: Request<hyper::body::Incoming>,
    exporter: Arc<PrometheusExporter>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() != "/metrics" {
        return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
    }

    let response = match exporter.render() {
        Ok(body) => {
            let mut response = text_response(StatusCode::OK, body);
            if let Ok(content_type) = exporter.content_type().parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, content_type);
            }
            response
        }
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    };
    Ok(response)
}

async fn run_health_server(addr: SocketAddr, cache: Arc<MultiLevelCache>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding health server to {}", addr))?;
    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("health server accept")?;
        let io = TokioIo::new(stream);
        let cache = cache.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, cache.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(
    addr: SocketAddr,
    exporter: Arc<PrometheusExporter>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics server to {}", addr))?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept")?;
        let io = TokioIo::new(stream);
        let exporter = exporter.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(req, exporter.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
