//! MeshCSE Node
//!
//! A federated IoT resource middleware node.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          MeshCSE Node                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Resolver   │───▶│  Dispatcher  │───▶│ Store / Peer │       │
//! │  │   (Where)    │    │    (What)    │    │    (How)     │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod adapters;
mod addressing;
mod capacity;
mod dispatch;
mod domain;
mod error;
mod forward;
mod metrics;
mod notify;
mod primitive;

use crate::adapters::{AllowAllDecider, InMemoryStore, ListDefaults, UnboundMqttPublisher};
use crate::addressing::CseIdentity;
use crate::capacity::CapacityManager;
use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::error::Result;
use crate::forward::{Forwarder, ForwarderConfig};
use crate::notify::NotificationEngine;
use crate::primitive::RequestPrimitive;

// =============================================================================
// CLI Arguments
// =============================================================================

/// MeshCSE - Federated IoT resource middleware node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node identifier within the service provider domain
    #[arg(long, env = "CSE_ID", default_value = "/meshcse1")]
    cse_id: String,

    /// Service provider identifier
    #[arg(long, env = "SP_ID", default_value = "//mesh.example")]
    sp_id: String,

    /// Resource name of the base resource
    #[arg(long, env = "BASE_RN", default_value = "base")]
    base_rn: String,

    /// Primitive server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:7579")]
    bind_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Forwarding timeout in seconds
    #[arg(long, env = "FORWARD_TIMEOUT_SECONDS", default_value = "30")]
    forward_timeout_seconds: u64,

    /// Notification delivery timeout in seconds
    #[arg(long, env = "NOTIFICATION_TIMEOUT_SECONDS", default_value = "10")]
    notification_timeout_seconds: u64,

    /// Default member-count bound for ordered child lists
    #[arg(long, env = "DEFAULT_MAX_COUNT", default_value = "100")]
    default_max_count: u32,

    /// Default cumulative byte bound for ordered child lists
    #[arg(long, env = "DEFAULT_MAX_BYTE_SIZE", default_value = "1048576")]
    default_max_byte_size: u64,

    /// Originator granted unconditional access
    #[arg(long, env = "ADMIN_ORIGINATOR", default_value = "Superman")]
    admin_originator: String,

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
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting MeshCSE node");
    info!("  Node id: {}", args.cse_id);
    info!("  Provider id: {}", args.sp_id);
    info!("  Base resource: {}", args.base_rn);
    info!("  Primitive server: {}", args.bind_addr);
    info!("  Admin originator: {}", args.admin_originator);

    let identity = CseIdentity::new(&args.sp_id, &args.cse_id, &args.base_rn);

    let store = Arc::new(InMemoryStore::new(ListDefaults {
        max_count: args.default_max_count,
        max_byte_size: args.default_max_byte_size,
    }));
    let base = store.seed_base(&args.cse_id, &args.base_rn);
    info!("Seeded base resource {} ({})", base.sid, base.ri);

    let capacity = Arc::new(CapacityManager::new(
        store.clone(),
        store.clone(),
        &args.admin_originator,
    ));

    let notifier = Arc::new(NotificationEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(UnboundMqttPublisher),
        identity.clone(),
        Duration::from_secs(args.notification_timeout_seconds),
    ));

    let forwarder = Forwarder::new(
        store.clone(),
        identity.clone(),
        ForwarderConfig {
            timeout: Duration::from_secs(args.forward_timeout_seconds),
        },
    );

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        store.clone(),
        Arc::new(AllowAllDecider),
        forwarder,
        notifier,
        capacity,
        DispatcherConfig::new(identity, &args.admin_originator),
    ));

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Run the primitive server
    info!("Accepting request primitives");
    run_primitive_server(&args.bind_addr, dispatcher).await?;

    info!("Node shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"));

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
// Primitive Server
// =============================================================================

async fn run_primitive_server(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<()> {
    use http_body_util::{BodyExt, Full};
    use bytes::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Method, Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn primitive_handler(
        req: Request<hyper::body::Incoming>,
        dispatcher: Arc<Dispatcher>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        if req.method() != Method::POST || req.uri().path() != "/primitives" {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap());
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Full::new(Bytes::from(format!("body error: {}", e))))
                    .unwrap());
            }
        };

        let request: RequestPrimitive = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .header("Content-Type", "application/json")
                    .body(Full::new(Bytes::from(
                        serde_json::json!({ "m2m:dbg": format!("malformed primitive: {}", e) })
                            .to_string(),
                    )))
                    .unwrap());
            }
        };

        let response = dispatcher.handle(request).await;
        let body = serde_json::to_vec(&response).unwrap_or_default();
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("X-M2M-RSC", response.status.code().to_string())
            .header("X-M2M-RI", &response.request_id)
            .body(Full::new(Bytes::from(body)))
            .unwrap())
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| error::Error::Internal(format!("Invalid primitive server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| error::Error::Internal(format!("Failed to bind primitive server: {}", e)))?;

    info!("Primitive server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| error::Error::Internal(format!("Primitive server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let dispatcher = dispatcher.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| primitive_handler(req, dispatcher.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Primitive server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use bytes::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))
                .unwrap(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| error::Error::Internal(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| error::Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| error::Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use bytes::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(metrics::render())))
                .unwrap(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| error::Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| error::Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| error::Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
