use crate::config::ServerConfig;
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use gradconnect_notify::ConnectionRegistry;
use serde::Serialize;
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

pub mod routes;

/// Server application state
pub struct AppState {
    /// Live notification connections, shared with every request handler
    pub registry: Arc<ConnectionRegistry>,
    /// Server configuration
    pub config: ServerConfig,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_config(config.registry_config()));
        Self {
            registry,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop every connection task and empty the registry.
    pub fn begin_shutdown(&self) {
        info!("Shutting down notification connections");
        self.shutdown.cancel();
        let drained = self.registry.drain();
        info!(count = drained, "Notification connections released");
    }
}

/// Start the HTTP server and run until Ctrl-C or SIGTERM.
pub async fn start(config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind(state.config.bind_addr).await?;

    let shutdown_state = Arc::clone(&state);
    serve(listener, state, async move {
        shutdown_signal().await;
        shutdown_state.begin_shutdown();
    })
    .await
}

/// Serve the application on an already bound listener until `shutdown`
/// resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!("Starting Axum HTTP server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let websocket_router = routes::websocket::router(state.clone());
    let presence_router = routes::presence::router(state.clone());

    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .with_state(state)
        .merge(websocket_router)
        .merge(presence_router)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(security_header(header::X_FRAME_OPTIONS, "DENY"))
        .layer(security_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
        .layer(security_header(header::X_XSS_PROTECTION, "1; mode=block"))
        .layer(security_header(
            header::STRICT_TRANSPORT_SECURITY,
            "max-age=31536000; includeSubDomains",
        ))
        .layer(security_header(
            header::REFERRER_POLICY,
            "strict-origin-when-cross-origin",
        ))
}

fn security_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[derive(Debug, Serialize)]
struct RootResponse {
    name: String,
    version: String,
    status: String,
}

/// Service information
async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(RootResponse {
        name: state.config.app_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    websocket_connections: usize,
    online_users: usize,
}

/// Health check endpoint (for load balancers and monitoring)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "gradconnect-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        websocket_connections: state.registry.total_connections(),
        online_users: state.registry.user_count(),
    })
}
