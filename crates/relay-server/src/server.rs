use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_store::Database;

use crate::broadcast::SseBroadcaster;
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Interval between `: heartbeat` comments on idle event streams.
    pub heartbeat: Duration,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7777,
            heartbeat: Duration::from_secs(15),
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub broadcaster: Arc<SseBroadcaster>,
    pub heartbeat: Duration,
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(handlers::list_sessions))
        .route(
            "/api/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/events", get(handlers::events))
        .route("/api/stats", get(handlers::stats))
        .route("/api/ingest", post(handlers::ingest))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to the broadcaster and for shutdown.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let broadcaster = Arc::new(SseBroadcaster::new(config.max_send_queue));
    let shutdown = CancellationToken::new();
    let state = AppState {
        db,
        broadcaster: Arc::clone(&broadcaster),
        heartbeat: config.heartbeat,
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "relay server started");

    let router = build_router(state);
    let signal = shutdown.clone().cancelled_owned();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
        {
            tracing::error!(error = %e, "relay server failed");
        }
    });

    Ok(ServerHandle {
        addr,
        broadcaster,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Keeps the server task alive.
pub struct ServerHandle {
    addr: SocketAddr,
    broadcaster: Arc<SseBroadcaster>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The sink live runs in this process should publish to.
    pub fn broadcaster(&self) -> Arc<SseBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Close event streams and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "relay server task ended abnormally");
        }
    }
}
