//! HTTP read access to the cached photovoltaic status.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::poller::StatusHandle;

/// Path serving the latest status.
pub const STATUS_PATH: &str = "/api/v1/photovoltaic";

/// Path serving the liveness check.
pub const HEALTH_PATH: &str = "/healthz";

/// RFC 7807 problem body.
#[derive(Debug, Serialize)]
struct ProblemDetails {
    title: &'static str,
    detail: &'static str,
    status: u16,
}

/// Create the HTTP router.
pub fn create_router(status: StatusHandle) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(status)
}

async fn status_handler(State(status): State<StatusHandle>) -> Response {
    match status.current() {
        Some(current) => Json(current.as_ref().clone()).into_response(),
        None => {
            let problem = ProblemDetails {
                title: "Data temporarily not available.",
                detail: "The photovoltaic data is currently not available.",
                status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            };

            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "application/problem+json")],
                Json(problem),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(status): State<StatusHandle>) -> Response {
    let (code, body) = if status.is_available() {
        (StatusCode::OK, "Healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Unhealthy")
    };

    (code, [(header::CACHE_CONTROL, "no-store")], body).into_response()
}

/// HTTP server exposing a [`StatusHandle`].
pub struct HttpServer {
    status: StatusHandle,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(status: StatusHandle, listen_addr: SocketAddr) -> Self {
        Self {
            status,
            listen_addr,
        }
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        serve(listener, self.status, shutdown).await
    }
}

/// Serve the router on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    status: StatusHandle,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, create_router(status))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("HTTP server stopped");
    Ok(())
}
