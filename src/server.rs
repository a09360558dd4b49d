//! HTTP surface for the query engine.
//!
//! Deliberately thin: five JSON endpoints that parse a parameters struct,
//! call the engine against the pinned snapshot and serialize the result.
//! Each request runs to completion on its worker; swaps only ever stall a
//! request for the duration of the pointer exchange.

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::{
    Engine, MatchRequest, NearestRequest, RouteRequest, TableRequest, TripRequest,
};
use crate::error::EngineError;

/// Initialize structured logging with tracing.
///
/// - `log_format`: "text" for human-readable, "json" for structured lines.
/// - Respects RUST_LOG for filtering (default: `info`).
pub fn init_tracing(log_format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().json().with_env_filter(filter).with_target(true).init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(false).init();
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn error_response(error: EngineError) -> Response {
    let status = match &error {
        EngineError::InvalidInput(_) | EngineError::NoSegment { .. } => StatusCode::BAD_REQUEST,
        EngineError::NoRoute => StatusCode::NOT_FOUND,
        EngineError::IncompatibleVersion(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::ResourceExhaustion(_) | EngineError::SnapshotReloadRace => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = ErrorBody {
        code: error.code(),
        message: error.to_string(),
    };
    (status, Json(body)).into_response()
}

macro_rules! handler {
    ($name:ident, $request:ty, $method:ident) => {
        async fn $name(
            State(engine): State<Arc<Engine>>,
            Json(request): Json<$request>,
        ) -> Response {
            match engine.$method(&request) {
                Ok(result) => Json(result).into_response(),
                Err(error) => error_response(error),
            }
        }
    };
}

handler!(route, RouteRequest, route);
handler!(table, TableRequest, table);
handler!(nearest, NearestRequest, nearest);
handler!(match_trace, MatchRequest, match_trace);
handler!(trip, TripRequest, trip);

async fn health(State(engine): State<Arc<Engine>>) -> Response {
    match engine.registry().current() {
        Ok(snapshot) => Json(serde_json::json!({
            "status": "ok",
            "timestamp": snapshot.facade.timestamp(),
            "checksum": snapshot.facade.checksum(),
        }))
        .into_response(),
        Err(error) => error_response(error),
    }
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/route", post(route))
        .route("/table", post(table))
        .route("/nearest", post(nearest))
        .route("/match", post(match_trace))
        .route("/trip", post(trip))
        .route("/health", get(health))
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(engine)
}

/// Find a free port starting from the given port.
pub fn find_free_port(start: u16) -> u16 {
    for port in start..65535 {
        if StdTcpListener::bind(("127.0.0.1", port)).is_ok() {
            return port;
        }
    }
    panic!("No free port found");
}

/// Shutdown signal: waits for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
}

/// Serve the engine until a shutdown signal arrives.
pub async fn serve(engine: Arc<Engine>, ip: &str, port: u16) -> Result<()> {
    let app = build_router(engine);
    let addr = format!("{ip}:{port}");
    tracing::info!(%addr, "routing engine listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
