//! Admin listener: health endpoints outside the main pipeline.
//!
//! `/health/live` answers 200 once the gateway listener is up;
//! `/health/ready` answers 200 only while both store probes are fresh.
//! Both sit behind a small concurrency cap so a probe storm cannot
//! steal capacity from traffic handling.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::config::HealthConfig;
use crate::health::HealthState;

/// Bind and spawn the admin server. Returns after the listener is
/// bound so bind failures surface at startup.
pub async fn spawn(
    config: HealthConfig,
    health: Arc<HealthState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let cap = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

    let app = Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .layer(middleware::from_fn_with_state(cap, concurrency_cap))
        .with_state(health);

    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "Admin server listening");

    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin server stopped unexpectedly");
        }
    });

    Ok(())
}

async fn concurrency_cap(
    State(cap): State<Arc<Semaphore>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    match cap.try_acquire() {
        Ok(_permit) => next.run(request).await,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn live(State(health): State<Arc<HealthState>>) -> Response {
    if health.live() {
        (StatusCode::OK, Json(serde_json::json!({"status": "alive"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "starting"})),
        )
            .into_response()
    }
}

async fn ready(State(health): State<Arc<HealthState>>) -> Response {
    if health.ready() {
        (StatusCode::OK, Json(serde_json::json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "not_ready"})),
        )
            .into_response()
    }
}
