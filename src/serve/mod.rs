//! HTTP surface of the prediction service.
//!
//! ```text
//!   POST /predict   {"<feature>": <number>, ...}  → {"prediction", "status", "message"}
//!   GET  /health                                  → OK
//! ```

pub mod predict;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value as JsonValue};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::ServeError;

pub use predict::{Prediction, PredictionResponse, PredictionService};

pub fn build_router(service: PredictionService) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_check))
        .with_state(service)
}

/// Serve until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    service: PredictionService,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("reading listener address")?;
    log::info!(
        "prediction service listening on http://{addr} (schema check: {:?})",
        service.schema_check()
    );
    log::info!("  POST http://{addr}/predict");
    log::info!("  GET  http://{addr}/health");

    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("running prediction server")
}

async fn health_check() -> &'static str {
    "OK"
}

async fn predict_handler(
    State(service): State<PredictionService>,
    body: Bytes,
) -> Result<Json<PredictionResponse>, ServeError> {
    let result = score_request(service, &body).await;
    match &result {
        Ok(Json(response)) => {
            log::info!("predict -> {} ({})", response.prediction, response.message)
        }
        Err(e) => log::warn!("predict -> {}: {e}", e.status()),
    }
    result
}

async fn score_request(
    service: PredictionService,
    body: &[u8],
) -> Result<Json<PredictionResponse>, ServeError> {
    let request = parse_request(body)?;
    let prediction = tokio::task::spawn_blocking(move || service.score(&request))
        .await
        .map_err(|e| ServeError::Internal(format!("scoring task failed: {e}")))??;
    Ok(Json(prediction.into()))
}

fn parse_request(body: &[u8]) -> Result<Map<String, JsonValue>, ServeError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|e| ServeError::MalformedRequest(format!("body is not valid JSON: {e}")))?;
    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(ServeError::MalformedRequest(format!(
            "expected a JSON object of features, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
