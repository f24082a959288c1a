//! HTTP surface of the ingestion and query services.
//!
//! | Method | Path              | Response                                  |
//! |--------|-------------------|-------------------------------------------|
//! | GET    | `/`               | liveness text                             |
//! | GET    | `/values/all`     | `[{"number": n}, ...]` in log order       |
//! | GET    | `/values/current` | `{"<index>": "<value or pending>", ...}`  |
//! | POST   | `/values`         | `202 {"working": true}` or `422`          |

use std::{collections::BTreeMap, fmt, future::Future};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::{
    ingest::{IngestionService, SubmitError},
    model::{CacheValue, Index, SubmissionRecord},
    query::QueryService,
};

#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestionService,
    pub query: QueryService,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/values/all", get(handle_all_values))
        .route("/values/current", get(handle_current_values))
        .route("/values", post(handle_submit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub index: Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    pub working: bool,
}

async fn handle_root() -> &'static str {
    "Hello!"
}

async fn handle_all_values(
    State(state): State<AppState>,
) -> Result<Json<Vec<SubmissionRecord>>, ApiError> {
    Ok(Json(state.query.all_submitted().await?))
}

async fn handle_current_values(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<Index, CacheValue>>, ApiError> {
    Ok(Json(state.query.current_values().await?))
}

async fn handle_submit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload?;
    let index = state.ingest.validate(&request.index)?;
    // The log append handle is dropped here: the response never waits on it.
    state.ingest.submit(index).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { working: true })))
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        if err.is_validation() {
            return Self::unprocessable(err.to_string());
        }
        error!(error = %err, "submission failed");
        Self::internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "query failed");
        Self::internal(format!("{err:#}"))
    }
}
