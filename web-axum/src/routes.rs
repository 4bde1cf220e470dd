use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use boxes_queue::protocol::{InquireBestEdge, InquireResponse, SubmitGameState, SubmitResponse};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, error, Span};

use crate::aggregator::{Aggregator, AssessError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Assess(#[from] AssessError),
    #[error("request handler did not finish")]
    Join(#[from] JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Assess(AssessError::BoardTooLarge { .. } | AssessError::InvalidBoard(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Assess(AssessError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Rejected request");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Run store-bound work off the async runtime, inside the current span
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AssessError> + Send + 'static,
{
    let span = Span::current();

    Ok(tokio::task::spawn_blocking(move || span.in_scope(f)).await??)
}

pub fn router(aggregator: Arc<Aggregator>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/submit", post(submit))
        .route("/inquire", post(inquire))
        .with_state(aggregator)
}

async fn root() -> &'static str {
    "OK"
}

async fn submit(
    State(aggregator): State<Arc<Aggregator>>,
    Json(request): Json<SubmitGameState>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let response = blocking(move || aggregator.submit(&request)).await?;

    Ok(Json(response))
}

async fn inquire(
    State(aggregator): State<Arc<Aggregator>>,
    Json(request): Json<InquireBestEdge>,
) -> Result<Json<InquireResponse>, ApiError> {
    let response = blocking(move || aggregator.inquire(&request)).await?;

    Ok(Json(response))
}
