use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::error;

use crate::bail_server;
use crate::error::{VqaResult, GENERIC_ERROR_BODY};
use crate::inference::task::answer::{AnswerHandler, AnswerRequest, AnswerResponse};

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<Mutex<dyn AnswerHandler>>,
}

/// Answers a natural language question about a base64 encoded image.
///
/// Callers only ever see an opaque 500 on failure; the cause is logged here
/// and nowhere else.
#[axum_macros::debug_handler]
pub async fn handle_answer_request(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> VqaResult<(StatusCode, Json<AnswerResponse>)> {
    let mut model = state.model.lock().await;
    match model.run_answer(request) {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(err) => {
            error!("Error processing visual question answering task: {err}");
            bail_server!(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_BODY)
        }
    }
}

#[axum_macros::debug_handler]
pub async fn handle_health_request() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
