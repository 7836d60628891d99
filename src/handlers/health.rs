use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use super::AppState;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (StatusCode::OK,
        Json(json!({
        "status": "im ready",
        "device": state.device_name.as_ref(),
        "UTC_time": chrono::Utc::now().to_rfc2822(),
    })))
}
