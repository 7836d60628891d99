use axum::{Router, routing::{get, post, put}};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    AppState, get_onu, health, list_empty_onu_ids, list_port, refresh_port, update_description,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/board/{board}/pon/{pon}", get(list_port))
        .route("/api/v1/board/{board}/pon/{pon}/refresh", post(refresh_port))
        .route("/api/v1/board/{board}/pon/{pon}/onu_id/empty", get(list_empty_onu_ids))
        .route("/api/v1/board/{board}/pon/{pon}/onu/{onu}", get(get_onu))
        .route(
            "/api/v1/board/{board}/pon/{pon}/onu/{onu}/description",
            put(update_description),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
