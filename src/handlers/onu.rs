use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::time::Duration;

use super::{ApiError, AppState};
use crate::formatter::{FreeIndicesJson, JsonFormatter, OnuJson, PortListingJson};
use crate::models::DeviceCoordinate;

#[derive(Debug, Default, Deserialize)]
pub struct StalenessQuery {
    /// Допустимая давность кэша; без параметра берётся значение из конфигурации
    pub max_staleness_secs: Option<u64>,
}

impl StalenessQuery {
    fn max_staleness(&self) -> Option<Duration> {
        self.max_staleness_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct DescriptionBody {
    pub description: String,
}

/// GET /api/v1/board/{board}/pon/{pon}
pub async fn list_port(
    State(state): State<AppState>,
    Path((board, pon)): Path<(u8, u8)>,
    Query(query): Query<StalenessQuery>,
) -> Result<Json<PortListingJson>, ApiError> {
    let listing = state
        .service
        .list_onus_for_port(board, pon, query.max_staleness())
        .await?;
    Ok(Json(JsonFormatter::format_port_listing(&listing)))
}

/// GET /api/v1/board/{board}/pon/{pon}/onu/{onu}
pub async fn get_onu(
    State(state): State<AppState>,
    Path((board, pon, onu)): Path<(u8, u8, u16)>,
    Query(query): Query<StalenessQuery>,
) -> Result<Json<OnuJson>, ApiError> {
    let coordinate = DeviceCoordinate::new(board, pon, onu);
    let view = state.service.get_onu(coordinate, query.max_staleness()).await?;
    Ok(Json(JsonFormatter::format_onu(&view)))
}

/// POST /api/v1/board/{board}/pon/{pon}/refresh
pub async fn refresh_port(
    State(state): State<AppState>,
    Path((board, pon)): Path<(u8, u8)>,
) -> Result<Json<PortListingJson>, ApiError> {
    let listing = state.service.refresh_port(board, pon).await?;
    Ok(Json(JsonFormatter::format_port_listing(&listing)))
}

/// GET /api/v1/board/{board}/pon/{pon}/onu_id/empty
pub async fn list_empty_onu_ids(
    State(state): State<AppState>,
    Path((board, pon)): Path<(u8, u8)>,
) -> Result<Json<FreeIndicesJson>, ApiError> {
    let free = state.service.free_onu_indices(board, pon).await?;
    Ok(Json(JsonFormatter::format_free_indices(board, pon, free)))
}

/// PUT /api/v1/board/{board}/pon/{pon}/onu/{onu}/description
pub async fn update_description(
    State(state): State<AppState>,
    Path((board, pon, onu)): Path<(u8, u8, u16)>,
    Json(body): Json<DescriptionBody>,
) -> Result<StatusCode, ApiError> {
    let coordinate = DeviceCoordinate::new(board, pon, onu);
    state
        .service
        .update_description(coordinate, &body.description)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
