use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::usecase::OnuError;

/// Ошибка use case в виде HTTP ответа
#[derive(Debug)]
pub struct ApiError(pub OnuError);

impl From<OnuError> for ApiError {
    fn from(err: OnuError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            OnuError::NotFound(_) => StatusCode::NOT_FOUND,
            OnuError::DeviceUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OnuError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            OnuError::Decode(_) => StatusCode::BAD_GATEWAY,
            OnuError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OnuError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            OnuError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            OnuError::Device(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "status": status.as_u16(),
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
