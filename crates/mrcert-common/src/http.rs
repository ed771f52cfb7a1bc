use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::ErrorBody;
use crate::error::ErrorCode;

pub fn error_response(code: ErrorCode, message: impl Into<String>) -> axum::response::Response {
    let status = StatusCode::from_u16(code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::new(code, message))).into_response()
}
