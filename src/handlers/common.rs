use crate::errors::{ApiError, ServiceError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Success envelope returned by every 2xx response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub data: T,
    pub message: String,
}

/// Standard 200 response wrapped in the success envelope.
pub fn success_response<T: Serialize>(data: T, message: &str) -> Response {
    envelope(StatusCode::OK, data, message)
}

/// Standard 201 response wrapped in the success envelope.
pub fn created_response<T: Serialize>(data: T, message: &str) -> Response {
    envelope(StatusCode::CREATED, data, message)
}

fn envelope<T: Serialize>(status: StatusCode, data: T, message: &str) -> Response {
    let body = ApiResponse {
        success: true,
        status_code: status.as_u16(),
        data,
        message: message.to_string(),
    };
    (status, Json(body)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}
