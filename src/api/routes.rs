use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a success response with data
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response with message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub type JsonResponse = (StatusCode, Json<ApiResponse<Value>>);

pub fn ok(data: impl Serialize) -> JsonResponse {
    (
        StatusCode::OK,
        Json(ApiResponse::success(
            serde_json::to_value(data).unwrap_or_default(),
        )),
    )
}

pub fn err(status: StatusCode, message: impl Into<String>) -> JsonResponse {
    (status, Json(ApiResponse::error(message)))
}
