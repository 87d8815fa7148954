//! Mapping of Warden errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{Error, Suspension};

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Present when the principal is suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
    /// Trace ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Handler error wrapping [`Error`].
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Suspended(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_)
            | Error::InvalidTimeWindow(_)
            | Error::InvalidPattern(_)
            | Error::Config(_)
            | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            Error::Suspended(_) => "SUSPENDED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidRequest(_)
            | Error::InvalidTimeWindow(_)
            | Error::InvalidPattern(_)
            | Error::Config(_)
            | Error::Serialization(_) => "INVALID_REQUEST",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let trace_id = Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(trace_id = %trace_id, error = %self.0, "Request failed");
        } else {
            tracing::debug!(trace_id = %trace_id, error = %self.0, "Request rejected");
        }

        let suspension = self.0.suspension().cloned();
        let message = match &suspension {
            Some(s) => s.rejection_message(),
            None => self.0.to_string(),
        };

        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
            suspension,
            trace_id: Some(trace_id),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(Error::not_found("x")).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(Error::invalid_request("x")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(Error::storage("x")).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
