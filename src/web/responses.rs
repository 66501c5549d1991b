use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Field name to message map attached to validation failures.
pub type FieldErrors = BTreeMap<String, String>;

/// Every failure a handler can surface to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        fields: FieldErrors,
    },
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ExternalService(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: FieldErrors::new(),
        }
    }

    /// Validation failure for a single named field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), message.clone());
        Self::Validation { message, fields }
    }

    /// Collapses accumulated field errors; `Ok` when nothing was reported.
    pub fn from_fields(fields: FieldErrors) -> Result<(), Self> {
        if fields.is_empty() {
            return Ok(());
        }
        let message = if fields.len() == 1 {
            fields.values().next().cloned().unwrap_or_default()
        } else {
            "Validation failed".to_string()
        };
        Err(Self::Validation { message, fields })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ExternalService(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(err).context("database query failed"))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            ApiError::Internal(err) => {
                error!(?err, "request failed");
                "Internal server error".to_string()
            }
            ApiError::ExternalService(message) => {
                error!(%message, "external service failure");
                message.clone()
            }
            other => {
                warn!(status = status.as_u16(), message = %other, "request rejected");
                other.to_string()
            }
        };

        let errors = match self {
            ApiError::Validation { fields, .. } if !fields.is_empty() => Some(fields),
            _ => None,
        };

        let body = ErrorEnvelope {
            success: false,
            message,
            errors,
        };

        (status, Json(body)).into_response()
    }
}

/// `{ success: true, data }` wrapper for record payloads.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// `{ success: true, count, data }` wrapper for collections.
#[derive(Debug, Serialize)]
pub struct ListEnvelope<T> {
    pub success: bool,
    pub count: usize,
    pub data: Vec<T>,
}

impl<T: Serialize> ListEnvelope<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}

/// Helper for handlers that return `(StatusCode, Json<T>)` on success.
pub fn json_ok<T: Serialize>(status: StatusCode, body: T) -> (StatusCode, Json<T>) {
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(
            ApiError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("no token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("nope".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("gone".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ExternalService("drive down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn single_field_error_uses_field_message() {
        let mut fields = FieldErrors::new();
        fields.insert("stipend".into(), "Stipend must be a positive number".into());

        match ApiError::from_fields(fields) {
            Err(ApiError::Validation { message, fields }) => {
                assert_eq!(message, "Stipend must be a positive number");
                assert!(fields.contains_key("stipend"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_field_map_is_ok() {
        assert!(ApiError::from_fields(FieldErrors::new()).is_ok());
    }

    #[test]
    fn list_envelope_counts_items() {
        let envelope = ListEnvelope::new(vec![1, 2, 3]);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["count"], 3);
        assert_eq!(value["success"], true);
    }
}
