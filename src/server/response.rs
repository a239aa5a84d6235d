use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::authz::Denial;
use crate::datamodel::{DatamodelError, MaterializeError};
use crate::error::{Error, Result as StoreResult};

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// Machine-readable codes plus a human-readable message.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub codes: Vec<String>,
    pub message: String,
}

/// Paginated response for list endpoints
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T: Serialize> {
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T: Serialize> PaginatedResponse<T> {
    #[must_use]
    pub fn new(data: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            data,
            next_cursor,
            has_more,
        }
    }
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub codes: Vec<String>,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            codes: vec![code.to_string()],
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// The one response for both missing and out-of-scope instances.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Not found")
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "insufficient_level", message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "data": null,
            "error": { "codes": self.codes, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Unauthenticated => Self::new(
                StatusCode::UNAUTHORIZED,
                "authentication_required",
                "Authentication required",
            ),
            Denial::Forbidden => Self::forbidden("Insufficient level for this operation"),
            Denial::NotFound => Self::not_found(),
            Denial::ExceedsCeiling => Self::new(
                StatusCode::BAD_REQUEST,
                "exceeds_ceiling",
                "Cannot grant a level above your own",
            ),
        }
    }
}

impl From<MaterializeError> for ApiError {
    fn from(e: MaterializeError) -> Self {
        let code = match &e {
            MaterializeError::UnknownField(_) => "unknown_field",
            MaterializeError::SystemField(_) => "system_field",
            MaterializeError::MissingValue(_) => "missing_value",
            MaterializeError::NullNotAllowed(_) => "null_not_allowed",
            MaterializeError::InvalidValue { .. } => "invalid_value",
        };
        Self::new(StatusCode::BAD_REQUEST, code, e.to_string())
    }
}

impl From<DatamodelError> for ApiError {
    fn from(e: DatamodelError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.code(), e.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => Self::not_found(),
            Error::AlreadyExists => {
                Self::new(StatusCode::CONFLICT, "already_exists", "Already exists")
            }
            Error::Conflict(message) => Self::conflict(message),
            Error::BadRequest(message) => Self::bad_request(message),
            Error::Unauthorized => Self::new(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid credentials",
            ),
            Error::InvalidTokenFormat => {
                Self::new(StatusCode::UNAUTHORIZED, "invalid_token", "Invalid token")
            }
            Error::TokenExpired => {
                Self::new(StatusCode::UNAUTHORIZED, "token_expired", "Token expired")
            }
            Error::PasswordExpired => Self::new(
                StatusCode::UNAUTHORIZED,
                "password_expired",
                "Password expired",
            ),
            Error::Forbidden => Self::forbidden("Forbidden"),
            Error::Denied(denial) => denial.into(),
            Error::Materialize(e) => e.into(),
            Error::Datamodel(e) => e.into(),
            other => {
                tracing::error!("Request failed: {other}");
                Self::internal("Internal server error")
            }
        }
    }
}

/// Helper to paginate a slice and determine if there are more results
pub fn paginate<T, F>(items: Vec<T>, limit: usize, get_cursor: F) -> (Vec<T>, Option<String>, bool)
where
    F: Fn(&T) -> String,
{
    let has_more = items.len() > limit;
    let items: Vec<T> = items.into_iter().take(limit).collect();
    let next_cursor = if has_more {
        items.last().map(&get_cursor)
    } else {
        None
    };
    (items, next_cursor, has_more)
}

pub const DEFAULT_PAGE_SIZE: i32 = 50;

/// Extension trait for converting store results to API errors with a custom message.
pub trait StoreResultExt<T> {
    fn api_err(self, message: &'static str) -> Result<T, ApiError>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn api_err(self, message: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| {
            tracing::error!("{message}: {e}");
            ApiError::internal(message)
        })
    }
}

/// Extension for Option types from store operations.
pub trait StoreOptionExt<T> {
    fn or_not_found(self) -> Result<T, ApiError>;
}

impl<T> StoreOptionExt<T> for Option<T> {
    fn or_not_found(self) -> Result<T, ApiError> {
        self.ok_or_else(ApiError::not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_sets_cursor_when_more() {
        let (items, cursor, more) = paginate(vec![1, 2, 3], 2, |n| n.to_string());
        assert_eq!(items, vec![1, 2]);
        assert_eq!(cursor.as_deref(), Some("2"));
        assert!(more);

        let (items, cursor, more) = paginate(vec![1], 2, |n| n.to_string());
        assert_eq!(items, vec![1]);
        assert!(cursor.is_none());
        assert!(!more);
    }

    #[test]
    fn test_scope_denial_matches_missing() {
        let denied = ApiError::from(Denial::NotFound);
        let missing = ApiError::from(Error::NotFound);
        assert_eq!(denied.status, missing.status);
        assert_eq!(denied.codes, missing.codes);
        assert_eq!(denied.message, missing.message);
    }

    #[test]
    fn test_denial_statuses() {
        assert_eq!(
            ApiError::from(Denial::Unauthenticated).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::from(Denial::Forbidden).status, StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(Denial::ExceedsCeiling).codes,
            vec!["exceeds_ceiling"]
        );
    }
}
