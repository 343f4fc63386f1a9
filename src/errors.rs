use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// A single field-level validation failure returned to the caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Malformed or oversized input, with per-field detail.
    Validation {
        message: String,
        details: Vec<FieldError>,
    },
    /// Missing or invalid credentials.
    Unauthorized(String),
    /// Resource not found error.
    NotFound(String),
    /// Entity already exists; carries the id of the existing record.
    Duplicate { message: String, existing_id: Uuid },
    /// Request rejected by the rate limiter.
    RateLimited { retry_after_secs: u64 },
    /// Error interacting with an external service. `detail` is logged, never returned.
    ExternalService { service: String, detail: String },
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Shorthand for a validation error on a single field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Validation {
            message: format!("Invalid field '{}'", field),
            details: vec![FieldError::new(field, message)],
        }
    }

    /// Shorthand for a validation error without field detail.
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// The error with all context wrappers removed.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Message safe to hand back to a caller. Driver and upstream detail is
    /// left out; use `Display` for logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation { message, details } => {
                let mut out = message.clone();
                for d in details {
                    out.push_str(&format!("; {}: {}", d.field, d.message));
                }
                out
            }
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Duplicate { message, .. } => message.clone(),
            AppError::RateLimited { .. } => "Too many requests".to_string(),
            AppError::ExternalService { service, .. } => {
                format!("communication failure with {}", service)
            }
            AppError::DatabaseError(e) => map_database_error(e).1.to_string(),
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::WithContext { source, .. } => source.public_message(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate { .. } => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(e) => map_database_error(e).0,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

/// Maps a database error onto a fixed status/message pair.
///
/// The underlying driver message never leaves the process; only the mapped
/// message is shown to callers.
pub fn map_database_error(err: &sqlx::Error) -> (StatusCode, &'static str) {
    if let sqlx::Error::RowNotFound = err {
        return (StatusCode::NOT_FOUND, "record not found");
    }

    let code = err
        .as_database_error()
        .and_then(|db| db.code().map(|c| c.into_owned()));

    match code.as_deref() {
        Some("23505") => (StatusCode::CONFLICT, "duplicate record"),
        Some("23503") => (StatusCode::BAD_REQUEST, "referenced record not found"),
        Some("23502") => (StatusCode::BAD_REQUEST, "required field missing"),
        Some("23514") => (StatusCode::BAD_REQUEST, "check constraint violated"),
        Some("22001") => (StatusCode::BAD_REQUEST, "value too long"),
        Some("42501") => (StatusCode::FORBIDDEN, "permission denied"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "database error"),
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation { message, details } => {
                write!(f, "Validation error: {}", message)?;
                for d in details {
                    write!(f, "; {}: {}", d.field, d.message)?;
                }
                Ok(())
            }
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Duplicate {
                message,
                existing_id,
            } => write!(f, "Duplicate: {} (existing id {})", message, existing_id),
            AppError::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited: retry after {}s", retry_after_secs)
            }
            AppError::ExternalService { service, detail } => {
                write!(f, "External service error ({}): {}", service, detail)
            }
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            AppError::Validation { message, details } => {
                tracing::debug!("Validation error: {} ({} field errors)", message, details.len());
                (
                    status,
                    Json(json!({
                        "error": message,
                        "details": details,
                    })),
                )
                    .into_response()
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (status, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            AppError::NotFound(msg) => (status, Json(json!({ "error": msg }))).into_response(),
            AppError::Duplicate {
                message,
                existing_id,
            } => (
                status,
                Json(json!({
                    "error": message,
                    "existing_lead_id": existing_id,
                })),
            )
                .into_response(),
            AppError::RateLimited { retry_after_secs } => {
                let mut response = (
                    status,
                    Json(json!({
                        "error": "Too many requests",
                        "retry_after": retry_after_secs,
                    })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            AppError::ExternalService { service, detail } => {
                tracing::error!("External service error ({}): {}", service, detail);
                (
                    status,
                    Json(json!({
                        "error": format!("communication failure with {}", service),
                    })),
                )
                    .into_response()
            }
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                let (_, message) = map_database_error(&e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (status, Json(json!({ "error": "Internal server error" }))).into_response()
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                (*source).into_response()
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalService {
            service: "HTTP client".to_string(),
            detail: err.to_string(),
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
