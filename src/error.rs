//! Error taxonomy for collection and ingestion, and its HTTP mapping.
//!
//! Domain errors are plain `thiserror` enums; [`ApiError`] wraps them at the
//! route boundary and decides the status code and JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

// ---

/// Failures of the time series collector and the query builders behind it.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    // ---
    /// An entity name does not resolve to any known entity.
    #[error("unknown entity '{0}'")]
    NotFound(String),

    /// Inverted or malformed time/horizon bounds.
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// A filled span would hold more slots than the configured maximum.
    #[error("{slots} slots of {resolution} requested, at most {max} allowed")]
    SpanTooLarge {
        slots: i64,
        resolution: String,
        max: u32,
    },

    #[error("at least one entity name is required")]
    NoEntities,

    /// An entity kind without a query builder. Programming error.
    #[error("no query builder implemented for entity kind '{0}'")]
    NotImplemented(String),

    /// Backing store failure, passed through untouched.
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// Failures while validating or storing a measurement submission.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    // ---
    #[error("no connections given")]
    NoConnections,

    #[error("no values given for {0}")]
    NoValues(String),

    #[error("unsupported unit '{0}', expected MW")]
    InvalidUnit(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("unknown entity '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// Errors returned from HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // ---
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl ApiError {
    // ---
    /// Map an INSERT failure, turning unique violations into [`ApiError::Conflict`].
    pub fn from_insert(e: sqlx::Error, name: &str) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return ApiError::Conflict(format!("'{name}' already exists"));
            }
        }
        ApiError::Database(e)
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        // ---
        match self {
            ApiError::Collect(e) => match e {
                CollectError::NotFound(_) => (StatusCode::NOT_FOUND, "UNKNOWN_ENTITY"),
                CollectError::InvalidWindow(_) => (StatusCode::BAD_REQUEST, "INVALID_WINDOW"),
                CollectError::InvalidResolution(_)
                | CollectError::SpanTooLarge { .. }
                | CollectError::NoEntities => {
                    (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
                }
                CollectError::NotImplemented(_) | CollectError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR")
                }
            },
            ApiError::Ingest(e) => match e {
                IngestError::NotFound(_) => (StatusCode::NOT_FOUND, "UNKNOWN_ENTITY"),
                IngestError::InvalidUnit(_) => (StatusCode::BAD_REQUEST, "INVALID_UNIT"),
                IngestError::NoConnections
                | IngestError::NoValues(_)
                | IngestError::InvalidDuration(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                IngestError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (code, status) = self.classify();

        // Internals stay in the log, not in the response.
        let message = if code.is_server_error() {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            tracing::debug!("Request rejected ({}): {}", code, self);
            self.to_string()
        };

        (code, Json(ErrorBody { status, message })).into_response()
    }
}
