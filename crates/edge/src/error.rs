//! Unified error handling with Sentry integration.
//!
//! Control handlers return `Result<T, AppError>`. Server-side failures are
//! captured to Sentry before the response is built; clients only ever see a
//! generic message for them.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use eatech_core::MutationError;
use eatech_core::push::PushError;

use crate::db::RepositoryError;
use crate::lifecycle::LifecycleError;
use crate::net::FetchError;
use crate::sync::SyncError;

/// Application-level error type for the edge control surface.
#[derive(Debug, Error)]
pub enum AppError {
    /// Queue store operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Drain or submission failed.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Install or activation failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Push payload rejected.
    #[error("Push error: {0}")]
    Push(#[from] PushError),

    /// Mutation payload rejected.
    #[error("Invalid payload: {0}")]
    Mutation(#[from] MutationError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(RepositoryError::Duplicate(_))
            | Self::Sync(SyncError::Repository(RepositoryError::Duplicate(_)))
            | Self::Lifecycle(LifecycleError::IllegalTransition { .. }) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Sync(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Lifecycle(LifecycleError::Precache { .. }) => StatusCode::BAD_GATEWAY,
            Self::Push(_) | Self::Mutation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<FetchError> for AppError {
    fn from(e: FetchError) -> Self {
        Self::Sync(SyncError::Fetch(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(RepositoryError::Duplicate(_))
            | Self::Sync(SyncError::Repository(RepositoryError::Duplicate(_))) => {
                "An entry with this ID is already queued".to_string()
            }
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Sync(SyncError::Fetch(_)) => "Upstream unreachable".to_string(),
            Self::Sync(_) => "Sync failed".to_string(),
            Self::Lifecycle(LifecycleError::Precache { .. }) => "Install failed".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for edge events.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of events
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
