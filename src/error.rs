use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::model::forest::ForestError;
use crate::store::Namespace;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no artifact '{key}' in {namespace}")]
    NotFound { namespace: Namespace, key: String },

    #[error("invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Failures that escape a stage so the dispatcher can redeliver the event.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("transform failed for '{key}': {reason}")]
    Transform { key: String, reason: String },

    #[error("training failed for '{key}': {reason}")]
    Training { key: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Prediction endpoint
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("model not trained yet: no artifact '{0}' in the model store")]
    ModelUnavailable(String),

    #[error("model artifact is unreadable: {0}")]
    ModelCorrupt(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("storage unavailable: {0}")]
    Storage(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ForestError> for ServeError {
    fn from(err: ForestError) -> Self {
        ServeError::Inference(err.to_string())
    }
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
