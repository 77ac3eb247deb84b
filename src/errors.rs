use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

// --- Domain/Infrastructure Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Object address '{0}' has no scheme separator (expected scheme://bucket/path)")]
    MissingScheme(String),
    #[error("Object address '{0}' has an invalid scheme")]
    InvalidScheme(String),
    #[error("Object address '{0}' has no bucket")]
    MissingBucket(String),
    #[error("Object address '{0}' has no object path")]
    MissingPath(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object {address} cannot be handled by the '{backend}' storage backend")]
    SchemeMismatch { address: String, backend: String },

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Object upload failed: {0}")]
    UploadFailed(String),

    #[error("Object read failed: {0}")]
    ReadFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    BackendError(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Post not found with ID: {0}")]
    NotFound(Uuid),

    #[error("Post already exists with ID: {0}")]
    AlreadyExists(Uuid),

    #[error("Stored post data is corrupt: {0}")]
    DataCorruption(String),

    #[error("Database backend error: {0}")]
    BackendError(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid render dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

// --- Pipeline Errors ---

/// Coarse classification used for logging and status mapping.
///
/// `Decode` is kept apart from `BackendUnavailable` so "bad data" and
/// "infrastructure down" never share a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedInput,
    NotFound,
    BackendUnavailable,
    Decode,
    Internal,
}

#[derive(Error, Debug)]
pub enum PostError {
    #[error("Invalid post ID format: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("Content type '{0}' is not an allowed image format")]
    UnsupportedContentType(String),

    #[error("Image data cannot be empty")]
    EmptyImage,

    #[error("Post {post_id} has an unusable image location")]
    InvalidAddress {
        post_id: Uuid,
        #[source]
        source: AddressError,
    },

    #[error("Post not found with ID: {0}")]
    NotFound(Uuid),

    #[error("Could not perform object storage operation")]
    Storage(#[source] StorageError),

    #[error("Could not access post metadata")]
    Repository(#[source] RepoError),

    #[error("Could not record vote for post {post_id}")]
    Vote {
        post_id: Uuid,
        #[source]
        source: RepoError,
    },

    #[error("Could not render image for post {post_id}")]
    Render {
        post_id: Uuid,
        #[source]
        source: RenderError,
    },

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

impl PostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PostError::InvalidId(_)
            | PostError::UnsupportedContentType(_)
            | PostError::EmptyImage
            | PostError::InvalidAddress { .. } => ErrorKind::MalformedInput,
            PostError::NotFound(_) => ErrorKind::NotFound,
            PostError::Storage(e) => match e {
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::SchemeMismatch { .. } | StorageError::InvalidPath(_) => {
                    ErrorKind::MalformedInput
                }
                _ => ErrorKind::BackendUnavailable,
            },
            PostError::Repository(e) | PostError::Vote { source: e, .. } => match e {
                RepoError::NotFound(_) => ErrorKind::NotFound,
                RepoError::DataCorruption(_) => ErrorKind::Internal,
                _ => ErrorKind::BackendUnavailable,
            },
            PostError::Render { source, .. } => match source {
                RenderError::Decode(_) => ErrorKind::Decode,
                RenderError::InvalidDimensions { .. } => ErrorKind::Internal,
            },
            PostError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<RepoError> for PostError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(id) => PostError::NotFound(id),
            e => PostError::Repository(e),
        }
    }
}

impl From<StorageError> for PostError {
    fn from(err: StorageError) -> Self {
        PostError::Storage(err)
    }
}

// --- Web Layer Error ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing form field: {0}")]
    MissingFormField(String),
    #[error("Error processing multipart form data: {0}")]
    MultipartError(#[from] axum::extract::multipart::MultipartError),

    #[error(transparent)]
    Post(#[from] PostError),

    // Configuration / Startup errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<aws_smithy_types::error::operation::BuildError> for AppError {
    fn from(err: aws_smithy_types::error::operation::BuildError) -> Self {
        AppError::InitError(format!("Failed to build AWS request: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(format!("IO error: {}", err))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_)
            | AppError::MissingFormField(_)
            | AppError::MultipartError(_) => StatusCode::BAD_REQUEST,
            AppError::Post(e) => match e {
                PostError::InvalidId(_)
                | PostError::UnsupportedContentType(_)
                | PostError::EmptyImage => StatusCode::BAD_REQUEST,
                PostError::NotFound(_) => StatusCode::NOT_FOUND,
                // Vote failures, including a missing post, are server errors.
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::ConfigError(_) | AppError::InitError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// --- Axum Response Implementation ---

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = if status.is_server_error() {
            match &self {
                AppError::Post(e) => {
                    tracing::error!(error.source = ?e, error.kind = ?e.kind(), "Pipeline error occurred");
                    match e.kind() {
                        ErrorKind::Decode => "Stored image could not be decoded".to_string(),
                        ErrorKind::BackendUnavailable => {
                            "A storage backend is unavailable".to_string()
                        }
                        _ => "server error".to_string(),
                    }
                }
                other => {
                    tracing::error!(error.detail = %other, "Internal error occurred");
                    "An internal server error occurred".to_string()
                }
            }
        } else {
            self.to_string()
        };

        tracing::warn!(error.message = %error_message, error.status = %status, "Responding with error");

        let body = Json(serde_json::json!({ "error": error_message }));
        (status, body).into_response()
    }
}
