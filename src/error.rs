use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not signed in")]
    Unauthorized,

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Superseded by a later sign-in or sign-out")]
    Superseded,

    #[error("Internal server error")]
    InternalServerError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    AccountExists,

    #[error("Password is too weak")]
    WeakPassword,

    #[error("Authentication rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Remote(e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Not signed in".to_string()),
            AppError::Auth(e) => {
                let status = match e {
                    AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                    AuthError::AccountExists => StatusCode::CONFLICT,
                    AuthError::WeakPassword => StatusCode::UNPROCESSABLE_ENTITY,
                    AuthError::Rejected(_) => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string())
            }
            AppError::Remote(msg) => {
                error!("remote store error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Remote store error occurred".to_string())
            }
            AppError::Database(e) => {
                error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::Migration(e) => {
                error!("migration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::SessionClosed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Session is closed".to_string(),
            ),
            AppError::Superseded => (
                StatusCode::CONFLICT,
                "Superseded by a later sign-in or sign-out".to_string(),
            ),
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: error_message,
        });

        (status, body).into_response()
    }
}
