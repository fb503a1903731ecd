use axum::response::{IntoResponse, Response};
use axum::Json;
use postbox_macros::HttpError;
use serde_json::json;

use crate::auth::AuthError;
use crate::campaigns::CampaignError;
use crate::store::StoreError;

/// Error returned by every HTTP handler.
///
/// The response body is `{code, message}`. Server errors are logged in full and only the
/// mapped message reaches the client.
#[derive(Debug, thiserror::Error, HttpError)]
pub enum Error {
    #[error("Unauthorized")]
    #[http_error(UNAUTHORIZED)]
    Unauthorized,

    #[error("{0} not found")]
    #[http_error(NOT_FOUND)]
    NotFound(&'static str),

    #[error("{0} already exists")]
    #[http_error(CONFLICT)]
    Conflict(&'static str),

    #[error("job is no longer pending")]
    #[http_error(CONFLICT)]
    NotCancellable,

    #[error("invalid request: {0}")]
    #[http_error(BAD_REQUEST)]
    Invalid(String),

    /// A trigger run failed before processing any job. The caller sees the cause.
    #[error("queue processing failed: {0}")]
    #[http_error(INTERNAL_SERVER_ERROR)]
    Processing(StoreError),

    #[error("store error: {0}")]
    #[http_error(INTERNAL_SERVER_ERROR, "an error occurred with the database")]
    Store(StoreError),

    #[error("Internal Server Error: {0:?}")]
    #[http_error(INTERNAL_SERVER_ERROR, "an internal server error occurred")]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type JsonResult<T> = Result<Json<T>>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Trace server errors since we don't return the detailed error in the response body
        if self.http_code().is_server_error() {
            tracing::error!("Error Status {}: {}", self.http_code(), self);
        }

        let body = Json(json!({
            "code": self.http_code().as_u16(),
            "message": self.http_message(),
        }));
        (self.http_code(), body).into_response()
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Error::NotFound(what),
            StoreError::Conflict(what) => Error::Conflict(what),
            other => Error::Store(other),
        }
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => Error::Unauthorized,
            other => Error::Anyhow(anyhow::Error::new(other)),
        }
    }
}

impl From<CampaignError> for Error {
    fn from(err: CampaignError) -> Self {
        match err {
            CampaignError::Invalid(msg) => Error::Invalid(msg),
            other => Error::Anyhow(anyhow::Error::new(other)),
        }
    }
}
