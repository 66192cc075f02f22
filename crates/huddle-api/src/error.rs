use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use huddle_db::StoreError;
use huddle_types::api::ErrorBody;

const GENERIC_FAILURE: &str = "An error occurred while processing your request.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Store(e) => match e {
                StoreError::NotFound(_) | StoreError::TargetNotFound => StatusCode::NOT_FOUND,
                StoreError::Conflict(_) => StatusCode::CONFLICT,
                StoreError::Forbidden => StatusCode::FORBIDDEN,
                StoreError::NoEligibleSuccessor | StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                StoreError::Transient(_) | StoreError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log.
        let message = match &self {
            Self::Store(e) if e.is_transient() => {
                error!("Store failure: {}", e);
                GENERIC_FAILURE.to_string()
            }
            Self::Internal => GENERIC_FAILURE.to_string(),
            _ => self.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}
