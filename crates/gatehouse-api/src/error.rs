//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error body is `{"error": "<message>", "code": "<code>"}`. The code is
//! stable and lets the operator UI pick a remediation message.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use gatehouse_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("bad request: {0}")]
  BadRequest(String),
}

impl ApiError {
  pub fn forbidden(reason: impl Into<String>) -> Self {
    Self::Core(CoreError::Forbidden(reason.into()))
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::Core(e) => match e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Malformed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::CrossTenant { .. } | CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::InvalidTransition { .. }
        | CoreError::InvalidAlertTransition { .. }
        | CoreError::Expired(_) => StatusCode::CONFLICT,
        CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
        CoreError::ChannelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      Self::BadRequest(_) => "bad_request",
      Self::Core(e) => e.code(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    }
    let body = json!({ "error": self.to_string(), "code": self.code() });
    (status, Json(body)).into_response()
  }
}
