/* src/server/adapter/axum/src/error.rs */

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use revive_core::ReviveError;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
  #[error("{}", payload_message(*limit, *received, *declared))]
  PayloadTooLarge {
    limit: u64,
    /// Declared content-length, when it was rejected up front.
    received: Option<u64>,
    /// Whether `limit` came from the request's content-length.
    declared: bool,
  },

  #[error(
    "Fatal error: Response body is locked. This can happen when the response was already read \
     (for example through 'response.json()' or 'response.text()')."
  )]
  ResponseBodyLocked,

  #[error("stream cancelled")]
  Cancelled,

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error(transparent)]
  Transport(#[from] std::io::Error),

  #[error(transparent)]
  Core(#[from] ReviveError),

  #[error("{0}")]
  Handler(String),
}

fn payload_message(limit: u64, received: Option<u64>, declared: bool) -> String {
  match (received, declared) {
    (Some(length), _) => {
      format!("Received content-length of {length}, but only accept up to {limit} bytes.")
    }
    (None, true) => format!("request body size exceeded 'content-length' of {limit}"),
    (None, false) => format!("request body size exceeded BODY_SIZE_LIMIT of {limit}"),
  }
}

impl AdapterError {
  pub fn code(&self) -> &'static str {
    match self {
      Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
      Self::ResponseBodyLocked => "RESPONSE_BODY_LOCKED",
      Self::Cancelled => "CANCELLED",
      Self::InvalidRequest(_) => "INVALID_REQUEST",
      Self::Transport(_) => "TRANSPORT_ERROR",
      Self::Core(e) => e.code(),
      Self::Handler(_) => "HANDLER_ERROR",
    }
  }

  pub fn status(&self) -> u16 {
    match self {
      Self::PayloadTooLarge { .. } => 413,
      Self::Cancelled | Self::InvalidRequest(_) => 400,
      Self::Core(e) => e.status(),
      _ => 500,
    }
  }
}

/// Newtype wrapper to implement `IntoResponse` for `AdapterError`.
pub struct AxumError(pub AdapterError);

impl IntoResponse for AxumError {
  fn into_response(self) -> Response {
    error_response(&self.0)
  }
}

impl From<AdapterError> for AxumError {
  fn from(err: AdapterError) -> Self {
    Self(err)
  }
}

impl From<ReviveError> for AxumError {
  fn from(err: ReviveError) -> Self {
    Self(AdapterError::Core(err))
  }
}

/// Error raised by the dev middleware before the request handler ran, handed
/// to the next layer through the request extensions.
#[derive(Debug, Clone)]
pub struct DevError(pub Arc<AdapterError>);

impl DevError {
  pub fn new(err: AdapterError) -> Self {
    Self(Arc::new(err))
  }
}

impl IntoResponse for DevError {
  fn into_response(self) -> Response {
    error_response(&self.0)
  }
}

pub(crate) fn error_response(err: &AdapterError) -> Response {
  let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
  let body = serde_json::json!({
    "ok": false,
    "error": {
      "code": err.code(),
      "message": err.to_string(),
      "transient": false,
    }
  });
  (status, axum::Json(body)).into_response()
}
