//! Errors from the client library, with the remediation shown to operators.

use thiserror::Error;

/// Failure talking to the gatehouse server.
#[derive(Debug, Error)]
pub enum ClientError {
  /// 401 from the API: the session token is missing, unknown or expired.
  #[error("session rejected by the server")]
  Unauthorized,

  /// Any other non-success response. `code` is the server's stable error code.
  #[error("{message} (HTTP {status}, {code})")]
  Api {
    status:  u16,
    code:    String,
    message: String,
  },

  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("websocket error: {0}")]
  WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

  #[error("invalid server url: {0}")]
  Url(#[from] url::ParseError),

  #[error("unsupported url scheme {0:?}; expected http or https")]
  Scheme(String),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

impl ClientError {
  /// The server's error code, or a local one for transport failures.
  pub fn code(&self) -> &str {
    match self {
      Self::Unauthorized => "unauthorized",
      Self::Api { code, .. } => code,
      Self::Http(_) | Self::WebSocket(_) => "unavailable",
      Self::Url(_) | Self::Scheme(_) => "configuration",
    }
  }

  /// What the operator should do next.
  pub fn remediation(&self) -> &'static str {
    match self.code() {
      "unauthorized" => "Sign in again.",
      "expired" => "Token Expired. Ask the host to issue a new pass.",
      "invalid_transition" => "Already processed. Refresh before retrying.",
      "not_found" => "Unknown credential. Check the code and try again.",
      "cross_tenant" => "This credential belongs to another estate.",
      "malformed" => "Unreadable credential. Scan again or type the code.",
      "forbidden" => "Your account is not allowed to do this.",
      "unavailable" => "Server unreachable. Check the connection.",
      _ => "Request failed.",
    }
  }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
  fn from(e: tokio_tungstenite::tungstenite::Error) -> Self { Self::WebSocket(Box::new(e)) }
}
