//! Bearer-token authentication.
//!
//! Sessions are issued by the identity system. The store only ever sees the
//! hex SHA-256 digest of a token, never the token itself.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use chrono::Utc;
use gatehouse_core::{Error as CoreError, session::Session, store::GateStore, subject::UserId};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{AppState, error::ApiError};

/// Hex SHA-256 of a bearer token, as stored in `sessions.token_digest`.
pub fn token_digest(token: &str) -> String { hex::encode(Sha256::digest(token.as_bytes())) }

/// Look a raw token up and reject unknown or expired sessions.
pub async fn authenticate<S: GateStore>(store: &S, token: &str) -> Result<Session, CoreError> {
  if token.is_empty() {
    return Err(CoreError::Unauthorized);
  }
  let session = store
    .find_session(token_digest(token))
    .await
    .map_err(CoreError::store)?
    .ok_or(CoreError::Unauthorized)?;
  if session.is_expired(Utc::now()) {
    debug!(user_id = session.user_id, "expired session presented");
    return Err(CoreError::Unauthorized);
  }
  Ok(session)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
  headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .map(str::trim)
}

/// The authenticated caller's session.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Session);

impl Authenticated {
  /// Guards and admins only.
  pub fn require_operator(&self) -> Result<(), ApiError> {
    if self.0.role.is_operator() {
      Ok(())
    } else {
      Err(ApiError::forbidden(format!("{} cannot operate the gate", self.0.role)))
    }
  }

  /// The caller themselves, or an operator.
  pub fn require_self_or_operator(&self, user_id: UserId) -> Result<(), ApiError> {
    if self.0.user_id == user_id {
      Ok(())
    } else {
      self.require_operator()
    }
  }
}

impl<S> FromRequestParts<AppState<S>> for Authenticated
where
  S: GateStore + Clone + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let token = bearer(&parts.headers).ok_or(CoreError::Unauthorized)?;
    let session = authenticate(state.store.as_ref(), token).await?;
    Ok(Authenticated(session))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digest_is_lowercase_hex_sha256() {
    assert_eq!(
      token_digest("abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn bearer_prefix_required() {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
    assert!(bearer(&headers).is_none());
    headers.insert(header::AUTHORIZATION, "Bearer tok-1".parse().unwrap());
    assert_eq!(bearer(&headers), Some("tok-1"));
  }
}
