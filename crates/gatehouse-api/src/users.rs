//! `PUT /users/{id}`: push token registration for out-of-band alerts.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use gatehouse_core::{Error as CoreError, store::GateStore, subject::{Role, UserId}};
use serde::Deserialize;
use tracing::info;

use crate::{AppState, auth::Authenticated, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
  /// `null` clears the token.
  pub push_token: Option<String>,
}

/// `PUT /users/{id}`. The user themselves or an admin.
pub async fn update<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(user_id): Path<UserId>,
  Json(body): Json<UpdateBody>,
) -> Result<StatusCode, ApiError>
where
  S: GateStore + Clone + 'static,
{
  if caller.0.user_id != user_id && caller.0.role != Role::Admin {
    return Err(ApiError::forbidden("only the user or an admin may update a user"));
  }

  let user = state
    .store
    .get_user(user_id)
    .await
    .map_err(CoreError::store)?
    .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;
  if user.tenant_id != caller.0.tenant_id {
    return Err(
      CoreError::CrossTenant { caller_tenant: caller.0.tenant_id, subject_tenant: user.tenant_id }
        .into(),
    );
  }

  state
    .store
    .set_push_token(user_id, body.push_token)
    .await
    .map_err(CoreError::store)?;
  info!(user_id, "push token updated");
  Ok(StatusCode::NO_CONTENT)
}
