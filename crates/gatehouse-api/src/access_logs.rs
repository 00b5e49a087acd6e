//! Handlers for `/access-logs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/access-logs` | Operators. Body: `{"user_id":1,"direction":"entry","method":"digital_id"}` |
//! | `GET`  | `/access-logs/user/{id}` | Operators or the resident; newest first |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use gatehouse_core::{
  Error as CoreError,
  access_log::{AccessLogEntry, AccessMethod, Direction},
  ledger::VisitLedger,
  store::GateStore,
  subject::UserId,
};
use serde::Deserialize;

use crate::{AppState, auth::Authenticated, error::ApiError};

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct LogBody {
  pub user_id:   UserId,
  pub direction: Direction,
  #[serde(default)]
  pub method:    AccessMethod,
}

/// `POST /access-logs`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Json(body): Json<LogBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let entry = VisitLedger::new(state.store.as_ref())
    .log_resident_access(
      caller.0.tenant_id,
      body.user_id,
      body.direction,
      body.method,
      Some(caller.0.user_id),
    )
    .await?;
  Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub limit: Option<usize>,
}

/// `GET /access-logs/user/{id}[?limit=N]`
pub async fn list_for_user<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(user_id): Path<UserId>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<AccessLogEntry>>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_self_or_operator(user_id)?;
  let entries = state
    .store
    .list_access_logs(caller.0.tenant_id, user_id, params.limit.unwrap_or(DEFAULT_LIMIT))
    .await
    .map_err(CoreError::store)?;
  Ok(Json(entries))
}
