//! Handlers for `/visitors` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/visitors` | Any user; the caller is the host |
//! | `GET`  | `/visitors/by-code/{code}` | Operators |
//! | `GET`  | `/visitors/{id}` | Operators or the host |
//! | `POST` | `/visitors/{id}/check-in` | Body: `{"items_in": "..."}` |
//! | `POST` | `/visitors/{id}/check-out` | Body: `{"items_out": "..."}` |
//! | `POST` | `/visitors/{id}/deny` | |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use gatehouse_core::{
  Error as CoreError,
  ledger::VisitLedger,
  resolver::CredentialResolver,
  store::GateStore,
  visit::{CheckOutReceipt, NewVisitor, Visit, VisitId},
};
use serde::Deserialize;
use tracing::info;

use crate::{AppState, auth::Authenticated, error::ApiError};

// ─── Register ─────────────────────────────────────────────────────────────────

/// `POST /visitors`
pub async fn register<S>(
  State(state): State<AppState<S>>,
  Authenticated(session): Authenticated,
  Json(body): Json<NewVisitor>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GateStore + Clone + 'static,
{
  if body.full_name.trim().is_empty() {
    return Err(ApiError::BadRequest("full_name is required".into()));
  }
  if let (Some(arrival), Some(deadline)) = (body.expected_arrival, body.valid_until)
    && deadline < arrival
  {
    return Err(ApiError::BadRequest("valid_until is before expected_arrival".into()));
  }

  let visit = state
    .store
    .register_visitor(session.tenant_id, session.user_id, body)
    .await
    .map_err(CoreError::store)?;
  info!(tenant_id = session.tenant_id, visit_id = visit.id, host_id = session.user_id, "visitor registered");
  Ok((StatusCode::CREATED, Json(visit)))
}

// ─── Lookups ──────────────────────────────────────────────────────────────────

/// `GET /visitors/by-code/{code}`
pub async fn by_code<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(code): Path<String>,
) -> Result<Json<Visit>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let visit = CredentialResolver::new(state.store.as_ref())
    .visitor_by_code(&code, caller.0.tenant_id)
    .await?;
  Ok(Json(visit))
}

/// `GET /visitors/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<VisitId>,
) -> Result<Json<Visit>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  let visit = VisitLedger::new(state.store.as_ref()).visit(caller.0.tenant_id, id).await?;
  let host_id = visit.visitor.as_ref().map(|v| v.host_id);
  if host_id != Some(caller.0.user_id) {
    caller.require_operator()?;
  }
  Ok(Json(visit))
}

// ─── Transitions ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CheckInBody {
  #[serde(default)]
  pub items_in: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckOutBody {
  #[serde(default)]
  pub items_out: Option<String>,
}

/// `POST /visitors/{id}/check-in`
pub async fn check_in<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<VisitId>,
  Json(body): Json<CheckInBody>,
) -> Result<Json<Visit>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let visit = VisitLedger::new(state.store.as_ref())
    .check_in(caller.0.tenant_id, id, body.items_in)
    .await?;
  Ok(Json(visit))
}

/// `POST /visitors/{id}/check-out`
pub async fn check_out<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<VisitId>,
  Json(body): Json<CheckOutBody>,
) -> Result<Json<CheckOutReceipt>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let receipt = VisitLedger::new(state.store.as_ref())
    .check_out(caller.0.tenant_id, id, body.items_out)
    .await?;
  Ok(Json(receipt))
}

/// `POST /visitors/{id}/deny`
pub async fn deny<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<VisitId>,
) -> Result<Json<Visit>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let visit = VisitLedger::new(state.store.as_ref()).deny(caller.0.tenant_id, id).await?;
  Ok(Json(visit))
}
