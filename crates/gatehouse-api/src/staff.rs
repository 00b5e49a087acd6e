//! Handlers for `/staff` endpoints. Operators only.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/staff/by-code/{code}` | |
//! | `GET`  | `/staff/{id}` | |
//! | `POST` | `/staff/{id}/clock-in` | Body: `{"items_in": "..."}`; opens a shift |
//! | `POST` | `/staff/{id}/clock-out` | Body: `{"items_out": "..."}`; closes the open shift |

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
  subject::{StaffId, StaffMember},
  visit::CheckOutReceipt,
};

use crate::{
  AppState,
  auth::Authenticated,
  error::ApiError,
  visitors::{CheckInBody, CheckOutBody},
};

/// `GET /staff/by-code/{code}`
pub async fn by_code<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(code): Path<String>,
) -> Result<Json<StaffMember>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let staff = CredentialResolver::new(state.store.as_ref())
    .staff_by_code(&code, caller.0.tenant_id)
    .await?;
  Ok(Json(staff))
}

/// `GET /staff/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<StaffId>,
) -> Result<Json<StaffMember>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let staff = state
    .store
    .get_staff(id)
    .await
    .map_err(CoreError::store)?
    .ok_or_else(|| CoreError::NotFound(format!("staff member {id}")))?;
  if staff.tenant_id != caller.0.tenant_id {
    return Err(
      CoreError::CrossTenant {
        caller_tenant:  caller.0.tenant_id,
        subject_tenant: staff.tenant_id,
      }
      .into(),
    );
  }
  Ok(Json(staff))
}

/// `POST /staff/{id}/clock-in`
pub async fn clock_in<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<StaffId>,
  Json(body): Json<CheckInBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let shift = VisitLedger::new(state.store.as_ref())
    .clock_in(caller.0.tenant_id, id, body.items_in)
    .await?;
  Ok((StatusCode::CREATED, Json(shift)))
}

/// `POST /staff/{id}/clock-out`
pub async fn clock_out<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<StaffId>,
  Json(body): Json<CheckOutBody>,
) -> Result<Json<CheckOutReceipt>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let receipt = VisitLedger::new(state.store.as_ref())
    .clock_out(caller.0.tenant_id, id, body.items_out)
    .await?;
  Ok(Json(receipt))
}
