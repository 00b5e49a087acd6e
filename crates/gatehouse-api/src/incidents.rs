//! Handlers for `/incidents` endpoints.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `POST`  | `/incidents/sos` | Anyone. Body: `{"location": "...", "description": "..."}` |
//! | `GET`   | `/incidents` | `?status=open` is the poll backstop; residents see their own |
//! | `GET`   | `/incidents/{id}` | Operators or the reporter |
//! | `PATCH` | `/incidents/{id}/status` | Operators. Body: `{"status": "acknowledged"}` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use gatehouse_core::{
  alert::{AlertEvent, AlertId, AlertStatus},
  dispatcher::{AlertDispatcher, SosReport},
  store::{AlertQuery, GateStore},
};
use serde::Deserialize;

use crate::{AppState, auth::Authenticated, error::ApiError, hub::AlertHub};

fn dispatcher<S: GateStore + Clone + 'static>(state: &AppState<S>) -> AlertDispatcher<'_, S, AlertHub> {
  AlertDispatcher::new(state.store.as_ref(), state.hub.as_ref())
    .with_dedup_window(state.options.sos_dedup_window)
}

// ─── SOS ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SosBody {
  #[serde(default)]
  pub location:    Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}

/// `POST /incidents/sos`. Returns 201 with a [`gatehouse_core::alert::TriggerOutcome`],
/// or 200 when the press was collapsed into an open alert.
pub async fn sos<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Json(body): Json<SosBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GateStore + Clone + 'static,
{
  let report = SosReport { location: body.location, description: body.description };
  let outcome = dispatcher(&state)
    .trigger(caller.0.tenant_id, caller.0.user_id, report)
    .await?;
  let status = if outcome.deduplicated { StatusCode::OK } else { StatusCode::CREATED };
  Ok((status, Json(outcome)))
}

// ─── Reads ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<AlertStatus>,
  pub limit:  Option<usize>,
}

/// `GET /incidents[?status=open&limit=N]`, newest first.
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<AlertEvent>>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  let reporter_id = (!caller.0.role.is_operator()).then_some(caller.0.user_id);
  let alerts = dispatcher(&state)
    .list(AlertQuery {
      tenant_id: caller.0.tenant_id,
      status: params.status,
      reporter_id,
      limit: params.limit,
    })
    .await?;
  Ok(Json(alerts))
}

/// `GET /incidents/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<AlertId>,
) -> Result<Json<AlertEvent>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  let alert = dispatcher(&state).alert(caller.0.tenant_id, id).await?;
  if alert.reporter_id != caller.0.user_id {
    caller.require_operator()?;
  }
  Ok(Json(alert))
}

// ─── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusBody {
  pub status: AlertStatus,
}

/// `PATCH /incidents/{id}/status`
pub async fn set_status<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Path(id): Path<AlertId>,
  Json(body): Json<StatusBody>,
) -> Result<Json<AlertEvent>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let dispatcher = dispatcher(&state);
  let alert = match body.status {
    AlertStatus::Acknowledged => dispatcher.acknowledge(caller.0.tenant_id, id).await?,
    AlertStatus::Resolved => dispatcher.resolve(caller.0.tenant_id, id).await?,
    AlertStatus::FalseAlarm => dispatcher.mark_false_alarm(caller.0.tenant_id, id).await?,
    AlertStatus::Open => dispatcher.set_status(caller.0.tenant_id, id, AlertStatus::Open).await?,
  };
  Ok(Json(alert))
}
