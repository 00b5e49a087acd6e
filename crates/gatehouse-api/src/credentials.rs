//! `POST /credentials/resolve`: scanner and keypad input.

use axum::{Json, extract::State};
use gatehouse_core::{resolver::CredentialResolver, store::GateStore, subject::Subject};
use serde::Deserialize;
use tracing::info;

use crate::{AppState, auth::Authenticated, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  /// The raw scanned or typed text.
  pub credential: String,
}

/// `POST /credentials/resolve`. Body: `{"credential": "..."}`. Never changes
/// visit state.
pub async fn resolve<S>(
  State(state): State<AppState<S>>,
  caller: Authenticated,
  Json(body): Json<ResolveBody>,
) -> Result<Json<Subject>, ApiError>
where
  S: GateStore + Clone + 'static,
{
  caller.require_operator()?;
  let subject = CredentialResolver::new(state.store.as_ref())
    .with_max_payload_age(state.options.credential_max_age)
    .resolve(&body.credential, caller.0.tenant_id)
    .await?;
  info!(tenant_id = caller.0.tenant_id, guard_id = caller.0.user_id, "credential resolved");
  Ok(Json(subject))
}
