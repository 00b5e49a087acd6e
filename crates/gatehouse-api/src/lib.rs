//! JSON REST API and realtime channel for the gatehouse.
//!
//! Exposes an axum [`Router`] backed by any [`GateStore`]. Every route but
//! `/ws` authenticates with `Authorization: Bearer <token>`; `/ws` takes the
//! token as a query parameter. TLS and request tracing are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let state = AppState::new(store, ApiOptions::default());
//! let app = gatehouse_api::api_router(state);
//! ```

pub mod access_logs;
pub mod auth;
pub mod credentials;
pub mod error;
pub mod hub;
pub mod incidents;
pub mod staff;
pub mod users;
pub mod visitors;
pub mod ws;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, patch, post, put},
};
use chrono::Duration;
use gatehouse_core::store::GateStore;

pub use error::ApiError;
pub use hub::AlertHub;

// ─── Application state ────────────────────────────────────────────────────────

/// Behaviour switches that are off unless configured.
#[derive(Debug, Clone, Default)]
pub struct ApiOptions {
  /// Refuse structured credentials stamped longer ago than this.
  pub credential_max_age: Option<Duration>,
  /// Collapse repeated SOS presses from one reporter within this window.
  pub sos_dedup_window:   Option<Duration>,
}

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S> {
  pub store:   Arc<S>,
  pub hub:     Arc<AlertHub>,
  pub options: Arc<ApiOptions>,
}

impl<S> AppState<S> {
  pub fn new(store: S, options: ApiOptions) -> Self {
    Self {
      store:   Arc::new(store),
      hub:     Arc::new(AlertHub::new()),
      options: Arc::new(options),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: GateStore + Clone + 'static,
{
  Router::new()
    // Visitors
    .route("/visitors", post(visitors::register::<S>))
    .route("/visitors/by-code/{code}", get(visitors::by_code::<S>))
    .route("/visitors/{id}", get(visitors::get_one::<S>))
    .route("/visitors/{id}/check-in", post(visitors::check_in::<S>))
    .route("/visitors/{id}/check-out", post(visitors::check_out::<S>))
    .route("/visitors/{id}/deny", post(visitors::deny::<S>))
    // Staff
    .route("/staff/by-code/{code}", get(staff::by_code::<S>))
    .route("/staff/{id}", get(staff::get_one::<S>))
    .route("/staff/{id}/clock-in", post(staff::clock_in::<S>))
    .route("/staff/{id}/clock-out", post(staff::clock_out::<S>))
    // Credentials
    .route("/credentials/resolve", post(credentials::resolve::<S>))
    // Access logs
    .route("/access-logs", post(access_logs::create::<S>))
    .route("/access-logs/user/{id}", get(access_logs::list_for_user::<S>))
    // Incidents
    .route("/incidents", get(incidents::list::<S>))
    .route("/incidents/sos", post(incidents::sos::<S>))
    .route("/incidents/{id}", get(incidents::get_one::<S>))
    .route("/incidents/{id}/status", patch(incidents::set_status::<S>))
    // Users
    .route("/users/{id}", put(users::update::<S>))
    // Realtime
    .route("/ws", get(ws::upgrade::<S>))
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::Utc;
  use gatehouse_core::{
    realtime::{ChannelSubscription, ServerEvent},
    session::Session,
    store::NewUser,
    subject::{NewStaffMember, ResidentAccessSubject, Role, TenantId},
  };
  use gatehouse_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use super::*;
  use crate::auth::token_digest;

  struct Fixture {
    state:    AppState<SqliteStore>,
    guard:    ResidentAccessSubject,
    resident: ResidentAccessSubject,
  }

  async fn login(
    store: &SqliteStore,
    tenant_id: TenantId,
    role: Role,
    token: &str,
  ) -> ResidentAccessSubject {
    let user = store
      .insert_user(tenant_id, NewUser {
        full_name:     format!("{role} user"),
        role,
        house_address: Some("Block A, House 2".into()),
      })
      .await
      .unwrap();
    store
      .insert_session(token_digest(token), Session {
        user_id: user.id,
        tenant_id,
        role,
        expires_at: None,
      })
      .await
      .unwrap();
    user
  }

  async fn fixture_with(options: ApiOptions) -> Fixture {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let guard = login(&store, 1, Role::Guard, "guard-token").await;
    let resident = login(&store, 1, Role::Resident, "resident-token").await;
    login(&store, 2, Role::Guard, "other-estate-token").await;
    Fixture { state: AppState::new(store, options), guard, resident }
  }

  async fn fixture() -> Fixture { fixture_with(ApiOptions::default()).await }

  async fn call(
    state: &AppState<SqliteStore>,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
      builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };

    let resp = api_router(state.clone()).oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
  }

  async fn register(f: &Fixture, body: Value) -> Value {
    let (status, visit) =
      call(&f.state, "POST", "/visitors", Some("resident-token"), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    visit
  }

  // ── Authentication ──────────────────────────────────────────────────────────

  #[tokio::test]
  async fn missing_token_is_401() {
    let f = fixture().await;
    let (status, body) = call(&f.state, "GET", "/incidents", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
  }

  #[tokio::test]
  async fn unknown_token_is_401() {
    let f = fixture().await;
    let (status, _) = call(&f.state, "GET", "/incidents", Some("stolen"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn residents_cannot_operate_the_gate() {
    let f = fixture().await;
    let visit = register(&f, json!({"full_name": "Tunde", "phone_number": "0801"})).await;
    let uri = format!("/visitors/{}/check-in", visit["id"]);

    let (status, body) = call(&f.state, "POST", &uri, Some("resident-token"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
  }

  // ── Visitors ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn register_then_check_in_once() {
    let f = fixture().await;
    let visit = register(&f, json!({"full_name": "Tunde", "phone_number": "0801"})).await;
    assert_eq!(visit["status"], "pending");
    assert_eq!(visit["visitor"]["host_id"], f.resident.id);

    let code = visit["visitor"]["access_code"].as_str().unwrap();
    let (status, found) =
      call(&f.state, "GET", &format!("/visitors/by-code/{code}"), Some("guard-token"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], visit["id"]);

    let uri = format!("/visitors/{}/check-in", visit["id"]);
    let body = json!({"items_in": "toolbox"});
    let (status, checked_in) =
      call(&f.state, "POST", &uri, Some("guard-token"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checked_in["status"], "checked_in");
    assert_eq!(checked_in["items_carried_in"], "toolbox");

    let (status, err) = call(&f.state, "POST", &uri, Some("guard-token"), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "invalid_transition");
  }

  #[tokio::test]
  async fn lapsed_pass_check_in_is_expired() {
    let f = fixture().await;
    let yesterday = (Utc::now() - chrono::Duration::days(1)).to_rfc3339();
    let visit = register(
      &f,
      json!({"full_name": "Tunde", "phone_number": "0801", "valid_until": yesterday}),
    )
    .await;

    let uri = format!("/visitors/{}/check-in", visit["id"]);
    let (status, err) = call(&f.state, "POST", &uri, Some("guard-token"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "expired");
  }

  #[tokio::test]
  async fn check_out_surfaces_items_comparison() {
    let f = fixture().await;
    let visit = register(
      &f,
      json!({"full_name": "Tunde", "phone_number": "0801", "allowed_items_out": "Laptop, charger"}),
    )
    .await;
    let id = &visit["id"];
    call(&f.state, "POST", &format!("/visitors/{id}/check-in"), Some("guard-token"), Some(json!({}))).await;

    let (status, receipt) = call(
      &f.state,
      "POST",
      &format!("/visitors/{id}/check-out"),
      Some("guard-token"),
      Some(json!({"items_out": "laptop"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["visit"]["status"], "checked_out");
    assert_eq!(receipt["visit"]["items_carried_out"], "laptop");
    assert_eq!(receipt["items"]["matches"], false);
  }

  #[tokio::test]
  async fn other_estate_guard_sees_cross_tenant() {
    let f = fixture().await;
    let visit = register(&f, json!({"full_name": "Tunde", "phone_number": "0801"})).await;
    let uri = format!("/visitors/{}/deny", visit["id"]);

    let (status, err) = call(&f.state, "POST", &uri, Some("other-estate-token"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "cross_tenant");
  }

  // ── Credentials ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn resolve_digital_id() {
    let f = fixture().await;
    let payload = json!({"type": "digital_id", "userId": f.resident.id, "tenantId": 1}).to_string();

    let (status, subject) = call(
      &f.state,
      "POST",
      "/credentials/resolve",
      Some("guard-token"),
      Some(json!({"credential": payload})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(subject["kind"], "resident");
    assert_eq!(subject["subject"]["id"], f.resident.id);
  }

  #[tokio::test]
  async fn resolve_payload_for_other_tenant() {
    let f = fixture().await;
    let payload = json!({"type": "digital_id", "userId": 42, "tenantId": 5}).to_string();

    let (status, err) = call(
      &f.state,
      "POST",
      "/credentials/resolve",
      Some("guard-token"),
      Some(json!({"credential": payload})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "cross_tenant");
  }

  #[tokio::test]
  async fn resolve_malformed_payload() {
    let f = fixture().await;
    let (status, err) = call(
      &f.state,
      "POST",
      "/credentials/resolve",
      Some("guard-token"),
      Some(json!({"credential": r#"{"type":"digital_id"}"#})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "malformed");
  }

  // ── Staff ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn staff_clock_in_twice_conflicts() {
    let f = fixture().await;
    let staff = f
      .state
      .store
      .insert_staff(1, NewStaffMember { full_name: "Grace".into(), ..Default::default() })
      .await
      .unwrap();
    let uri = format!("/staff/{}/clock-in", staff.id);

    let (status, shift) = call(&f.state, "POST", &uri, Some("guard-token"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(shift["subject_kind"], "staff");

    let (status, _) = call(&f.state, "POST", &uri, Some("guard-token"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, receipt) = call(
      &f.state,
      "POST",
      &format!("/staff/{}/clock-out", staff.id),
      Some("guard-token"),
      Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["visit"]["id"], shift["id"]);
  }

  // ── Access logs ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn access_log_records_guard_and_defaults_method() {
    let f = fixture().await;
    let (status, entry) = call(
      &f.state,
      "POST",
      "/access-logs",
      Some("guard-token"),
      Some(json!({"user_id": f.resident.id, "direction": "entry"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["method"], "digital_id");
    assert_eq!(entry["guard_id"], f.guard.id);

    let uri = format!("/access-logs/user/{}", f.resident.id);
    let (status, entries) = call(&f.state, "GET", &uri, Some("resident-token"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries.as_array().unwrap().len(), 1);

    let uri = format!("/access-logs/user/{}", f.guard.id);
    let (status, _) = call(&f.state, "GET", &uri, Some("resident-token"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }

  // ── Incidents ───────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn sos_reaches_connected_guard_and_acknowledge_closes_it() {
    let f = fixture().await;
    let mut guard_channel =
      f.state.hub.attach(ChannelSubscription::new(f.guard.id, 1, Role::Guard));

    let (status, outcome) = call(
      &f.state,
      "POST",
      "/incidents/sos",
      Some("resident-token"),
      Some(json!({"description": "fire"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["alert"]["status"], "open");
    assert_eq!(outcome["alert"]["location"], "Block A, House 2");
    assert_eq!(outcome["delivered_to"], 1);

    let frame = guard_channel.try_recv().unwrap();
    let ServerEvent::PanicAlert { incident } = serde_json::from_str(&frame).unwrap() else {
      panic!("expected panic_alert");
    };
    assert_eq!(incident.description, "fire");

    let uri = format!("/incidents/{}/status", incident.id);
    let (status, acked) = call(
      &f.state,
      "PATCH",
      &uri,
      Some("guard-token"),
      Some(json!({"status": "acknowledged"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "acknowledged");

    let frame = guard_channel.try_recv().unwrap();
    assert!(matches!(
      serde_json::from_str(&frame).unwrap(),
      ServerEvent::AlertStatus { .. }
    ));

    let (_, open) = call(&f.state, "GET", "/incidents?status=open", Some("guard-token"), None).await;
    assert!(open.as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn residents_cannot_change_alert_status() {
    let f = fixture().await;
    let (_, outcome) =
      call(&f.state, "POST", "/incidents/sos", Some("resident-token"), Some(json!({}))).await;
    let uri = format!("/incidents/{}/status", outcome["alert"]["id"]);

    let (status, _) = call(
      &f.state,
      "PATCH",
      &uri,
      Some("resident-token"),
      Some(json!({"status": "resolved"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn reopening_an_alert_conflicts() {
    let f = fixture().await;
    let (_, outcome) =
      call(&f.state, "POST", "/incidents/sos", Some("resident-token"), Some(json!({}))).await;
    let uri = format!("/incidents/{}/status", outcome["alert"]["id"]);

    let (status, err) =
      call(&f.state, "PATCH", &uri, Some("guard-token"), Some(json!({"status": "open"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "invalid_transition");
  }

  #[tokio::test]
  async fn dedup_window_collapses_repeat_presses() {
    let f = fixture_with(ApiOptions {
      sos_dedup_window: Some(chrono::Duration::minutes(1)),
      ..Default::default()
    })
    .await;

    let (first, a) =
      call(&f.state, "POST", "/incidents/sos", Some("resident-token"), Some(json!({}))).await;
    let (second, b) =
      call(&f.state, "POST", "/incidents/sos", Some("resident-token"), Some(json!({}))).await;
    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(b["deduplicated"], true);
    assert_eq!(a["alert"]["id"], b["alert"]["id"]);
  }

  #[tokio::test]
  async fn residents_list_only_their_alerts() {
    let f = fixture().await;
    call(&f.state, "POST", "/incidents/sos", Some("guard-token"), Some(json!({}))).await;
    call(&f.state, "POST", "/incidents/sos", Some("resident-token"), Some(json!({}))).await;

    let (_, mine) = call(&f.state, "GET", "/incidents", Some("resident-token"), None).await;
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["reporter_id"], f.resident.id);

    let (_, all) = call(&f.state, "GET", "/incidents", Some("guard-token"), None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
  }

  // ── Users ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn push_token_only_for_self() {
    let f = fixture().await;
    let own = format!("/users/{}", f.resident.id);
    let (status, _) = call(
      &f.state,
      "PUT",
      &own,
      Some("resident-token"),
      Some(json!({"push_token": "device-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let other = format!("/users/{}", f.guard.id);
    let (status, _) = call(
      &f.state,
      "PUT",
      &other,
      Some("resident-token"),
      Some(json!({"push_token": "device-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }
}
