//! The `GateStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `gatehouse-store-sqlite`).
//! The services in this crate and the HTTP layer depend on this abstraction,
//! not on any concrete backend.
//!
//! Guarded writes (`transition_visit`, `begin_shift`, `set_alert_status`) must
//! be applied as a single conditional write: when two operators race, exactly
//! one sees `Some` and the other sees `None`.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  access_log::{AccessLogEntry, NewAccessLogEntry},
  alert::{AlertEvent, AlertId, AlertStatus, NewAlert},
  session::Session,
  subject::{
    NewStaffMember, ResidentAccessSubject, Role, StaffId, StaffMember, TenantId,
    UserId,
  },
  visit::{NewVisitor, Visit, VisitId, VisitTransition},
};

// ─── Query / input types ─────────────────────────────────────────────────────

/// A user record as provisioned by the identity system.
#[derive(Debug, Clone)]
pub struct NewUser {
  pub full_name:     String,
  pub role:          Role,
  pub house_address: Option<String>,
}

/// Parameters for [`GateStore::list_alerts`].
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
  pub tenant_id:   TenantId,
  pub status:      Option<AlertStatus>,
  /// Restrict to one reporter (residents only see their own alerts).
  pub reporter_id: Option<UserId>,
  /// Defaults to a backend cap, except for `status = open`, which returns
  /// every open alert.
  pub limit:       Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a gatehouse storage backend.
///
/// Lookups by id or code are not tenant-filtered: callers compare the tenant
/// of what comes back so that a cross-tenant hit is rejected, not hidden.
pub trait GateStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Sessions and users ──────────────────────────────────────────────────

  /// Look a session up by the hex SHA-256 digest of its bearer token.
  fn find_session(
    &self,
    token_digest: String,
  ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send + '_;

  /// Record a session issued by the identity system.
  fn insert_session(
    &self,
    token_digest: String,
    session: Session,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn insert_user(
    &self,
    tenant_id: TenantId,
    user: NewUser,
  ) -> impl Future<Output = Result<ResidentAccessSubject, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<ResidentAccessSubject>, Self::Error>> + Send + '_;

  /// Store (or clear) the device push token. Returns `false` if the user does
  /// not exist.
  fn set_push_token(
    &self,
    user_id: UserId,
    push_token: Option<String>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Visits ──────────────────────────────────────────────────────────────

  /// Register a visitor pass in `pending` with a freshly generated access
  /// code.
  fn register_visitor(
    &self,
    tenant_id: TenantId,
    host_id: UserId,
    visitor: NewVisitor,
  ) -> impl Future<Output = Result<Visit, Self::Error>> + Send + '_;

  fn get_visit(
    &self,
    id: VisitId,
  ) -> impl Future<Output = Result<Option<Visit>, Self::Error>> + Send + '_;

  fn find_visit_by_code(
    &self,
    code: String,
  ) -> impl Future<Output = Result<Option<Visit>, Self::Error>> + Send + '_;

  /// Apply `change` if and only if the visit belongs to `tenant_id`, is in one
  /// of `change.action.sources()`, and (for actions that respect the deadline)
  /// `valid_until` is unset or later than `change.at`. Returns the updated
  /// visit, or `None` when the guard did not hold.
  fn transition_visit(
    &self,
    tenant_id: TenantId,
    id: VisitId,
    change: VisitTransition,
  ) -> impl Future<Output = Result<Option<Visit>, Self::Error>> + Send + '_;

  /// Persist the lazily-evaluated `expired` status. Only touches visits still
  /// awaiting arrival whose deadline is at or before `at`.
  fn expire_visit(
    &self,
    id: VisitId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Staff ───────────────────────────────────────────────────────────────

  fn insert_staff(
    &self,
    tenant_id: TenantId,
    staff: NewStaffMember,
  ) -> impl Future<Output = Result<StaffMember, Self::Error>> + Send + '_;

  fn get_staff(
    &self,
    id: StaffId,
  ) -> impl Future<Output = Result<Option<StaffMember>, Self::Error>> + Send + '_;

  fn find_staff_by_code(
    &self,
    code: String,
  ) -> impl Future<Output = Result<Option<StaffMember>, Self::Error>> + Send + '_;

  /// Open a shift already in `checked_in`, unless the staff member has one
  /// open. Returns `None` in that case.
  fn begin_shift(
    &self,
    tenant_id: TenantId,
    staff_id: StaffId,
    at: DateTime<Utc>,
    items_in: Option<String>,
  ) -> impl Future<Output = Result<Option<Visit>, Self::Error>> + Send + '_;

  /// The staff member's currently checked-in shift, if any.
  fn open_shift(
    &self,
    staff_id: StaffId,
  ) -> impl Future<Output = Result<Option<Visit>, Self::Error>> + Send + '_;

  // ── Access logs (append-only) ─────────────────────────────────────────────

  fn append_access_log(
    &self,
    entry: NewAccessLogEntry,
  ) -> impl Future<Output = Result<AccessLogEntry, Self::Error>> + Send + '_;

  /// Entries for one user within a tenant, newest first.
  fn list_access_logs(
    &self,
    tenant_id: TenantId,
    user_id: UserId,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AccessLogEntry>, Self::Error>> + Send + '_;

  // ── Alerts ──────────────────────────────────────────────────────────────

  fn insert_alert(
    &self,
    alert: NewAlert,
  ) -> impl Future<Output = Result<AlertEvent, Self::Error>> + Send + '_;

  fn get_alert(
    &self,
    id: AlertId,
  ) -> impl Future<Output = Result<Option<AlertEvent>, Self::Error>> + Send + '_;

  /// The newest `open` alert from `reporter_id` created at or after `since`.
  fn latest_open_alert(
    &self,
    tenant_id: TenantId,
    reporter_id: UserId,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<AlertEvent>, Self::Error>> + Send + '_;

  /// Alerts matching `query`, newest first.
  fn list_alerts(
    &self,
    query: AlertQuery,
  ) -> impl Future<Output = Result<Vec<AlertEvent>, Self::Error>> + Send + '_;

  /// Move an alert to `to` if it belongs to `tenant_id` and its current
  /// status is one of `to.sources()`. `None` when the guard did not hold.
  fn set_alert_status(
    &self,
    tenant_id: TenantId,
    id: AlertId,
    to: AlertStatus,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<AlertEvent>, Self::Error>> + Send + '_;
}
