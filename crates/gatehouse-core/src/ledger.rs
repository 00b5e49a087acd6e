//! The visit ledger: guarded check-in, check-out and deny, staff shifts, and
//! the resident access log.
//!
//! Every transition is handed to the store as one conditional write. When the
//! write does not apply, the ledger re-reads the visit only to explain why;
//! it never retries.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
  Error, Result,
  access_log::{AccessLogEntry, AccessMethod, Direction, NewAccessLogEntry},
  store::GateStore,
  subject::{StaffId, StaffMember, StaffStatus, TenantId, UserId},
  visit::{
    CheckOutReceipt, ItemsReview, Visit, VisitAction, VisitId, VisitKind, VisitStatus,
    VisitTransition,
  },
};

pub struct VisitLedger<'a, S> {
  store: &'a S,
}

impl<'a, S: GateStore> VisitLedger<'a, S> {
  pub fn new(store: &'a S) -> Self { Self { store } }

  /// Read a visit as of now. A pass whose deadline has passed is written
  /// back as `expired` on the way out.
  pub async fn visit(&self, tenant_id: TenantId, id: VisitId) -> Result<Visit> {
    let now = Utc::now();
    let mut visit = self.load(tenant_id, id).await?;
    if visit.status != VisitStatus::Expired
      && visit.effective_status(now) == VisitStatus::Expired
    {
      self.store.expire_visit(id, now).await.map_err(Error::store)?;
      visit.status = VisitStatus::Expired;
    }
    Ok(visit)
  }

  // ── Visitor passes ──────────────────────────────────────────────────────

  pub async fn check_in(
    &self,
    tenant_id: TenantId,
    id: VisitId,
    items_in: Option<String>,
  ) -> Result<Visit> {
    self.apply(tenant_id, id, VisitKind::Visitor, VisitAction::CheckIn, items_in).await
  }

  /// Check out and return the advisory items comparison for the operator.
  pub async fn check_out(
    &self,
    tenant_id: TenantId,
    id: VisitId,
    items_out: Option<String>,
  ) -> Result<CheckOutReceipt> {
    let visit = self
      .apply(tenant_id, id, VisitKind::Visitor, VisitAction::CheckOut, items_out)
      .await?;
    Ok(receipt(visit))
  }

  pub async fn deny(&self, tenant_id: TenantId, id: VisitId) -> Result<Visit> {
    self.apply(tenant_id, id, VisitKind::Visitor, VisitAction::Deny, None).await
  }

  // ── Staff shifts ────────────────────────────────────────────────────────

  pub async fn clock_in(
    &self,
    tenant_id: TenantId,
    staff_id: StaffId,
    items_in: Option<String>,
  ) -> Result<Visit> {
    let staff = self.load_staff(tenant_id, staff_id).await?;
    if staff.status != StaffStatus::Active {
      warn!(staff_id, status = %staff.status, "refused clock-in");
      return Err(Error::Forbidden(format!("staff member {staff_id} is {}", staff.status)));
    }

    let shift = self
      .store
      .begin_shift(tenant_id, staff_id, Utc::now(), items_in)
      .await
      .map_err(Error::store)?
      .ok_or(Error::InvalidTransition {
        from:   VisitStatus::CheckedIn,
        action: VisitAction::CheckIn,
      })?;

    info!(tenant_id, staff_id, visit_id = shift.id, "staff clocked in");
    Ok(shift)
  }

  pub async fn clock_out(
    &self,
    tenant_id: TenantId,
    staff_id: StaffId,
    items_out: Option<String>,
  ) -> Result<CheckOutReceipt> {
    self.load_staff(tenant_id, staff_id).await?;
    let shift = self
      .store
      .open_shift(staff_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::InvalidTransition {
        from:   VisitStatus::CheckedOut,
        action: VisitAction::CheckOut,
      })?;
    let shift = self
      .apply(tenant_id, shift.id, VisitKind::Staff, VisitAction::CheckOut, items_out)
      .await?;
    Ok(receipt(shift))
  }

  // ── Residents ───────────────────────────────────────────────────────────

  /// Append an access log entry for a resident. Residents have no visit
  /// lifecycle, so this only checks that the subject exists in the tenant.
  pub async fn log_resident_access(
    &self,
    tenant_id: TenantId,
    subject_id: UserId,
    direction: Direction,
    method: AccessMethod,
    guard_id: Option<UserId>,
  ) -> Result<AccessLogEntry> {
    let resident = self
      .store
      .get_user(subject_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("user {subject_id}")))?;
    if resident.tenant_id != tenant_id {
      return Err(Error::CrossTenant {
        caller_tenant:  tenant_id,
        subject_tenant: resident.tenant_id,
      });
    }

    let entry = self
      .store
      .append_access_log(NewAccessLogEntry {
        tenant_id,
        subject_id,
        direction,
        method,
        guard_id,
      })
      .await
      .map_err(Error::store)?;

    info!(tenant_id, subject_id, direction = %direction, "resident access logged");
    Ok(entry)
  }

  // ── Internals ───────────────────────────────────────────────────────────

  async fn load(&self, tenant_id: TenantId, id: VisitId) -> Result<Visit> {
    let visit = self
      .store
      .get_visit(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("visit {id}")))?;
    if visit.tenant_id != tenant_id {
      return Err(Error::CrossTenant {
        caller_tenant:  tenant_id,
        subject_tenant: visit.tenant_id,
      });
    }
    Ok(visit)
  }

  async fn load_staff(&self, tenant_id: TenantId, staff_id: StaffId) -> Result<StaffMember> {
    let staff = self
      .store
      .get_staff(staff_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("staff member {staff_id}")))?;
    if staff.tenant_id != tenant_id {
      return Err(Error::CrossTenant {
        caller_tenant:  tenant_id,
        subject_tenant: staff.tenant_id,
      });
    }
    Ok(staff)
  }

  async fn apply(
    &self,
    tenant_id: TenantId,
    id: VisitId,
    kind: VisitKind,
    action: VisitAction,
    items: Option<String>,
  ) -> Result<Visit> {
    let at = Utc::now();
    let change = VisitTransition { kind, action, at, items };

    match self
      .store
      .transition_visit(tenant_id, id, change)
      .await
      .map_err(Error::store)?
    {
      Some(visit) => {
        info!(tenant_id, visit_id = id, status = %visit.status, "visit {action}");
        Ok(visit)
      }
      None => Err(self.explain_refusal(tenant_id, id, kind, action, at).await),
    }
  }

  /// Work out which guard failed. Deadline failures are reported as
  /// `Expired` whether or not the status has been written back yet. A visit
  /// of the other kind is reported as missing.
  async fn explain_refusal(
    &self,
    tenant_id: TenantId,
    id: VisitId,
    kind: VisitKind,
    action: VisitAction,
    at: DateTime<Utc>,
  ) -> Error {
    let visit = match self.load(tenant_id, id).await {
      Ok(v) => v,
      Err(e) => return e,
    };
    if visit.subject_kind != kind {
      warn!(tenant_id, visit_id = id, kind = %visit.subject_kind, "refused {action}: wrong kind");
      return Error::NotFound(format!("{kind} visit {id}"));
    }

    let effective = visit.effective_status(at);
    if action.respects_deadline() && effective == VisitStatus::Expired {
      if visit.status != VisitStatus::Expired
        && let Err(e) = self.store.expire_visit(id, at).await
      {
        warn!(visit_id = id, error = %e, "failed to persist expiry");
      }
      warn!(tenant_id, visit_id = id, "refused {action}: pass expired");
      return Error::Expired(id);
    }

    warn!(tenant_id, visit_id = id, from = %effective, "refused {action}");
    Error::InvalidTransition { from: effective, action }
  }
}

fn receipt(visit: Visit) -> CheckOutReceipt {
  let items = ItemsReview::compare(
    visit.allowed_items_out.as_deref(),
    visit.items_carried_out.as_deref(),
  );
  if items.matches == Some(false) {
    info!(visit_id = visit.id, "items carried out differ from the host's list");
  }
  CheckOutReceipt { visit, items }
}
