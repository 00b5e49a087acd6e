//! Credential resolution: turn a scanned or typed credential into exactly one
//! subject of the caller's tenant.
//!
//! Access codes are tried against visitor passes first and staff second; the
//! first match wins. Resolution is a pure read and never changes visit state.

use chrono::{Duration, Utc};
use tracing::debug;

use crate::{
  Error, Result,
  credential::{Credential, PayloadKind, StructuredPayload},
  store::GateStore,
  subject::{StaffMember, Subject, TenantId},
  visit::Visit,
};

pub struct CredentialResolver<'a, S> {
  store:           &'a S,
  /// Replay window for structured payloads; `None` accepts any timestamp.
  max_payload_age: Option<Duration>,
}

impl<'a, S: GateStore> CredentialResolver<'a, S> {
  pub fn new(store: &'a S) -> Self { Self { store, max_payload_age: None } }

  pub fn with_max_payload_age(mut self, max_age: Option<Duration>) -> Self {
    self.max_payload_age = max_age;
    self
  }

  /// Parse `input` and resolve it for a caller in `tenant_id`.
  pub async fn resolve(&self, input: &str, tenant_id: TenantId) -> Result<Subject> {
    let credential = Credential::parse(input)?;
    self.resolve_credential(credential, tenant_id).await
  }

  pub async fn resolve_credential(
    &self,
    credential: Credential,
    tenant_id: TenantId,
  ) -> Result<Subject> {
    let subject = match credential {
      Credential::Structured(payload) => self.resolve_payload(payload, tenant_id).await?,
      Credential::AccessCode(code) => self.resolve_code(code).await?,
    };

    ensure_same_tenant(tenant_id, subject.tenant_id())?;
    Ok(subject)
  }

  /// Look an access code up among visitor passes only.
  pub async fn visitor_by_code(&self, code: &str, tenant_id: TenantId) -> Result<Visit> {
    let code = code.trim();
    let mut visit = self
      .store
      .find_visit_by_code(code.to_owned())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("visitor code {code:?}")))?;
    ensure_same_tenant(tenant_id, visit.tenant_id)?;
    visit.status = visit.effective_status(Utc::now());
    Ok(visit)
  }

  /// Look an access code up among staff members only.
  pub async fn staff_by_code(&self, code: &str, tenant_id: TenantId) -> Result<StaffMember> {
    let code = code.trim();
    let staff = self
      .store
      .find_staff_by_code(code.to_owned())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("staff code {code:?}")))?;
    ensure_same_tenant(tenant_id, staff.tenant_id)?;
    Ok(staff)
  }

  async fn resolve_payload(
    &self,
    payload: StructuredPayload,
    tenant_id: TenantId,
  ) -> Result<Subject> {
    if let Some(max_age) = self.max_payload_age {
      payload.check_age(max_age, Utc::now())?;
    }
    // A payload minted for another estate is refused before any lookup.
    if let Some(claimed) = payload.tenant_id {
      ensure_same_tenant(tenant_id, claimed)?;
    }

    let id = payload.subject_id;
    debug!(kind = ?payload.kind, subject_id = id, tenant_id, "resolving structured payload");

    match payload.kind {
      PayloadKind::Resident => self
        .store
        .get_user(id)
        .await
        .map_err(Error::store)?
        .map(Subject::Resident)
        .ok_or_else(|| Error::NotFound(format!("resident {id}"))),
      PayloadKind::Visitor => self
        .store
        .get_visit(id)
        .await
        .map_err(Error::store)?
        .map(|mut visit| {
          visit.status = visit.effective_status(Utc::now());
          Subject::Visitor(visit)
        })
        .ok_or_else(|| Error::NotFound(format!("visitor pass {id}"))),
      PayloadKind::Staff => self
        .store
        .get_staff(id)
        .await
        .map_err(Error::store)?
        .map(Subject::Staff)
        .ok_or_else(|| Error::NotFound(format!("staff member {id}"))),
    }
  }

  async fn resolve_code(&self, code: String) -> Result<Subject> {
    if let Some(mut visit) = self
      .store
      .find_visit_by_code(code.clone())
      .await
      .map_err(Error::store)?
    {
      debug!(visit_id = visit.id, "access code matched a visitor pass");
      visit.status = visit.effective_status(Utc::now());
      return Ok(Subject::Visitor(visit));
    }

    if let Some(staff) = self
      .store
      .find_staff_by_code(code.clone())
      .await
      .map_err(Error::store)?
    {
      debug!(staff_id = staff.id, "access code matched a staff member");
      return Ok(Subject::Staff(staff));
    }

    Err(Error::NotFound(format!("access code {code:?}")))
  }
}

fn ensure_same_tenant(caller_tenant: TenantId, subject_tenant: TenantId) -> Result<()> {
  if caller_tenant == subject_tenant {
    Ok(())
  } else {
    Err(Error::CrossTenant { caller_tenant, subject_tenant })
  }
}
