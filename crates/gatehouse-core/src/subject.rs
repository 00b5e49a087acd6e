//! Subjects that can present themselves at the gate.
//!
//! A credential resolves to exactly one of these. Visitors are represented by
//! their [`Visit`]; staff members and residents are read-only projections of
//! records provisioned elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::visit::Visit;

pub type TenantId = i64;
pub type UserId = i64;
pub type StaffId = i64;

/// The role attached to an authenticated user.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
  Resident,
  Guard,
  Admin,
}

impl Role {
  /// Guards and admins operate the gate and receive alerts.
  pub fn is_operator(self) -> bool { matches!(self, Self::Guard | Self::Admin) }
}

// ─── Residents ───────────────────────────────────────────────────────────────

/// What the gate sees of a resident presenting a digital ID. Presence is
/// recorded as an access log entry, not a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentAccessSubject {
  pub id:            UserId,
  pub full_name:     String,
  pub role:          Role,
  pub house_address: Option<String>,
  pub tenant_id:     TenantId,
}

// ─── Staff ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StaffType {
  #[default]
  Maid,
  Driver,
  Cook,
  Gardener,
  Nanny,
  Other,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StaffStatus {
  #[default]
  Active,
  Inactive,
  Blacklisted,
}

/// A domestic or community staff member. Each shift is a [`Visit`] with
/// `subject_kind = staff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
  pub id:           StaffId,
  pub tenant_id:    TenantId,
  pub full_name:    String,
  pub phone_number: String,
  pub staff_type:   StaffType,
  pub status:       StaffStatus,
  pub access_code:  String,
  /// `None` for community staff.
  pub employer_id:  Option<UserId>,
  pub created_at:   DateTime<Utc>,
}

/// Input to [`crate::store::GateStore::insert_staff`].
#[derive(Debug, Clone, Default)]
pub struct NewStaffMember {
  pub full_name:    String,
  pub phone_number: String,
  pub staff_type:   StaffType,
  pub status:       StaffStatus,
  pub employer_id:  Option<UserId>,
}

// ─── Resolution result ───────────────────────────────────────────────────────

/// The single subject a credential resolved to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subject", rename_all = "snake_case")]
pub enum Subject {
  Visitor(Visit),
  Staff(StaffMember),
  Resident(ResidentAccessSubject),
}

impl Subject {
  pub fn tenant_id(&self) -> TenantId {
    match self {
      Self::Visitor(v) => v.tenant_id,
      Self::Staff(s) => s.tenant_id,
      Self::Resident(r) => r.tenant_id,
    }
  }
}
