//! Resident presence records. Append-only: no entry is ever updated or
//! deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::subject::{TenantId, UserId};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
  Entry,
  Exit,
}

/// How the resident was identified.
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
pub enum AccessMethod {
  #[default]
  DigitalId,
  AccessCode,
  Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
  pub id:         i64,
  pub tenant_id:  TenantId,
  pub subject_id: UserId,
  pub direction:  Direction,
  pub method:     AccessMethod,
  /// The guard who logged the entry.
  pub guard_id:   Option<UserId>,
  pub timestamp:  DateTime<Utc>,
}

/// Input to [`crate::store::GateStore::append_access_log`]. The timestamp is
/// always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAccessLogEntry {
  pub tenant_id:  TenantId,
  pub subject_id: UserId,
  pub direction:  Direction,
  pub method:     AccessMethod,
  pub guard_id:   Option<UserId>,
}
