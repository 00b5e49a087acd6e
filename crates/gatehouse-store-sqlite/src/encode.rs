//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Enums are stored as their snake_case names. Timestamps are stored with
//! [`encode_dt`], which always produces the same width.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use gatehouse_core::{
  access_log::AccessLogEntry,
  alert::AlertEvent,
  session::Session,
  subject::{ResidentAccessSubject, StaffMember},
  visit::{Visit, VisitKind, VisitorPass},
};
use rusqlite::Row;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

fn decode_enum<T: FromStr>(column: &'static str, value: String) -> Result<T> {
  value.parse().map_err(|_| Error::Decode { column, value })
}

/// `status IN (...)` body for a fixed set of statuses. The names come from
/// the enum, never from user input.
pub fn sql_in_list<T: AsRef<str>>(values: &[T]) -> String {
  values
    .iter()
    .map(|v| format!("'{}'", v.as_ref()))
    .collect::<Vec<_>>()
    .join(", ")
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str = "id, full_name, role, house_address, tenant_id";

/// Raw values read directly from a `users` row.
pub struct RawUser {
  pub id:            i64,
  pub full_name:     String,
  pub role:          String,
  pub house_address: Option<String>,
  pub tenant_id:     i64,
}

impl RawUser {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      full_name:     row.get(1)?,
      role:          row.get(2)?,
      house_address: row.get(3)?,
      tenant_id:     row.get(4)?,
    })
  }

  pub fn into_user(self) -> Result<ResidentAccessSubject> {
    Ok(ResidentAccessSubject {
      id:            self.id,
      full_name:     self.full_name,
      role:          decode_enum("users.role", self.role)?,
      house_address: self.house_address,
      tenant_id:     self.tenant_id,
    })
  }
}

/// Raw values read from a `sessions` row.
pub struct RawSession {
  pub user_id:    i64,
  pub tenant_id:  i64,
  pub role:       String,
  pub expires_at: Option<String>,
}

impl RawSession {
  pub fn into_session(self) -> Result<Session> {
    Ok(Session {
      user_id:    self.user_id,
      tenant_id:  self.tenant_id,
      role:       decode_enum("sessions.role", self.role)?,
      expires_at: decode_opt_dt(self.expires_at)?,
    })
  }
}

pub const STAFF_COLUMNS: &str = "id, tenant_id, full_name, phone_number, staff_type, status, \
                                 access_code, employer_id, created_at";

/// Raw values read from a `staff` row.
pub struct RawStaff {
  pub id:           i64,
  pub tenant_id:    i64,
  pub full_name:    String,
  pub phone_number: String,
  pub staff_type:   String,
  pub status:       String,
  pub access_code:  String,
  pub employer_id:  Option<i64>,
  pub created_at:   String,
}

impl RawStaff {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      tenant_id:    row.get(1)?,
      full_name:    row.get(2)?,
      phone_number: row.get(3)?,
      staff_type:   row.get(4)?,
      status:       row.get(5)?,
      access_code:  row.get(6)?,
      employer_id:  row.get(7)?,
      created_at:   row.get(8)?,
    })
  }

  pub fn into_staff(self) -> Result<StaffMember> {
    Ok(StaffMember {
      id:           self.id,
      tenant_id:    self.tenant_id,
      full_name:    self.full_name,
      phone_number: self.phone_number,
      staff_type:   decode_enum("staff.staff_type", self.staff_type)?,
      status:       decode_enum("staff.status", self.status)?,
      access_code:  self.access_code,
      employer_id:  self.employer_id,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

pub const VISIT_COLUMNS: &str = "id, tenant_id, subject_kind, staff_id, status, expected_arrival, \
                                 valid_until, check_in_time, check_out_time, items_carried_in, \
                                 items_carried_out, allowed_items_out, full_name, phone_number, \
                                 vehicle_number, purpose, visitor_type, host_id, access_code, \
                                 created_at";

/// Raw values read from a `visits` row.
pub struct RawVisit {
  pub id:                i64,
  pub tenant_id:         i64,
  pub subject_kind:      String,
  pub staff_id:          Option<i64>,
  pub status:            String,
  pub expected_arrival:  Option<String>,
  pub valid_until:       Option<String>,
  pub check_in_time:     Option<String>,
  pub check_out_time:    Option<String>,
  pub items_carried_in:  Option<String>,
  pub items_carried_out: Option<String>,
  pub allowed_items_out: Option<String>,
  // visitor pass columns
  pub full_name:         Option<String>,
  pub phone_number:      Option<String>,
  pub vehicle_number:    Option<String>,
  pub purpose:           Option<String>,
  pub visitor_type:      Option<String>,
  pub host_id:           Option<i64>,
  pub access_code:       Option<String>,
  pub created_at:        String,
}

impl RawVisit {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      tenant_id:         row.get(1)?,
      subject_kind:      row.get(2)?,
      staff_id:          row.get(3)?,
      status:            row.get(4)?,
      expected_arrival:  row.get(5)?,
      valid_until:       row.get(6)?,
      check_in_time:     row.get(7)?,
      check_out_time:    row.get(8)?,
      items_carried_in:  row.get(9)?,
      items_carried_out: row.get(10)?,
      allowed_items_out: row.get(11)?,
      full_name:         row.get(12)?,
      phone_number:      row.get(13)?,
      vehicle_number:    row.get(14)?,
      purpose:           row.get(15)?,
      visitor_type:      row.get(16)?,
      host_id:           row.get(17)?,
      access_code:       row.get(18)?,
      created_at:        row.get(19)?,
    })
  }

  pub fn into_visit(self) -> Result<Visit> {
    let subject_kind: VisitKind = decode_enum("visits.subject_kind", self.subject_kind)?;

    let (subject_id, visitor) = match subject_kind {
      VisitKind::Staff => {
        let staff_id = self.staff_id.ok_or(Error::Decode {
          column: "visits.staff_id",
          value:  "NULL".into(),
        })?;
        (staff_id, None)
      }
      VisitKind::Visitor => {
        let (Some(full_name), Some(host_id), Some(access_code)) =
          (self.full_name, self.host_id, self.access_code)
        else {
          return Err(Error::Decode {
            column: "visits.full_name/host_id/access_code",
            value:  "NULL".into(),
          });
        };
        let visitor_type = match self.visitor_type {
          Some(t) => decode_enum("visits.visitor_type", t)?,
          None => Default::default(),
        };
        let pass = VisitorPass {
          full_name,
          phone_number: self.phone_number.unwrap_or_default(),
          vehicle_number: self.vehicle_number,
          purpose: self.purpose,
          visitor_type,
          host_id,
          access_code,
        };
        (self.id, Some(pass))
      }
    };

    Ok(Visit {
      id: self.id,
      tenant_id: self.tenant_id,
      subject_kind,
      subject_id,
      status: decode_enum("visits.status", self.status)?,
      expected_arrival: decode_opt_dt(self.expected_arrival)?,
      valid_until: decode_opt_dt(self.valid_until)?,
      check_in_time: decode_opt_dt(self.check_in_time)?,
      check_out_time: decode_opt_dt(self.check_out_time)?,
      items_carried_in: self.items_carried_in,
      items_carried_out: self.items_carried_out,
      allowed_items_out: self.allowed_items_out,
      visitor,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const ACCESS_LOG_COLUMNS: &str = "id, tenant_id, user_id, direction, method, guard_id, timestamp";

/// Raw values read from an `access_logs` row.
pub struct RawAccessLog {
  pub id:        i64,
  pub tenant_id: i64,
  pub user_id:   i64,
  pub direction: String,
  pub method:    String,
  pub guard_id:  Option<i64>,
  pub timestamp: String,
}

impl RawAccessLog {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:        row.get(0)?,
      tenant_id: row.get(1)?,
      user_id:   row.get(2)?,
      direction: row.get(3)?,
      method:    row.get(4)?,
      guard_id:  row.get(5)?,
      timestamp: row.get(6)?,
    })
  }

  pub fn into_entry(self) -> Result<AccessLogEntry> {
    Ok(AccessLogEntry {
      id:         self.id,
      tenant_id:  self.tenant_id,
      subject_id: self.user_id,
      direction:  decode_enum("access_logs.direction", self.direction)?,
      method:     decode_enum("access_logs.method", self.method)?,
      guard_id:   self.guard_id,
      timestamp:  decode_dt(&self.timestamp)?,
    })
  }
}

pub const ALERT_COLUMNS: &str = "id, tenant_id, reporter_id, reporter_name, title, location, \
                                 description, priority, status, created_at, updated_at";

/// Raw values read from an `alerts` row.
pub struct RawAlert {
  pub id:            i64,
  pub tenant_id:     i64,
  pub reporter_id:   i64,
  pub reporter_name: Option<String>,
  pub title:         String,
  pub location:      Option<String>,
  pub description:   String,
  pub priority:      String,
  pub status:        String,
  pub created_at:    String,
  pub updated_at:    Option<String>,
}

impl RawAlert {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      tenant_id:     row.get(1)?,
      reporter_id:   row.get(2)?,
      reporter_name: row.get(3)?,
      title:         row.get(4)?,
      location:      row.get(5)?,
      description:   row.get(6)?,
      priority:      row.get(7)?,
      status:        row.get(8)?,
      created_at:    row.get(9)?,
      updated_at:    row.get(10)?,
    })
  }

  pub fn into_alert(self) -> Result<AlertEvent> {
    Ok(AlertEvent {
      id:            self.id,
      tenant_id:     self.tenant_id,
      reporter_id:   self.reporter_id,
      reporter_name: self.reporter_name,
      title:         self.title,
      location:      self.location,
      description:   self.description,
      priority:      decode_enum("alerts.priority", self.priority)?,
      status:        decode_enum("alerts.status", self.status)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_opt_dt(self.updated_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_strings() {
    let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    let later = earlier + chrono::Duration::milliseconds(1);
    let (a, b) = (encode_dt(earlier), encode_dt(later));
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(decode_dt(&a).unwrap(), earlier);
  }

  #[test]
  fn in_list_quotes_each_value() {
    assert_eq!(sql_in_list(&["pending", "expected"]), "'pending', 'expected'");
  }
}
