//! Credentials presented at the gate.
//!
//! A credential is either a short access code typed by the guard or the JSON
//! payload scanned from a QR code. It is only ever a lookup key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  subject::{Role, TenantId},
};

/// Which kind of record a structured payload points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
  Resident,
  Visitor,
  Staff,
}

impl PayloadKind {
  /// Map the payload's `type` discriminant. `digital_id` is what the resident
  /// app puts in its QR code.
  fn from_type(t: &str) -> Option<Self> {
    match t {
      "digital_id" | "resident" => Some(Self::Resident),
      "visitor" => Some(Self::Visitor),
      "staff" => Some(Self::Staff),
      _ => None,
    }
  }
}

/// A decoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPayload {
  pub kind:       PayloadKind,
  pub subject_id: i64,
  pub tenant_id:  Option<TenantId>,
  pub role:       Option<Role>,
  /// Milliseconds since the epoch, as stamped by the issuing device.
  pub issued_at:  Option<i64>,
}

impl StructuredPayload {
  pub fn issued_at(&self) -> Option<DateTime<Utc>> {
    self.issued_at.and_then(DateTime::from_timestamp_millis)
  }

  /// Reject payloads stamped more than `max_age` before `now`. Payloads with
  /// no timestamp are rejected too once a window is configured.
  pub fn check_age(&self, max_age: Duration, now: DateTime<Utc>) -> Result<()> {
    match self.issued_at() {
      Some(at) if now - at <= max_age => Ok(()),
      Some(at) => Err(Error::Malformed(format!("payload issued at {at} is too old"))),
      None => Err(Error::Malformed("payload has no timestamp".into())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
  AccessCode(String),
  Structured(StructuredPayload),
}

impl Credential {
  /// Classify raw scanner/keyboard input.
  ///
  /// Anything that parses as a JSON object is treated as a structured payload
  /// and must be complete; everything else is an access code.
  pub fn parse(input: &str) -> Result<Self> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
      return Err(Error::Malformed("empty credential".into()));
    }

    match serde_json::from_str::<Value>(trimmed) {
      Ok(Value::Object(map)) => decode_payload(&map).map(Self::Structured),
      _ => Ok(Self::AccessCode(trimmed.to_owned())),
    }
  }
}

fn decode_payload(map: &serde_json::Map<String, Value>) -> Result<StructuredPayload> {
  let type_str = map
    .get("type")
    .and_then(Value::as_str)
    .ok_or_else(|| Error::Malformed("payload has no type".into()))?;
  let kind = PayloadKind::from_type(type_str)
    .ok_or_else(|| Error::Malformed(format!("unknown payload type {type_str:?}")))?;

  let subject_id = map
    .get("userId")
    .or_else(|| map.get("id"))
    .and_then(as_id)
    .ok_or_else(|| Error::Malformed("payload has no subject id".into()))?;

  let tenant_id = match map.get("tenantId") {
    None | Some(Value::Null) => None,
    Some(v) => Some(as_id(v).ok_or_else(|| Error::Malformed("tenantId is not an id".into()))?),
  };

  let role = map
    .get("role")
    .and_then(Value::as_str)
    .and_then(|r| r.parse().ok());

  let issued_at = map.get("timestamp").and_then(Value::as_i64);

  Ok(StructuredPayload { kind, subject_id, tenant_id, role, issued_at })
}

/// Ids arrive as numbers from the app but as strings from some scanners.
fn as_id(v: &Value) -> Option<i64> {
  match v {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}
