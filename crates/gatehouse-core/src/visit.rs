//! Visits: one timed occurrence of a visitor's or staff member's presence.
//!
//! A visit moves through a small state machine:
//!
//! ```text
//! pending/expected --check in--> checked_in --check out--> checked_out
//! pending/expected --deny------> denied
//! pending/expected --(valid_until elapses)--> expired
//! ```
//!
//! `checked_out`, `denied` and `expired` are terminal. Expiry is evaluated
//! lazily: a visit whose deadline has passed reports `expired` on read even
//! before anything has been written back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result, subject::TenantId};

pub type VisitId = i64;

// ─── Status ──────────────────────────────────────────────────────────────────

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
pub enum VisitStatus {
  Pending,
  Expected,
  CheckedIn,
  CheckedOut,
  Denied,
  Expired,
}

impl VisitStatus {
  /// No transition leaves a terminal status.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::CheckedOut | Self::Denied | Self::Expired)
  }

  /// Statuses from which a subject may still be admitted or turned away.
  pub fn awaits_arrival(self) -> bool {
    matches!(self, Self::Pending | Self::Expected)
  }
}

/// Whose presence a visit records.
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
pub enum VisitKind {
  Visitor,
  Staff,
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
pub enum VisitorType {
  #[default]
  Visitor,
  Maid,
  Contractor,
  Delivery,
  Other,
}

// ─── Actions ─────────────────────────────────────────────────────────────────

/// An operator-initiated transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum VisitAction {
  #[strum(to_string = "check in")]
  CheckIn,
  #[strum(to_string = "check out")]
  CheckOut,
  #[strum(to_string = "deny")]
  Deny,
}

impl VisitAction {
  /// The statuses this action may start from.
  pub fn sources(self) -> &'static [VisitStatus] {
    match self {
      Self::CheckIn | Self::Deny => &[VisitStatus::Pending, VisitStatus::Expected],
      Self::CheckOut => &[VisitStatus::CheckedIn],
    }
  }

  pub fn target(self) -> VisitStatus {
    match self {
      Self::CheckIn => VisitStatus::CheckedIn,
      Self::CheckOut => VisitStatus::CheckedOut,
      Self::Deny => VisitStatus::Denied,
    }
  }

  /// Whether `valid_until` must still lie in the future for this action.
  pub fn respects_deadline(self) -> bool {
    matches!(self, Self::CheckIn | Self::Deny)
  }
}

/// Apply `action` to a visit currently in `from`.
pub fn transition(from: VisitStatus, action: VisitAction) -> Result<VisitStatus> {
  if action.sources().contains(&from) {
    Ok(action.target())
  } else {
    Err(Error::InvalidTransition { from, action })
  }
}

// ─── Visit ───────────────────────────────────────────────────────────────────

/// Registration details for a visitor pass. Staff shifts carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorPass {
  pub full_name:      String,
  pub phone_number:   String,
  pub vehicle_number: Option<String>,
  pub purpose:        Option<String>,
  pub visitor_type:   VisitorType,
  /// The resident who registered the visitor.
  pub host_id:        i64,
  pub access_code:    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
  pub id:                VisitId,
  pub tenant_id:         TenantId,
  pub subject_kind:      VisitKind,
  /// Staff id for shifts; for visitor passes the pass is its own subject and
  /// this equals `id`.
  pub subject_id:        i64,
  pub status:            VisitStatus,
  pub expected_arrival:  Option<DateTime<Utc>>,
  /// Absolute deadline after which check-in is refused.
  pub valid_until:       Option<DateTime<Utc>>,
  pub check_in_time:     Option<DateTime<Utc>>,
  pub check_out_time:    Option<DateTime<Utc>>,
  pub items_carried_in:  Option<String>,
  pub items_carried_out: Option<String>,
  /// Advisory, set by the host. Never enforced.
  pub allowed_items_out: Option<String>,
  pub visitor:           Option<VisitorPass>,
  pub created_at:        DateTime<Utc>,
}

impl Visit {
  pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
    self.valid_until.is_some_and(|deadline| deadline <= now)
  }

  /// The status as of `now`, with expiry applied.
  pub fn effective_status(&self, now: DateTime<Utc>) -> VisitStatus {
    if self.status.awaits_arrival() && self.is_past_deadline(now) {
      VisitStatus::Expired
    } else {
      self.status
    }
  }

  /// `check_out_time` set implies `check_in_time` set and not later.
  pub fn has_consistent_timeline(&self) -> bool {
    match (self.check_in_time, self.check_out_time) {
      (_, None) => true,
      (Some(i), Some(o)) => i <= o,
      (None, Some(_)) => false,
    }
  }
}

/// Input for registering a visitor pass. The host is the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewVisitor {
  pub full_name:         String,
  pub phone_number:      String,
  pub vehicle_number:    Option<String>,
  pub purpose:           Option<String>,
  #[serde(default)]
  pub visitor_type:      VisitorType,
  pub expected_arrival:  Option<DateTime<Utc>>,
  pub valid_until:       Option<DateTime<Utc>>,
  pub allowed_items_out: Option<String>,
}

/// A guarded transition handed to the store, which applies it as a single
/// conditional write.
#[derive(Debug, Clone)]
pub struct VisitTransition {
  /// The write only applies to a visit of this kind.
  pub kind:   VisitKind,
  pub action: VisitAction,
  pub at:     DateTime<Utc>,
  /// Items carried in (check-in) or out (check-out).
  pub items:  Option<String>,
}

// ─── Check-out review ────────────────────────────────────────────────────────

/// The host's advisory list next to what actually left. Comparison is a
/// case-insensitive set match over comma-separated items; the operator decides
/// what to do about a mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReview {
  pub allowed_items_out: Option<String>,
  pub items_carried_out: Option<String>,
  /// `None` when the host set no list.
  pub matches:           Option<bool>,
}

impl ItemsReview {
  pub fn compare(allowed: Option<&str>, carried: Option<&str>) -> Self {
    let matches = allowed.map(|a| item_set(a) == item_set(carried.unwrap_or("")));
    Self {
      allowed_items_out: allowed.map(str::to_owned),
      items_carried_out: carried.map(str::to_owned),
      matches,
    }
  }
}

fn item_set(list: &str) -> std::collections::BTreeSet<String> {
  list
    .split(',')
    .map(|item| item.trim().to_lowercase())
    .filter(|item| !item.is_empty())
    .collect()
}

/// Returned by a successful check-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutReceipt {
  pub visit: Visit,
  pub items: ItemsReview,
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  fn visit(status: VisitStatus, valid_until: Option<DateTime<Utc>>) -> Visit {
    Visit {
      id: 1,
      tenant_id: 1,
      subject_kind: VisitKind::Visitor,
      subject_id: 1,
      status,
      expected_arrival: None,
      valid_until,
      check_in_time: None,
      check_out_time: None,
      items_carried_in: None,
      items_carried_out: None,
      allowed_items_out: None,
      visitor: None,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn check_in_only_from_awaiting_statuses() {
    assert_eq!(
      transition(VisitStatus::Pending, VisitAction::CheckIn).unwrap(),
      VisitStatus::CheckedIn
    );
    assert_eq!(
      transition(VisitStatus::Expected, VisitAction::CheckIn).unwrap(),
      VisitStatus::CheckedIn
    );
    assert!(matches!(
      transition(VisitStatus::CheckedIn, VisitAction::CheckIn),
      Err(Error::InvalidTransition { from: VisitStatus::CheckedIn, .. })
    ));
  }

  #[test]
  fn terminal_statuses_admit_nothing() {
    for from in [VisitStatus::CheckedOut, VisitStatus::Denied, VisitStatus::Expired] {
      assert!(from.is_terminal());
      for action in [VisitAction::CheckIn, VisitAction::CheckOut, VisitAction::Deny] {
        assert!(transition(from, action).is_err(), "{from} allowed {action}");
      }
    }
  }

  #[test]
  fn check_out_requires_checked_in() {
    assert!(transition(VisitStatus::Expected, VisitAction::CheckOut).is_err());
    assert_eq!(
      transition(VisitStatus::CheckedIn, VisitAction::CheckOut).unwrap(),
      VisitStatus::CheckedOut
    );
  }

  #[test]
  fn past_deadline_reads_as_expired() {
    let now = Utc::now();
    let v = visit(VisitStatus::Expected, Some(now - Duration::days(1)));
    assert_eq!(v.effective_status(now), VisitStatus::Expired);

    let v = visit(VisitStatus::CheckedIn, Some(now - Duration::days(1)));
    assert_eq!(v.effective_status(now), VisitStatus::CheckedIn);

    let v = visit(VisitStatus::Pending, None);
    assert_eq!(v.effective_status(now), VisitStatus::Pending);
  }

  #[test]
  fn timeline_requires_check_in_before_check_out() {
    let now = Utc::now();
    let mut v = visit(VisitStatus::CheckedOut, None);
    v.check_out_time = Some(now);
    assert!(!v.has_consistent_timeline());
    v.check_in_time = Some(now - Duration::minutes(5));
    assert!(v.has_consistent_timeline());
  }

  #[test]
  fn items_review_ignores_case_order_and_spacing() {
    let review = ItemsReview::compare(Some("Laptop, charger"), Some("charger,laptop"));
    assert_eq!(review.matches, Some(true));

    let review = ItemsReview::compare(Some("laptop"), Some("laptop, tv"));
    assert_eq!(review.matches, Some(false));

    let review = ItemsReview::compare(None, Some("laptop"));
    assert_eq!(review.matches, None);
  }

  #[test]
  fn status_strings_are_snake_case() {
    assert_eq!(VisitStatus::CheckedIn.as_ref(), "checked_in");
    assert_eq!("checked_out".parse::<VisitStatus>().unwrap(), VisitStatus::CheckedOut);
    assert_eq!(VisitAction::CheckIn.to_string(), "check in");
  }
}
