//! Emergency alerts raised by the SOS button.
//!
//! An alert is created exactly once per trigger and is never deleted. Only
//! an explicit acknowledge/resolve/false-alarm action changes its status, and
//! clients escalate for as long as the status is `open`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Error, Result,
  subject::{TenantId, UserId},
};

pub type AlertId = i64;

/// Title given to every alert raised through the SOS button.
pub const SOS_TITLE: &str = "SOS ALERT";

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
pub enum AlertStatus {
  Open,
  Acknowledged,
  Resolved,
  FalseAlarm,
}

impl AlertStatus {
  /// Escalation runs only while an alert is open.
  pub fn escalates(self) -> bool { matches!(self, Self::Open) }

  /// The statuses from which `self` may be entered.
  pub fn sources(self) -> &'static [AlertStatus] {
    match self {
      Self::Open => &[],
      Self::Acknowledged => &[Self::Open],
      Self::Resolved | Self::FalseAlarm => &[Self::Open, Self::Acknowledged],
    }
  }
}

/// Check a status change against the alert state machine.
pub fn transition(from: AlertStatus, to: AlertStatus) -> Result<AlertStatus> {
  if to.sources().contains(&from) {
    Ok(to)
  } else {
    Err(Error::InvalidAlertTransition { from, to })
  }
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
pub enum AlertPriority {
  Low,
  #[default]
  Medium,
  High,
  Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
  pub id:            AlertId,
  pub tenant_id:     TenantId,
  pub reporter_id:   UserId,
  pub reporter_name: Option<String>,
  pub title:         String,
  pub location:      Option<String>,
  pub description:   String,
  pub priority:      AlertPriority,
  pub status:        AlertStatus,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    Option<DateTime<Utc>>,
}

/// Input to [`crate::store::GateStore::insert_alert`]. Status is always
/// `open` on creation.
#[derive(Debug, Clone)]
pub struct NewAlert {
  pub tenant_id:     TenantId,
  pub reporter_id:   UserId,
  pub reporter_name: Option<String>,
  pub title:         String,
  pub location:      Option<String>,
  pub description:   String,
  pub priority:      AlertPriority,
}

/// Result of a trigger. `deduplicated` is only ever set when a dedup window
/// is configured and an open alert from the same reporter fell inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOutcome {
  pub alert:        AlertEvent,
  pub deduplicated: bool,
  /// Operator sessions that received the broadcast.
  pub delivered_to: usize,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn acknowledge_only_from_open() {
    assert!(transition(AlertStatus::Open, AlertStatus::Acknowledged).is_ok());
    assert!(transition(AlertStatus::Acknowledged, AlertStatus::Acknowledged).is_err());
    assert!(transition(AlertStatus::Resolved, AlertStatus::Acknowledged).is_err());
  }

  #[test]
  fn resolve_and_false_alarm_from_open_or_acknowledged() {
    for to in [AlertStatus::Resolved, AlertStatus::FalseAlarm] {
      assert!(transition(AlertStatus::Open, to).is_ok());
      assert!(transition(AlertStatus::Acknowledged, to).is_ok());
      assert!(transition(AlertStatus::Resolved, to).is_err());
      assert!(transition(AlertStatus::FalseAlarm, to).is_err());
    }
  }

  #[test]
  fn nothing_reopens_an_alert() {
    for from in [
      AlertStatus::Open,
      AlertStatus::Acknowledged,
      AlertStatus::Resolved,
      AlertStatus::FalseAlarm,
    ] {
      assert!(transition(from, AlertStatus::Open).is_err());
    }
  }

  #[test]
  fn only_open_escalates() {
    assert!(AlertStatus::Open.escalates());
    assert!(!AlertStatus::Acknowledged.escalates());
    assert!(!AlertStatus::Resolved.escalates());
    assert!(!AlertStatus::FalseAlarm.escalates());
  }
}
