//! The realtime wire contract.
//!
//! Every frame is a JSON object `{"type": "...", ...payload}`. The server only
//! pushes; clients never send requests over the channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  alert::AlertEvent,
  subject::{Role, TenantId, UserId},
};

/// A server-originated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
  /// A new SOS alert.
  PanicAlert { incident: AlertEvent },
  /// An alert changed status; clients stop escalating once it leaves `open`.
  AlertStatus { incident: AlertEvent },
  /// Types this build does not understand are ignored, not treated as errors.
  #[serde(other)]
  Unknown,
}

impl ServerEvent {
  /// The alert carried by the event, if any.
  pub fn incident(&self) -> Option<&AlertEvent> {
    match self {
      Self::PanicAlert { incident } | Self::AlertStatus { incident } => Some(incident),
      Self::Unknown => None,
    }
  }
}

/// One open realtime channel, as tracked by the server. Exists only while the
/// socket is open and has no persisted identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscription {
  pub session_id: Uuid,
  pub user_id:    UserId,
  pub tenant_id:  TenantId,
  pub role:       Role,
}

impl ChannelSubscription {
  pub fn new(user_id: UserId, tenant_id: TenantId, role: Role) -> Self {
    Self { session_id: Uuid::new_v4(), user_id, tenant_id, role }
  }
}
