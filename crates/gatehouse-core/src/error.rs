//! Error types for `gatehouse-core`.
//!
//! The variants form the gate's failure taxonomy. Credential and ledger
//! failures are shown to the operator verbatim and are never retried
//! automatically.

use thiserror::Error;

use crate::{
  alert::AlertStatus,
  visit::{VisitAction, VisitStatus},
};

#[derive(Debug, Error)]
pub enum Error {
  /// The credential, visit, alert or user does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// A structured payload was present but could not be decoded.
  #[error("malformed credential: {0}")]
  Malformed(String),

  /// The resolved subject belongs to a different tenant than the caller.
  #[error("subject belongs to tenant {subject_tenant}, caller is in tenant {caller_tenant}")]
  CrossTenant {
    caller_tenant:  i64,
    subject_tenant: i64,
  },

  /// The state machine guard rejected the transition.
  #[error("cannot {action} a {from} visit")]
  InvalidTransition {
    from:   VisitStatus,
    action: VisitAction,
  },

  /// Same as above, for alert status changes.
  #[error("cannot move alert from {from} to {to}")]
  InvalidAlertTransition { from: AlertStatus, to: AlertStatus },

  /// `valid_until` elapsed before the check-in was attempted.
  #[error("visit {0} has expired")]
  Expired(i64),

  /// The realtime path is down; callers always have a fallback.
  #[error("realtime channel unavailable")]
  ChannelUnavailable,

  /// Missing, unknown or expired session token.
  #[error("unauthorized")]
  Unauthorized,

  /// Authenticated, but not allowed to perform this action.
  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether this is a state-machine refusal. Expiry counts as one.
  pub fn is_transition_failure(&self) -> bool {
    matches!(
      self,
      Self::InvalidTransition { .. }
        | Self::InvalidAlertTransition { .. }
        | Self::Expired(_)
    )
  }

  /// Stable machine-readable code; the operator UI picks its remediation
  /// message from this.
  pub fn code(&self) -> &'static str {
    match self {
      Self::NotFound(_) => "not_found",
      Self::Malformed(_) => "malformed",
      Self::CrossTenant { .. } => "cross_tenant",
      Self::InvalidTransition { .. } | Self::InvalidAlertTransition { .. } => {
        "invalid_transition"
      }
      Self::Expired(_) => "expired",
      Self::ChannelUnavailable => "channel_unavailable",
      Self::Unauthorized => "unauthorized",
      Self::Forbidden(_) => "forbidden",
      Self::Store(_) => "store",
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
