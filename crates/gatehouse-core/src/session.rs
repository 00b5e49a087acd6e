//! Authenticated sessions. Issuance lives outside this system; the gate only
//! looks sessions up by the digest of their bearer token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subject::{Role, TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub user_id:    UserId,
  pub tenant_id:  TenantId,
  pub role:       Role,
  pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|at| at <= now)
  }
}
