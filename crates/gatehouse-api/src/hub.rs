//! In-process registry of open realtime channels, keyed by tenant.
//!
//! [`AlertHub`] is the server side of alert fan-out: every websocket task
//! attaches itself here and drains its own queue. Publishing never blocks;
//! a channel whose socket task has gone away is dropped on the next publish.

use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use gatehouse_core::{
  dispatcher::AlertFanout,
  realtime::{ChannelSubscription, ServerEvent},
  subject::TenantId,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

struct Channel {
  subscription: ChannelSubscription,
  outbound:     mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct AlertHub {
  tenants: Mutex<HashMap<TenantId, Vec<Channel>>>,
}

impl AlertHub {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, HashMap<TenantId, Vec<Channel>>> {
    self.tenants.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register an open channel. Frames published to its tenant arrive on the
  /// returned receiver as serialised JSON.
  pub fn attach(&self, subscription: ChannelSubscription) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    debug!(
      session_id = %subscription.session_id,
      tenant_id = subscription.tenant_id,
      role = %subscription.role,
      "channel attached"
    );
    self
      .lock()
      .entry(subscription.tenant_id)
      .or_default()
      .push(Channel { subscription, outbound: tx });
    rx
  }

  pub fn detach(&self, tenant_id: TenantId, session_id: Uuid) {
    let mut tenants = self.lock();
    if let Some(channels) = tenants.get_mut(&tenant_id) {
      channels.retain(|c| c.subscription.session_id != session_id);
      if channels.is_empty() {
        tenants.remove(&tenant_id);
      }
    }
    debug!(%session_id, tenant_id, "channel detached");
  }

  /// Open channels for `tenant_id`, of any role.
  pub fn connected(&self, tenant_id: TenantId) -> usize {
    self.lock().get(&tenant_id).map_or(0, Vec::len)
  }
}

impl AlertFanout for AlertHub {
  fn publish(&self, tenant_id: TenantId, event: &ServerEvent) -> usize {
    let frame = match serde_json::to_string(event) {
      Ok(frame) => frame,
      Err(e) => {
        warn!(error = %e, "failed to serialise realtime event");
        return 0;
      }
    };

    let mut tenants = self.lock();
    let Some(channels) = tenants.get_mut(&tenant_id) else {
      return 0;
    };

    let mut delivered = 0;
    channels.retain(|c| {
      if !c.subscription.role.is_operator() {
        return true;
      }
      match c.outbound.send(frame.clone()) {
        Ok(()) => {
          delivered += 1;
          true
        }
        Err(_) => false,
      }
    });
    delivered
  }
}
