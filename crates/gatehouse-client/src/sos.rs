//! Raising an SOS from a reporter's device.
//!
//! A failed trigger must reach the user loudly: [`SosError`] tells them to
//! call emergency services. A successful trigger is confirmed locally through
//! the device's own notifications whenever the realtime channel is down, so
//! the reporter never depends on a guard's broadcast for confirmation.

use std::future::Future;

use gatehouse_core::alert::TriggerOutcome;
use thiserror::Error;
use tracing::{error, info};

use crate::error::{ClientError, Result};

pub const FALLBACK_TITLE: &str = "🚨 EMERGENCY ALERT";
pub const FALLBACK_BODY: &str =
  "Panic Button Activated! Security and Response Team have been notified.";

/// The SOS trigger could not be delivered to the server.
#[derive(Debug, Error)]
#[error("could not raise the digital alarm. Call emergency services immediately! ({source})")]
pub struct SosError {
  #[source]
  pub source: ClientError,
}

pub trait SosApi: Send + Sync {
  fn trigger(
    &self,
    location: Option<&str>,
    description: Option<&str>,
  ) -> impl Future<Output = Result<TriggerOutcome>> + Send;
}

/// The host device's local notification facility.
pub trait LocalNotifier: Send + Sync {
  fn notify(&self, title: &str, body: &str);
}

pub struct SosReporter<A, N> {
  api:      A,
  notifier: N,
}

impl<A: SosApi, N: LocalNotifier> SosReporter<A, N> {
  pub fn new(api: A, notifier: N) -> Self { Self { api, notifier } }

  /// Trigger an SOS. `channel_open` says whether this device currently has a
  /// live realtime channel; without one the acceptance is confirmed through
  /// a local notification.
  pub async fn raise(
    &self,
    location: Option<&str>,
    description: Option<&str>,
    channel_open: bool,
  ) -> Result<TriggerOutcome, SosError> {
    let outcome = self.api.trigger(location, description).await.map_err(|source| {
      error!(error = %source, "SOS trigger failed");
      SosError { source }
    })?;

    info!(
      alert_id = outcome.alert.id,
      delivered_to = outcome.delivered_to,
      deduplicated = outcome.deduplicated,
      "SOS accepted"
    );
    if !channel_open {
      self.notifier.notify(FALLBACK_TITLE, FALLBACK_BODY);
    }
    Ok(outcome)
  }
}
