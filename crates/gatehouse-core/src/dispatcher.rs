//! The alert dispatcher: raises SOS alerts, fans them out to operators and
//! moves them through acknowledge, resolve and false alarm.
//!
//! Fan-out is best effort. An alert is persisted before anyone is told about
//! it, so operators that miss the broadcast find it by polling open alerts.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::{
  Error, Result,
  alert::{AlertEvent, AlertId, AlertPriority, AlertStatus, NewAlert, SOS_TITLE, TriggerOutcome},
  realtime::ServerEvent,
  store::{AlertQuery, GateStore},
  subject::{TenantId, UserId},
};

/// Delivers a server event to the live operator channels of one tenant.
///
/// Implementations must not block and must not fail: a channel that cannot
/// take the event is skipped.
pub trait AlertFanout: Send + Sync {
  /// Returns the number of channels the event was handed to.
  fn publish(&self, tenant_id: TenantId, event: &ServerEvent) -> usize;
}

/// A fan-out with no channels attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFanout;

impl AlertFanout for NoFanout {
  fn publish(&self, _tenant_id: TenantId, _event: &ServerEvent) -> usize { 0 }
}

/// What the reporter supplied with the SOS. Both fields are optional.
#[derive(Debug, Clone, Default)]
pub struct SosReport {
  pub location:    Option<String>,
  pub description: Option<String>,
}

pub struct AlertDispatcher<'a, S, F> {
  store:        &'a S,
  fanout:       &'a F,
  /// Collapse re-triggers from one reporter inside this window. `None`
  /// creates one alert per press.
  dedup_window: Option<Duration>,
}

impl<'a, S: GateStore, F: AlertFanout> AlertDispatcher<'a, S, F> {
  pub fn new(store: &'a S, fanout: &'a F) -> Self {
    Self { store, fanout, dedup_window: None }
  }

  pub fn with_dedup_window(mut self, window: Option<Duration>) -> Self {
    self.dedup_window = window;
    self
  }

  /// Raise an SOS for `reporter_id`.
  pub async fn trigger(
    &self,
    tenant_id: TenantId,
    reporter_id: UserId,
    report: SosReport,
  ) -> Result<TriggerOutcome> {
    let reporter = self
      .store
      .get_user(reporter_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("user {reporter_id}")))?;
    if reporter.tenant_id != tenant_id {
      return Err(Error::CrossTenant {
        caller_tenant:  tenant_id,
        subject_tenant: reporter.tenant_id,
      });
    }

    if let Some(window) = self.dedup_window
      && let Some(existing) = self
        .store
        .latest_open_alert(tenant_id, reporter_id, Utc::now() - window)
        .await
        .map_err(Error::store)?
    {
      info!(tenant_id, alert_id = existing.id, reporter_id, "sos collapsed into open alert");
      return Ok(TriggerOutcome { alert: existing, deduplicated: true, delivered_to: 0 });
    }

    let location = report
      .location
      .filter(|l| !l.trim().is_empty())
      .or_else(|| reporter.house_address.clone());
    let description = report
      .description
      .filter(|d| !d.trim().is_empty())
      .unwrap_or_else(|| {
        format!(
          "Emergency reported by {} at {}",
          reporter.full_name,
          location.as_deref().unwrap_or("Unknown Location")
        )
      });

    let alert = self
      .store
      .insert_alert(NewAlert {
        tenant_id,
        reporter_id,
        reporter_name: Some(reporter.full_name.clone()),
        title: SOS_TITLE.to_owned(),
        location,
        description,
        priority: AlertPriority::Critical,
      })
      .await
      .map_err(Error::store)?;

    let delivered_to =
      self.fanout.publish(tenant_id, &ServerEvent::PanicAlert { incident: alert.clone() });
    if delivered_to == 0 {
      warn!(tenant_id, alert_id = alert.id, "sos raised with no operator connected");
    } else {
      info!(tenant_id, alert_id = alert.id, delivered_to, "sos raised");
    }

    Ok(TriggerOutcome { alert, deduplicated: false, delivered_to })
  }

  pub async fn acknowledge(&self, tenant_id: TenantId, id: AlertId) -> Result<AlertEvent> {
    self.set_status(tenant_id, id, AlertStatus::Acknowledged).await
  }

  pub async fn resolve(&self, tenant_id: TenantId, id: AlertId) -> Result<AlertEvent> {
    self.set_status(tenant_id, id, AlertStatus::Resolved).await
  }

  pub async fn mark_false_alarm(&self, tenant_id: TenantId, id: AlertId) -> Result<AlertEvent> {
    self.set_status(tenant_id, id, AlertStatus::FalseAlarm).await
  }

  /// Apply any status change. `Open` is never a valid target.
  pub async fn set_status(
    &self,
    tenant_id: TenantId,
    id: AlertId,
    to: AlertStatus,
  ) -> Result<AlertEvent> {
    let updated = self
      .store
      .set_alert_status(tenant_id, id, to, Utc::now())
      .await
      .map_err(Error::store)?;

    let Some(alert) = updated else {
      return Err(self.explain_refusal(tenant_id, id, to).await);
    };

    let delivered_to =
      self.fanout.publish(tenant_id, &ServerEvent::AlertStatus { incident: alert.clone() });
    info!(tenant_id, alert_id = id, status = %alert.status, delivered_to, "alert status changed");
    Ok(alert)
  }

  pub async fn alert(&self, tenant_id: TenantId, id: AlertId) -> Result<AlertEvent> {
    let alert = self
      .store
      .get_alert(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("alert {id}")))?;
    if alert.tenant_id != tenant_id {
      return Err(Error::CrossTenant {
        caller_tenant:  tenant_id,
        subject_tenant: alert.tenant_id,
      });
    }
    Ok(alert)
  }

  /// Alerts of the tenant, newest first. The poll backstop asks for
  /// `status = open`.
  pub async fn list(&self, query: AlertQuery) -> Result<Vec<AlertEvent>> {
    self.store.list_alerts(query).await.map_err(Error::store)
  }

  pub async fn list_open(&self, tenant_id: TenantId) -> Result<Vec<AlertEvent>> {
    self
      .list(AlertQuery {
        tenant_id,
        status: Some(AlertStatus::Open),
        ..Default::default()
      })
      .await
  }

  async fn explain_refusal(&self, tenant_id: TenantId, id: AlertId, to: AlertStatus) -> Error {
    match self.alert(tenant_id, id).await {
      Ok(current) => {
        warn!(tenant_id, alert_id = id, from = %current.status, to = %to, "refused alert status change");
        Error::InvalidAlertTransition { from: current.status, to }
      }
      Err(e) => e,
    }
  }
}
