//! Local escalation of open SOS alerts.
//!
//! An open alert drives a repeating attention pattern that never stops on its
//! own. It ends when the operator acknowledges it here, or when this client
//! learns (by broadcast or by poll) that the alert has left `open`.
//!
//! ```text
//! panic_alert / poll ──▶ observe ──▶ escalating ──acknowledge──▶ settled
//!                                        │
//!              alert_status / poll ──────┘ (left open elsewhere)
//! ```
//!
//! A settled alert never escalates again, even if a stale poll still reports
//! it as open. Only a non-open status or a local acknowledge settles an
//! alert; one that is merely missing from a poll is stopped but may start
//! again on the next report.

use std::{
  collections::{HashMap, HashSet},
  future::Future,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use gatehouse_core::{
  alert::{AlertEvent, AlertId},
  realtime::ServerEvent,
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Alternating pause/pulse durations in milliseconds (SOS in morse), starting
/// with a pause.
pub const SOS_PATTERN: [u64; 18] = [
  0, 500, 200, 500, 200, 500, 500, 1000, 500, 1000, 500, 1000, 200, 500, 200, 500, 200, 500,
];

/// How often the open-alert poll runs by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

// ─── Seams ────────────────────────────────────────────────────────────────────

/// The device's attention-getting facility: vibration, sound, a modal.
pub trait AlertSignal: Send + Sync + 'static {
  /// Escalation for `alert` has started.
  fn raise(&self, alert: &AlertEvent);
  /// One pulse of the pattern.
  fn pulse(&self, alert_id: AlertId, duration: Duration);
  /// Escalation for `alert_id` has stopped. Called exactly once per `raise`.
  fn clear(&self, alert_id: AlertId);
}

/// The incident operations escalation needs from the server.
pub trait IncidentApi: Send + Sync + 'static {
  fn acknowledge(&self, id: AlertId) -> impl Future<Output = Result<AlertEvent>> + Send;
  fn open_alerts(&self) -> impl Future<Output = Result<Vec<AlertEvent>>> + Send;
}

/// Where the operator lands after acknowledging.
pub trait IncidentNavigator: Send + Sync + 'static {
  fn open_incident(&self, alert: &AlertEvent);
}

// ─── Controller ───────────────────────────────────────────────────────────────

struct Escalation {
  started: Instant,
  cancel:  CancellationToken,
  task:    JoinHandle<()>,
}

#[derive(Default)]
struct Escalations {
  active:  HashMap<AlertId, Escalation>,
  settled: HashSet<AlertId>,
}

pub struct EscalationController<G, A, N> {
  signal:    Arc<G>,
  api:       A,
  navigator: N,
  pattern:   Arc<[u64]>,
  state:     Mutex<Escalations>,
}

impl<G, A, N> EscalationController<G, A, N>
where
  G: AlertSignal,
  A: IncidentApi,
  N: IncidentNavigator,
{
  pub fn new(signal: G, api: A, navigator: N) -> Self {
    Self {
      signal: Arc::new(signal),
      api,
      navigator,
      pattern: Arc::from(SOS_PATTERN.as_slice()),
      state: Mutex::default(),
    }
  }

  /// Replace the pulse pattern. Entries alternate pause and pulse, starting
  /// with a pause.
  pub fn with_pattern(mut self, pattern: &[u64]) -> Self {
    self.pattern = Arc::from(pattern);
    self
  }

  fn lock(&self) -> MutexGuard<'_, Escalations> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_escalating(&self, id: AlertId) -> bool { self.lock().active.contains_key(&id) }

  /// Alerts currently escalating, in id order.
  pub fn escalating(&self) -> Vec<AlertId> {
    let mut ids: Vec<_> = self.lock().active.keys().copied().collect();
    ids.sort_unstable();
    ids
  }

  /// Realtime entry point; wire it to [`crate::realtime::RealtimeChannel::subscribe`].
  pub fn handle_event(&self, event: &ServerEvent) {
    if let Some(alert) = event.incident() {
      self.observe(alert);
    }
  }

  /// Start escalating an open alert, or stop one that has left `open`.
  pub fn observe(&self, alert: &AlertEvent) {
    let mut state = self.lock();
    if !alert.status.escalates() {
      state.settled.insert(alert.id);
      if let Some(escalation) = state.active.remove(&alert.id) {
        info!(alert_id = alert.id, status = %alert.status, "alert left open elsewhere");
        self.halt(alert.id, escalation);
      }
      return;
    }
    if state.settled.contains(&alert.id) || state.active.contains_key(&alert.id) {
      debug!(alert_id = alert.id, "alert already handled");
      return;
    }

    info!(alert_id = alert.id, tenant_id = alert.tenant_id, "escalating open alert");
    self.signal.raise(alert);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(repeat(
      self.signal.clone(),
      self.pattern.clone(),
      alert.id,
      cancel.clone(),
    ));
    state.active.insert(alert.id, Escalation { started: Instant::now(), cancel, task });
  }

  /// Bring local escalation in line with the server's open list, fetched by
  /// a request sent at `polled_at`: start what was missed, stop what is no
  /// longer open.
  ///
  /// An escalation that started at or after `polled_at` may postdate the
  /// list and is left running. Nothing is settled here.
  pub fn reconcile(&self, open: &[AlertEvent], polled_at: Instant) {
    let still_open: HashSet<AlertId> = open.iter().map(|a| a.id).collect();
    {
      let mut state = self.lock();
      let gone: Vec<AlertId> = state
        .active
        .iter()
        .filter(|(id, e)| !still_open.contains(*id) && e.started < polled_at)
        .map(|(id, _)| *id)
        .collect();
      for id in gone {
        if let Some(escalation) = state.active.remove(&id) {
          info!(alert_id = id, "alert no longer open on server");
          self.halt(id, escalation);
        }
      }
    }
    for alert in open {
      self.observe(alert);
    }
  }

  /// The operator's acknowledge action: stop the pattern now, tell the
  /// server, then open the incident.
  ///
  /// The pattern stays stopped even if the server call fails.
  pub async fn acknowledge(&self, id: AlertId) -> Result<AlertEvent> {
    {
      let mut state = self.lock();
      state.settled.insert(id);
      if let Some(escalation) = state.active.remove(&id) {
        self.halt(id, escalation);
      }
    }

    let alert = self.api.acknowledge(id).await.inspect_err(|e| {
      warn!(alert_id = id, error = %e, "acknowledge failed");
    })?;
    info!(alert_id = id, status = %alert.status, "alert acknowledged");
    self.navigator.open_incident(&alert);
    Ok(alert)
  }

  /// Stop every escalation without acknowledging anything.
  pub fn shutdown(&self) {
    let mut state = self.lock();
    for (id, escalation) in std::mem::take(&mut state.active) {
      self.halt(id, escalation);
    }
  }

  fn halt(&self, id: AlertId, escalation: Escalation) {
    escalation.cancel.cancel();
    escalation.task.abort();
    self.signal.clear(id);
  }
}

async fn repeat<G: AlertSignal>(
  signal: Arc<G>,
  pattern: Arc<[u64]>,
  alert_id: AlertId,
  cancel: CancellationToken,
) {
  if pattern.iter().all(|ms| *ms == 0) {
    return;
  }
  loop {
    for (i, ms) in pattern.iter().enumerate() {
      let step = Duration::from_millis(*ms);
      if i % 2 == 1 {
        if cancel.is_cancelled() {
          return;
        }
        signal.pulse(alert_id, step);
      }
      tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(step) => {}
      }
    }
  }
}

// ─── Poll backstop ────────────────────────────────────────────────────────────

/// Periodically fetch the open alerts and reconcile, until `cancel` fires.
/// Covers broadcasts missed while the realtime channel was down.
pub fn spawn_poll_backstop<G, A, N>(
  controller: Arc<EscalationController<G, A, N>>,
  interval: Duration,
  cancel: CancellationToken,
) -> JoinHandle<()>
where
  G: AlertSignal,
  A: IncidentApi,
  N: IncidentNavigator,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        () = cancel.cancelled() => break,
        _ = ticker.tick() => {
          let polled_at = Instant::now();
          match controller.api.open_alerts().await {
            Ok(open) => controller.reconcile(&open, polled_at),
            Err(e) => warn!(error = %e, "open alert poll failed"),
          }
        }
      }
    }
    debug!("poll backstop stopped");
  })
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use chrono::Utc;
  use gatehouse_core::alert::{AlertPriority, AlertStatus};

  use super::*;
  use crate::error::ClientError;

  fn alert(id: AlertId, status: AlertStatus) -> AlertEvent {
    AlertEvent {
      id,
      tenant_id: 1,
      reporter_id: 7,
      reporter_name: Some("Ada".into()),
      title: "SOS ALERT".into(),
      location: Some("Block A".into()),
      description: "fire".into(),
      priority: AlertPriority::Critical,
      status,
      created_at: Utc::now(),
      updated_at: None,
    }
  }

  #[derive(Default)]
  struct Signal {
    raised:  Mutex<Vec<AlertId>>,
    pulses:  AtomicUsize,
    cleared: Mutex<Vec<AlertId>>,
  }

  impl AlertSignal for Arc<Signal> {
    fn raise(&self, alert: &AlertEvent) { self.raised.lock().unwrap().push(alert.id); }

    fn pulse(&self, _alert_id: AlertId, _duration: Duration) {
      self.pulses.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self, alert_id: AlertId) { self.cleared.lock().unwrap().push(alert_id); }
  }

  #[derive(Default)]
  struct Api {
    acks: AtomicUsize,
    open: Mutex<Vec<AlertEvent>>,
    fail: bool,
  }

  impl IncidentApi for Arc<Api> {
    async fn acknowledge(&self, id: AlertId) -> Result<AlertEvent> {
      self.acks.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(ClientError::Api {
          status:  503,
          code:    "store".into(),
          message: "down".into(),
        });
      }
      Ok(alert(id, AlertStatus::Acknowledged))
    }

    async fn open_alerts(&self) -> Result<Vec<AlertEvent>> { Ok(self.open.lock().unwrap().clone()) }
  }

  #[derive(Default)]
  struct Navigator(Mutex<Vec<AlertEvent>>);

  impl IncidentNavigator for Arc<Navigator> {
    fn open_incident(&self, alert: &AlertEvent) { self.0.lock().unwrap().push(alert.clone()); }
  }

  type Controller = EscalationController<Arc<Signal>, Arc<Api>, Arc<Navigator>>;

  fn controller() -> (Arc<Controller>, Arc<Signal>, Arc<Api>, Arc<Navigator>) {
    let signal = Arc::new(Signal::default());
    let api = Arc::new(Api::default());
    let nav = Arc::new(Navigator::default());
    let c = EscalationController::new(signal.clone(), api.clone(), nav.clone());
    (Arc::new(c), signal, api, nav)
  }

  fn pulses(signal: &Signal) -> usize { signal.pulses.load(Ordering::SeqCst) }

  /// Nine pulses per pass through the pattern, which takes 8.5s.
  const CYCLE: Duration = Duration::from_millis(8500);

  #[tokio::test(start_paused = true)]
  async fn open_alert_repeats_until_acknowledged() {
    let (c, signal, api, nav) = controller();
    c.handle_event(&ServerEvent::PanicAlert { incident: alert(1, AlertStatus::Open) });
    assert!(c.is_escalating(1));

    tokio::time::sleep(CYCLE * 2 + Duration::from_millis(100)).await;
    let before = pulses(&signal);
    assert!(before >= 18, "pattern should repeat, saw {before} pulses");

    let acked = c.acknowledge(1).await.unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert!(!c.is_escalating(1));

    tokio::time::sleep(CYCLE * 3).await;
    assert_eq!(pulses(&signal), before);
    assert_eq!(api.acks.load(Ordering::SeqCst), 1);
    assert_eq!(*signal.cleared.lock().unwrap(), [1]);
    assert_eq!(nav.0.lock().unwrap()[0].id, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn duplicate_broadcast_does_not_double_escalate() {
    let (c, signal, ..) = controller();
    let event = ServerEvent::PanicAlert { incident: alert(1, AlertStatus::Open) };
    c.handle_event(&event);
    c.handle_event(&event);

    tokio::time::sleep(CYCLE - Duration::from_millis(100)).await;
    assert_eq!(pulses(&signal), 9);
    assert_eq!(*signal.raised.lock().unwrap(), [1]);
  }

  #[tokio::test(start_paused = true)]
  async fn status_change_elsewhere_stops_without_acknowledging() {
    let (c, signal, api, nav) = controller();
    c.observe(&alert(1, AlertStatus::Open));
    c.handle_event(&ServerEvent::AlertStatus { incident: alert(1, AlertStatus::Acknowledged) });
    assert!(!c.is_escalating(1));

    let after = pulses(&signal);
    tokio::time::sleep(CYCLE * 2).await;
    assert_eq!(pulses(&signal), after);
    assert_eq!(api.acks.load(Ordering::SeqCst), 0);
    assert!(nav.0.lock().unwrap().is_empty());

    // A stale open report afterwards starts nothing.
    c.observe(&alert(1, AlertStatus::Open));
    assert!(!c.is_escalating(1));
  }

  #[tokio::test(start_paused = true)]
  async fn failed_acknowledge_still_stops_locally() {
    let signal = Arc::new(Signal::default());
    let api = Arc::new(Api { fail: true, ..Default::default() });
    let nav = Arc::new(Navigator::default());
    let c = EscalationController::new(signal.clone(), api, nav.clone());

    c.observe(&alert(4, AlertStatus::Open));
    assert!(c.acknowledge(4).await.is_err());
    assert!(!c.is_escalating(4));
    assert!(nav.0.lock().unwrap().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn reconcile_starts_missed_and_stops_closed() {
    let (c, signal, ..) = controller();
    c.observe(&alert(1, AlertStatus::Open));
    tokio::time::advance(Duration::from_millis(10)).await;

    c.reconcile(&[alert(2, AlertStatus::Open)], Instant::now());
    assert_eq!(c.escalating(), [2]);
    assert_eq!(*signal.cleared.lock().unwrap(), [1]);

    // Missing from one list is not settled: a later report starts it again.
    c.reconcile(&[alert(1, AlertStatus::Open), alert(2, AlertStatus::Open)], Instant::now());
    assert_eq!(c.escalating(), [1, 2]);

    c.shutdown();
    assert!(c.escalating().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn list_older_than_broadcast_does_not_silence_it() {
    let (c, signal, ..) = controller();
    let polled_at = Instant::now();
    tokio::time::advance(Duration::from_millis(10)).await;

    // The broadcast lands while the poll is in flight; the list predates it.
    c.handle_event(&ServerEvent::PanicAlert { incident: alert(5, AlertStatus::Open) });
    c.reconcile(&[], polled_at);
    assert!(c.is_escalating(5));
    assert!(signal.cleared.lock().unwrap().is_empty());

    // A fresh list still reporting it open changes nothing.
    c.reconcile(&[alert(5, AlertStatus::Open)], Instant::now());
    assert_eq!(c.escalating(), [5]);
    assert_eq!(*signal.raised.lock().unwrap(), [5]);

    let before = pulses(&signal);
    tokio::time::sleep(CYCLE).await;
    assert!(pulses(&signal) > before);
  }

  #[tokio::test(start_paused = true)]
  async fn poll_backstop_picks_up_missed_alert_and_stops_on_cancel() {
    let (c, _signal, api, _nav) = controller();
    api.open.lock().unwrap().push(alert(3, AlertStatus::Open));

    let cancel = CancellationToken::new();
    let poll = spawn_poll_backstop(c.clone(), Duration::from_secs(30), cancel.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(c.escalating(), [3]);

    api.open.lock().unwrap().clear();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(c.escalating().is_empty());

    cancel.cancel();
    poll.await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn silent_pattern_only_raises() {
    let (c, signal, ..) = controller();
    let c = Arc::try_unwrap(c).ok().unwrap().with_pattern(&[0, 0]);
    c.observe(&alert(5, AlertStatus::Open));
    tokio::time::sleep(CYCLE).await;
    assert_eq!(pulses(&signal), 0);
    assert!(c.is_escalating(5));
  }
}
