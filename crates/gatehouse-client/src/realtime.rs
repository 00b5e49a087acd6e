//! Client side of the realtime channel.
//!
//! [`RealtimeChannel`] owns at most one live connection for a signed-in
//! session and reconnects after a fixed backoff when the server goes away.
//! Events are delivered to subscribed handlers in arrival order. Nothing is
//! queued while the channel is down; the open-alert poll covers that gap.
//!
//! The transport sits behind [`Connector`] so tests can run the channel
//! against an in-process fake.

use std::{
  future::Future,
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
  time::Duration,
};

use futures::StreamExt as _;
use gatehouse_core::realtime::ServerEvent;
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, Result};

/// Wait between losing the connection and the next attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Close code the server uses for a rejected token.
pub const INVALID_TOKEN_CLOSE: u16 = 4003;

/// Derive the channel URL from the REST base URL: `http` becomes `ws`,
/// `https` becomes `wss`, `ws` is appended to the path and the session token
/// goes in the query string.
pub fn channel_url(base_url: &str, token: &str) -> Result<Url> {
  let mut url = Url::parse(base_url)?;
  let scheme = match url.scheme() {
    "http" => "ws",
    "https" => "wss",
    other => return Err(ClientError::Scheme(other.to_owned())),
  };
  url
    .set_scheme(scheme)
    .map_err(|()| ClientError::Scheme(url.scheme().to_owned()))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  let mut url = url.join("ws")?;
  url.query_pairs_mut().clear().append_pair("token", token);
  Ok(url)
}

// ─── Transport ────────────────────────────────────────────────────────────────

/// One inbound item from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
  Text(String),
  /// The peer closed the connection, with its close code if it sent one.
  Close(Option<u16>),
}

pub trait Connection: Send + 'static {
  /// The next inbound item. `None` once the stream has ended without a close
  /// frame.
  fn recv(&mut self) -> impl Future<Output = Option<Inbound>> + Send + '_;
}

pub trait Connector: Send + Sync + 'static {
  type Connection: Connection;

  fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Websocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

pub struct WebSocketConnection(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl Connector for WebSocketConnector {
  type Connection = WebSocketConnection;

  async fn connect(&self, url: &Url) -> Result<WebSocketConnection> {
    let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    Ok(WebSocketConnection(stream))
  }
}

impl Connection for WebSocketConnection {
  async fn recv(&mut self) -> Option<Inbound> {
    loop {
      match self.0.next().await? {
        Ok(Message::Text(text)) => return Some(Inbound::Text(text.as_str().to_owned())),
        Ok(Message::Close(frame)) => return Some(Inbound::Close(frame.map(|f| u16::from(f.code)))),
        Ok(_) => {}
        Err(e) => {
          debug!(error = %e, "websocket read failed");
          return None;
        }
      }
    }
  }
}

// ─── Channel ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  /// Never connected, or disconnected by the owner.
  Idle,
  Connecting,
  Open,
  /// Lost the connection; one reconnect is scheduled.
  Reconnecting,
  /// The server refused the token. Reconnecting would not help.
  Rejected,
}

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
  next_id: u64,
  entries: Vec<(u64, Handler)>,
}

/// State of the underlying connection. `generation` changes on every
/// `disconnect`, which retires any task started before it.
struct Link {
  state:      ChannelState,
  generation: u64,
  reader:     Option<JoinHandle<()>>,
  reconnect:  Option<JoinHandle<()>>,
}

struct Inner<C> {
  connector: C,
  url:       Url,
  backoff:   Duration,
  link:      Mutex<Link>,
  handlers:  Arc<Mutex<Handlers>>,
  /// Held while handlers run, so `disconnect` returns only once no delivery
  /// is in flight.
  delivery:  Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

/// Handle returned by [`RealtimeChannel::subscribe`].
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe to remove it"]
pub struct Subscription {
  id:       u64,
  handlers: Weak<Mutex<Handlers>>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    if let Some(handlers) = self.handlers.upgrade() {
      lock(&handlers).entries.retain(|(id, _)| *id != self.id);
    }
  }
}

/// An auto-reconnecting realtime channel scoped to one session.
///
/// Handlers run on the channel's reader task and must not call
/// [`RealtimeChannel::disconnect`] themselves.
pub struct RealtimeChannel<C: Connector> {
  inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for RealtimeChannel<C> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<C: Connector> RealtimeChannel<C> {
  pub fn new(connector: C, url: Url) -> Self { Self::with_backoff(connector, url, DEFAULT_RECONNECT_BACKOFF) }

  pub fn with_backoff(connector: C, url: Url, backoff: Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        connector,
        url,
        backoff,
        link: Mutex::new(Link {
          state:      ChannelState::Idle,
          generation: 0,
          reader:     None,
          reconnect:  None,
        }),
        handlers: Arc::default(),
        delivery: Mutex::new(()),
      }),
    }
  }

  pub fn state(&self) -> ChannelState { lock(&self.inner.link).state }

  pub fn is_open(&self) -> bool { self.state() == ChannelState::Open }

  /// Reconnect timers currently scheduled. Never more than one.
  pub fn pending_reconnect_timers(&self) -> usize {
    usize::from(lock(&self.inner.link).reconnect.is_some())
  }

  /// Open the channel. Does nothing while a connection is open or being
  /// established. A scheduled reconnect is replaced by an immediate attempt.
  pub fn connect(&self) {
    let mut link = lock(&self.inner.link);
    if matches!(link.state, ChannelState::Connecting | ChannelState::Open) {
      return;
    }
    start(&self.inner, &mut link);
  }

  /// Close the channel and cancel any scheduled reconnect. No handler runs
  /// again until the next [`connect`](Self::connect).
  pub fn disconnect(&self) {
    let _delivery = lock(&self.inner.delivery);
    let mut link = lock(&self.inner.link);
    link.generation += 1;
    link.state = ChannelState::Idle;
    if let Some(reader) = link.reader.take() {
      reader.abort();
    }
    if let Some(timer) = link.reconnect.take() {
      timer.abort();
    }
    info!(url = %redacted(&self.inner.url), "realtime channel disconnected");
  }

  /// Register `handler` for every inbound event. Handlers run in registration
  /// order.
  pub fn subscribe<F>(&self, handler: F) -> Subscription
  where
    F: Fn(&ServerEvent) + Send + Sync + 'static,
  {
    let mut handlers = lock(&self.inner.handlers);
    let id = handlers.next_id;
    handlers.next_id += 1;
    handlers.entries.push((id, Arc::new(handler)));
    Subscription { id, handlers: Arc::downgrade(&self.inner.handlers) }
  }
}

/// The channel URL without its token, for logs.
fn redacted(url: &Url) -> String {
  let mut url = url.clone();
  url.set_query(None);
  url.to_string()
}

fn start<C: Connector>(inner: &Arc<Inner<C>>, link: &mut Link) {
  if let Some(timer) = link.reconnect.take() {
    timer.abort();
  }
  link.state = ChannelState::Connecting;
  let generation = link.generation;
  link.reader = Some(tokio::spawn(run(inner.clone(), generation)));
}

async fn run<C: Connector>(inner: Arc<Inner<C>>, generation: u64) {
  let mut conn = match inner.connector.connect(&inner.url).await {
    Ok(conn) => conn,
    Err(e) => {
      warn!(error = %e, url = %redacted(&inner.url), "realtime connect failed");
      closed(&inner, generation, None);
      return;
    }
  };

  {
    let mut link = lock(&inner.link);
    if link.generation != generation {
      return;
    }
    link.state = ChannelState::Open;
    if let Some(timer) = link.reconnect.take() {
      timer.abort();
    }
  }
  info!(url = %redacted(&inner.url), "realtime channel open");

  loop {
    match conn.recv().await {
      Some(Inbound::Text(text)) => deliver(&inner, generation, &text),
      Some(Inbound::Close(code)) => return closed(&inner, generation, code),
      None => return closed(&inner, generation, None),
    }
  }
}

fn deliver<C: Connector>(inner: &Inner<C>, generation: u64, text: &str) {
  let event: ServerEvent = match serde_json::from_str(text) {
    Ok(event) => event,
    Err(e) => {
      warn!(error = %e, "undecodable realtime frame");
      return;
    }
  };

  let _delivery = lock(&inner.delivery);
  if lock(&inner.link).generation != generation {
    return;
  }
  let handlers: Vec<Handler> = lock(&inner.handlers).entries.iter().map(|(_, h)| h.clone()).collect();
  for handler in handlers {
    handler(&event);
  }
}

fn closed<C: Connector>(inner: &Arc<Inner<C>>, generation: u64, code: Option<u16>) {
  let mut link = lock(&inner.link);
  if link.generation != generation {
    return;
  }
  // The reader is the task running this; dropping its handle detaches it.
  link.reader = None;

  if code == Some(INVALID_TOKEN_CLOSE) {
    warn!("realtime channel rejected the session token");
    link.state = ChannelState::Rejected;
    return;
  }

  link.state = ChannelState::Reconnecting;
  if link.reconnect.is_some() {
    return;
  }
  debug!(backoff_ms = inner.backoff.as_millis() as u64, ?code, "scheduling reconnect");
  let timer_inner = inner.clone();
  link.reconnect = Some(tokio::spawn(async move {
    tokio::time::sleep(timer_inner.backoff).await;
    let mut link = lock(&timer_inner.link);
    if link.generation != generation || link.state != ChannelState::Reconnecting {
      return;
    }
    // This task is the timer; take its handle so `start` doesn't abort it.
    link.reconnect = None;
    info!("attempting realtime reconnect");
    start(&timer_inner, &mut link);
  }));
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use tokio::sync::mpsc;

  use super::*;

  // ── Fake transport ────────────────────────────────────────────────────────

  #[derive(Default)]
  struct FakeServer {
    attempts: AtomicUsize,
    refuse:   AtomicBool,
    peers:    Mutex<Vec<mpsc::UnboundedSender<Inbound>>>,
  }

  impl FakeServer {
    fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }

    fn latest(&self) -> mpsc::UnboundedSender<Inbound> {
      lock(&self.peers).last().cloned().expect("no connection yet")
    }

    fn push(&self, event: &ServerEvent) {
      self.latest().send(Inbound::Text(serde_json::to_string(event).unwrap())).unwrap();
    }

    /// Drop every server-side sender, ending the client's stream.
    fn drop_all(&self) { lock(&self.peers).clear(); }
  }

  #[derive(Clone, Default)]
  struct FakeConnector(Arc<FakeServer>);

  struct FakeConnection(mpsc::UnboundedReceiver<Inbound>);

  impl Connection for FakeConnection {
    async fn recv(&mut self) -> Option<Inbound> { self.0.recv().await }
  }

  impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, _url: &Url) -> Result<FakeConnection> {
      self.0.attempts.fetch_add(1, Ordering::SeqCst);
      if self.0.refuse.load(Ordering::SeqCst) {
        return Err(ClientError::Scheme("refused".into()));
      }
      let (tx, rx) = mpsc::unbounded_channel();
      lock(&self.0.peers).push(tx);
      Ok(FakeConnection(rx))
    }
  }

  fn channel() -> (RealtimeChannel<FakeConnector>, Arc<FakeServer>) {
    let connector = FakeConnector::default();
    let server = connector.0.clone();
    let url = channel_url("http://localhost:8080", "tok").unwrap();
    (RealtimeChannel::new(connector, url), server)
  }

  async fn settle() {
    for _ in 0..20 {
      tokio::task::yield_now().await;
    }
  }

  fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&ServerEvent) + Send + Sync>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log2 = log.clone();
    let make = move |name: &str| {
      let log = log2.clone();
      let name = name.to_owned();
      Box::new(move |event: &ServerEvent| {
        let id = event.incident().map_or(0, |a| a.id);
        lock(&log).push(format!("{name}:{id}"));
      }) as Box<dyn Fn(&ServerEvent) + Send + Sync>
    };
    (log, make)
  }

  fn panic_alert(id: i64) -> ServerEvent {
    use chrono::Utc;
    use gatehouse_core::alert::{AlertEvent, AlertPriority, AlertStatus};
    ServerEvent::PanicAlert {
      incident: AlertEvent {
        id,
        tenant_id: 1,
        reporter_id: 7,
        reporter_name: None,
        title: "SOS ALERT".into(),
        location: None,
        description: "fire".into(),
        priority: AlertPriority::Critical,
        status: AlertStatus::Open,
        created_at: Utc::now(),
        updated_at: None,
      },
    }
  }

  // ── URL ───────────────────────────────────────────────────────────────────

  #[test]
  fn channel_url_swaps_scheme_and_appends_token() {
    assert_eq!(
      channel_url("http://localhost:8080", "abc").unwrap().as_str(),
      "ws://localhost:8080/ws?token=abc"
    );
    assert_eq!(
      channel_url("https://estate.example/api", "a b").unwrap().as_str(),
      "wss://estate.example/api/ws?token=a+b"
    );
    assert!(matches!(
      channel_url("ftp://estate.example", "abc"),
      Err(ClientError::Scheme(_))
    ));
  }

  // ── Connection lifecycle ──────────────────────────────────────────────────

  #[tokio::test(start_paused = true)]
  async fn connect_is_idempotent() {
    let (channel, server) = channel();
    channel.connect();
    channel.connect();
    settle().await;
    channel.connect();
    settle().await;

    assert_eq!(server.attempts(), 1);
    assert_eq!(channel.state(), ChannelState::Open);
  }

  #[tokio::test(start_paused = true)]
  async fn handlers_run_in_registration_order() {
    let (channel, server) = channel();
    let (log, make) = recorder();
    let first = channel.subscribe(make("a"));
    let _second = channel.subscribe(make("b"));
    channel.connect();
    settle().await;

    server.push(&panic_alert(1));
    server.push(&panic_alert(2));
    settle().await;
    assert_eq!(*lock(&log), ["a:1", "b:1", "a:2", "b:2"]);

    first.unsubscribe();
    server.push(&panic_alert(3));
    settle().await;
    assert_eq!(lock(&log).last().map(String::as_str), Some("b:3"));
    assert_eq!(lock(&log).len(), 5);
  }

  #[tokio::test(start_paused = true)]
  async fn repeated_drops_never_stack_timers() {
    let (channel, server) = channel();
    channel.connect();
    settle().await;

    for round in 1..=5 {
      server.drop_all();
      settle().await;
      assert_eq!(channel.state(), ChannelState::Reconnecting);
      assert_eq!(channel.pending_reconnect_timers(), 1);

      // Asking to connect while a timer is pending replaces the timer.
      if round % 2 == 0 {
        channel.connect();
        settle().await;
        assert_eq!(channel.pending_reconnect_timers(), 0);
      } else {
        tokio::time::advance(DEFAULT_RECONNECT_BACKOFF).await;
        settle().await;
      }

      assert!(channel.pending_reconnect_timers() <= 1);
      assert_eq!(channel.state(), ChannelState::Open);
      assert_eq!(server.attempts(), round + 1);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn refused_connect_schedules_one_retry() {
    let (channel, server) = channel();
    server.refuse.store(true, Ordering::SeqCst);
    channel.connect();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Reconnecting);
    assert_eq!(channel.pending_reconnect_timers(), 1);

    server.refuse.store(false, Ordering::SeqCst);
    tokio::time::advance(DEFAULT_RECONNECT_BACKOFF).await;
    settle().await;
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(server.attempts(), 2);
    assert_eq!(channel.pending_reconnect_timers(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn disconnect_cancels_timer_and_silences_handlers() {
    let (channel, server) = channel();
    let (log, make) = recorder();
    let _sub = channel.subscribe(make("a"));
    channel.connect();
    settle().await;

    server.drop_all();
    settle().await;
    assert_eq!(channel.pending_reconnect_timers(), 1);

    channel.disconnect();
    assert_eq!(channel.pending_reconnect_timers(), 0);
    assert_eq!(channel.state(), ChannelState::Idle);

    tokio::time::advance(DEFAULT_RECONNECT_BACKOFF * 3).await;
    settle().await;
    assert_eq!(server.attempts(), 1);
    assert!(lock(&log).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn disconnect_while_open_stops_delivery() {
    let (channel, server) = channel();
    let (log, make) = recorder();
    let _sub = channel.subscribe(make("a"));
    channel.connect();
    settle().await;
    let sender = server.latest();

    channel.disconnect();
    let _ = sender.send(Inbound::Text(serde_json::to_string(&panic_alert(4)).unwrap()));
    settle().await;
    assert!(lock(&log).is_empty());

    // A fresh connect delivers again.
    channel.connect();
    settle().await;
    server.push(&panic_alert(5));
    settle().await;
    assert_eq!(*lock(&log), ["a:5"]);
  }

  #[tokio::test(start_paused = true)]
  async fn invalid_token_close_is_not_retried() {
    let (channel, server) = channel();
    channel.connect();
    settle().await;

    server.latest().send(Inbound::Close(Some(INVALID_TOKEN_CLOSE))).unwrap();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Rejected);
    assert_eq!(channel.pending_reconnect_timers(), 0);

    tokio::time::advance(DEFAULT_RECONNECT_BACKOFF * 2).await;
    settle().await;
    assert_eq!(server.attempts(), 1);
  }
}
