//! Server wiring for the gatehouse: configuration and the HTTP stack that
//! wraps [`gatehouse_api::api_router`].

use std::path::PathBuf;

use axum::Router;
use chrono::Duration;
use gatehouse_api::{ApiOptions, AppState, api_router};
use gatehouse_core::store::GateStore;
use serde::Deserialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Top-level server configuration, read from `gatehouse.toml` and
/// `GATEHOUSE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                    String,
  #[serde(default = "default_port")]
  pub port:                    u16,
  #[serde(default = "default_store_path")]
  pub store_path:              PathBuf,
  /// Collapse repeated SOS presses from one reporter within this many
  /// seconds. Unset keeps one alert per press.
  #[serde(default)]
  pub sos_dedup_window_secs:   Option<u64>,
  /// Refuse QR payloads stamped more than this many seconds ago.
  #[serde(default)]
  pub credential_max_age_secs: Option<u64>,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/gatehouse/gatehouse.db") }

fn seconds(secs: Option<u64>) -> Option<Duration> {
  secs.and_then(|s| i64::try_from(s).ok()).map(Duration::seconds)
}

impl ServerConfig {
  pub fn api_options(&self) -> ApiOptions {
    ApiOptions {
      credential_max_age: seconds(self.credential_max_age_secs),
      sos_dedup_window:   seconds(self.sos_dedup_window_secs),
    }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

// ─── HTTP stack ───────────────────────────────────────────────────────────────

/// The API router with request tracing applied.
pub fn app<S>(state: AppState<S>) -> Router
where
  S: GateStore + Clone + 'static,
{
  api_router(state).layer(
    TraceLayer::new_for_http()
      .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
      .on_request(DefaultOnRequest::new().level(Level::INFO))
      .on_response(DefaultOnResponse::new().level(Level::INFO)),
  )
}
