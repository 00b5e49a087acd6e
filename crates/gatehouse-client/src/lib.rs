//! Guard/admin client for the gatehouse.
//!
//! - [`client::ApiClient`]: the REST API.
//! - [`realtime::RealtimeChannel`]: the auto-reconnecting push channel.
//! - [`escalation::EscalationController`]: drives local attention-getting
//!   until an open alert is acknowledged, with a poll backstop.
//! - [`sos::SosReporter`]: raises an SOS with a local fallback confirmation.

pub mod client;
pub mod error;
pub mod escalation;
pub mod realtime;
pub mod sos;

pub use client::{ApiClient, ApiConfig};
pub use error::{ClientError, Result};
