//! Async HTTP client wrapping the gatehouse JSON API.
//!
//! Every mutating call returns the server's copy of the record. Callers show
//! that object as-is rather than patching their own state.

use std::time::Duration;

use gatehouse_core::{
  access_log::{AccessLogEntry, AccessMethod, Direction},
  alert::{AlertEvent, AlertId, AlertStatus, TriggerOutcome},
  subject::{StaffId, StaffMember, Subject, UserId},
  visit::{CheckOutReceipt, Visit, VisitId},
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use url::Url;

use crate::{
  error::{ClientError, Result},
  escalation::IncidentApi,
  realtime::channel_url,
  sos::SosApi,
};

/// Connection settings for the gatehouse API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  /// Bearer token of the signed-in session.
  pub token:    String,
}

/// Async HTTP client for the gatehouse REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

#[derive(Deserialize)]
struct ErrorBody {
  error: String,
  code:  String,
}

/// Turn a non-success response into a [`ClientError`].
async fn check(resp: Response) -> Result<Response> {
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }
  if status == StatusCode::UNAUTHORIZED {
    return Err(ClientError::Unauthorized);
  }
  let text = resp.text().await.unwrap_or_default();
  let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
    Ok(body) => (body.code, body.error),
    Err(_) => ("http".to_string(), text),
  };
  Err(ClientError::Api { status: status.as_u16(), code, message })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
  Ok(check(resp).await?.json().await?)
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    Ok(Self { client, config })
  }

  pub fn config(&self) -> &ApiConfig { &self.config }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder { req.bearer_auth(&self.config.token) }

  /// The realtime channel URL for this session.
  pub fn channel_url(&self) -> Result<Url> { channel_url(&self.config.base_url, &self.config.token) }

  // ── Credentials ───────────────────────────────────────────────────────────

  /// `POST /credentials/resolve`
  pub async fn resolve(&self, credential: &str) -> Result<Subject> {
    let resp = self
      .auth(self.client.post(self.url("/credentials/resolve")))
      .json(&json!({ "credential": credential }))
      .send()
      .await?;
    decode(resp).await
  }

  /// `GET /visitors/by-code/{code}`
  pub async fn visitor_by_code(&self, code: &str) -> Result<Visit> {
    let resp = self
      .auth(self.client.get(self.url(&format!("/visitors/by-code/{code}"))))
      .send()
      .await?;
    decode(resp).await
  }

  /// `GET /staff/by-code/{code}`
  pub async fn staff_by_code(&self, code: &str) -> Result<StaffMember> {
    let resp = self
      .auth(self.client.get(self.url(&format!("/staff/by-code/{code}"))))
      .send()
      .await?;
    decode(resp).await
  }

  // ── Visits ────────────────────────────────────────────────────────────────

  /// `POST /visitors/{id}/check-in`
  pub async fn check_in(&self, id: VisitId, items_in: Option<&str>) -> Result<Visit> {
    let resp = self
      .auth(self.client.post(self.url(&format!("/visitors/{id}/check-in"))))
      .json(&json!({ "items_in": items_in }))
      .send()
      .await?;
    decode(resp).await
  }

  /// `POST /visitors/{id}/check-out`
  pub async fn check_out(&self, id: VisitId, items_out: Option<&str>) -> Result<CheckOutReceipt> {
    let resp = self
      .auth(self.client.post(self.url(&format!("/visitors/{id}/check-out"))))
      .json(&json!({ "items_out": items_out }))
      .send()
      .await?;
    decode(resp).await
  }

  /// `POST /visitors/{id}/deny`
  pub async fn deny(&self, id: VisitId) -> Result<Visit> {
    let resp = self
      .auth(self.client.post(self.url(&format!("/visitors/{id}/deny"))))
      .send()
      .await?;
    decode(resp).await
  }

  /// `POST /staff/{id}/clock-in`
  pub async fn clock_in(&self, id: StaffId, items_in: Option<&str>) -> Result<Visit> {
    let resp = self
      .auth(self.client.post(self.url(&format!("/staff/{id}/clock-in"))))
      .json(&json!({ "items_in": items_in }))
      .send()
      .await?;
    decode(resp).await
  }

  /// `POST /staff/{id}/clock-out`
  pub async fn clock_out(&self, id: StaffId, items_out: Option<&str>) -> Result<CheckOutReceipt> {
    let resp = self
      .auth(self.client.post(self.url(&format!("/staff/{id}/clock-out"))))
      .json(&json!({ "items_out": items_out }))
      .send()
      .await?;
    decode(resp).await
  }

  // ── Access logs ───────────────────────────────────────────────────────────

  /// `POST /access-logs`
  pub async fn log_access(
    &self,
    user_id: UserId,
    direction: Direction,
    method: AccessMethod,
  ) -> Result<AccessLogEntry> {
    let resp = self
      .auth(self.client.post(self.url("/access-logs")))
      .json(&json!({ "user_id": user_id, "direction": direction, "method": method }))
      .send()
      .await?;
    decode(resp).await
  }

  // ── Incidents ─────────────────────────────────────────────────────────────

  /// `POST /incidents/sos`
  pub async fn trigger_sos(
    &self,
    location: Option<&str>,
    description: Option<&str>,
  ) -> Result<TriggerOutcome> {
    let resp = self
      .auth(self.client.post(self.url("/incidents/sos")))
      .json(&json!({ "location": location, "description": description }))
      .send()
      .await?;
    decode(resp).await
  }

  /// `PATCH /incidents/{id}/status`
  pub async fn set_alert_status(&self, id: AlertId, status: AlertStatus) -> Result<AlertEvent> {
    let resp = self
      .auth(self.client.patch(self.url(&format!("/incidents/{id}/status"))))
      .json(&json!({ "status": status }))
      .send()
      .await?;
    decode(resp).await
  }

  /// `GET /incidents?status=open`
  pub async fn open_alerts(&self) -> Result<Vec<AlertEvent>> {
    let resp = self
      .auth(self.client.get(self.url("/incidents")))
      .query(&[("status", AlertStatus::Open.as_ref())])
      .send()
      .await?;
    decode(resp).await
  }

  // ── Users ─────────────────────────────────────────────────────────────────

  /// `PUT /users/{id}`
  pub async fn register_push_token(&self, user_id: UserId, push_token: &str) -> Result<()> {
    let resp = self
      .auth(self.client.put(self.url(&format!("/users/{user_id}"))))
      .json(&json!({ "push_token": push_token }))
      .send()
      .await?;
    check(resp).await?;
    Ok(())
  }
}

impl IncidentApi for ApiClient {
  async fn acknowledge(&self, id: AlertId) -> Result<AlertEvent> {
    self.set_alert_status(id, AlertStatus::Acknowledged).await
  }

  async fn open_alerts(&self) -> Result<Vec<AlertEvent>> { ApiClient::open_alerts(self).await }
}

impl SosApi for ApiClient {
  async fn trigger(&self, location: Option<&str>, description: Option<&str>) -> Result<TriggerOutcome> {
    self.trigger_sos(location, description).await
  }
}
