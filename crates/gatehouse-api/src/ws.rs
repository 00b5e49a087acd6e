//! `GET /ws?token=...`: the realtime channel.
//!
//! The server only pushes. Inbound frames other than close are ignored. An
//! unknown or expired token gets the socket closed with code 4003.

use std::sync::Arc;

use axum::{
  extract::{
    Query, State,
    ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
  },
  response::Response,
};
use futures::{SinkExt as _, StreamExt as _};
use gatehouse_core::{Error as CoreError, realtime::ChannelSubscription, store::GateStore};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{AppState, auth::authenticate, hub::AlertHub};

/// Close code sent when the channel token is rejected.
pub const INVALID_TOKEN_CLOSE: u16 = 4003;

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
  pub token: Option<String>,
}

pub async fn upgrade<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ChannelParams>,
  ws: WebSocketUpgrade,
) -> Response
where
  S: GateStore + Clone + 'static,
{
  let token = params.token.unwrap_or_default();
  let session = match authenticate(state.store.as_ref(), &token).await {
    Ok(session) => Some(session),
    Err(CoreError::Unauthorized) => None,
    Err(e) => {
      warn!(error = %e, "session lookup failed for realtime channel");
      None
    }
  };

  let hub = state.hub.clone();
  ws.on_upgrade(move |socket| async move {
    match session {
      Some(session) => {
        let subscription =
          ChannelSubscription::new(session.user_id, session.tenant_id, session.role);
        serve(socket, hub, subscription).await;
      }
      None => reject(socket).await,
    }
  })
}

async fn reject(mut socket: WebSocket) {
  let frame = CloseFrame { code: INVALID_TOKEN_CLOSE, reason: "invalid token".into() };
  if let Err(e) = socket.send(Message::Close(Some(frame))).await {
    warn!(error = %e, "failed to send close frame");
  }
}

async fn serve(socket: WebSocket, hub: Arc<AlertHub>, subscription: ChannelSubscription) {
  let session_id = subscription.session_id;
  let tenant_id = subscription.tenant_id;
  let user_id = subscription.user_id;

  let mut outbound = hub.attach(subscription);
  let (mut sink, mut inbound) = socket.split();
  info!(%session_id, tenant_id, user_id, "realtime channel open");

  loop {
    tokio::select! {
      frame = outbound.recv() => {
        let Some(frame) = frame else { break };
        if sink.send(Message::Text(frame.into())).await.is_err() {
          break;
        }
      }
      msg = inbound.next() => match msg {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
    }
  }

  hub.detach(tenant_id, session_id);
  info!(%session_id, tenant_id, "realtime channel closed");
}

#[cfg(test)]
mod tests {
  use futures::StreamExt as _;
  use gatehouse_core::{
    dispatcher::{AlertDispatcher, SosReport},
    session::Session,
    store::{GateStore, NewUser},
    subject::Role,
  };
  use gatehouse_store_sqlite::SqliteStore;
  use tokio::net::TcpListener;
  use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

  use crate::{ApiOptions, AppState, api_router, auth::token_digest};

  async fn serve() -> (String, AppState<SqliteStore>) {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let guard = store
      .insert_user(1, NewUser { full_name: "Gate 1".into(), role: Role::Guard, house_address: None })
      .await
      .unwrap();
    store
      .insert_session(token_digest("guard-token"), Session {
        user_id:    guard.id,
        tenant_id:  1,
        role:       Role::Guard,
        expires_at: None,
      })
      .await
      .unwrap();

    let state = AppState::new(store, ApiOptions::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api_router(state.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("ws://{addr}/ws"), state)
  }

  #[tokio::test]
  async fn bad_token_is_closed_with_4003() {
    let (url, _state) = serve().await;
    let (mut socket, _) = connect_async(format!("{url}?token=nope")).await.unwrap();

    let frame = loop {
      match socket.next().await {
        Some(Ok(WsMessage::Close(frame))) => break frame,
        Some(Ok(_)) => continue,
        other => panic!("expected close frame, got {other:?}"),
      }
    };
    assert_eq!(frame.map(|f| u16::from(f.code)), Some(super::INVALID_TOKEN_CLOSE));
  }

  #[tokio::test]
  async fn connected_guard_receives_panic_alert() {
    let (url, state) = serve().await;
    let (mut socket, _) = connect_async(format!("{url}?token=guard-token")).await.unwrap();

    // Wait for the socket task to attach before publishing.
    for _ in 0..100 {
      if state.hub.connected(1) == 1 {
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(state.hub.connected(1), 1);

    let reporter = state
      .store
      .insert_user(1, NewUser { full_name: "Ada".into(), role: Role::Resident, house_address: None })
      .await
      .unwrap();
    let outcome = AlertDispatcher::new(state.store.as_ref(), state.hub.as_ref())
      .trigger(1, reporter.id, SosReport { description: Some("fire".into()), ..Default::default() })
      .await
      .unwrap();
    assert_eq!(outcome.delivered_to, 1);

    let Some(Ok(WsMessage::Text(text))) = socket.next().await else {
      panic!("expected a text frame");
    };
    let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(json["type"], "panic_alert");
    assert_eq!(json["incident"]["description"], "fire");
  }
}
