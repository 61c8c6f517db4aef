//! Live event stream

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use sysohub_api::events::WsEvent;

use crate::state::AppState;

/// Upgrade to a WebSocket streaming `WsEvent` JSON messages
///
/// The first message carries the current store so observers need not wait
/// for the next reading.
#[utoipa::path(
    get,
    path = "/ws/events",
    tag = "events",
    responses((status = 101, description = "Switching to WebSocket", body = WsEvent))
)]
pub async fn events(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: Arc<AppState>) {
    // subscribe first so nothing published during the initial probe is missed
    let mut events = state.events.subscribe();

    let dashboard = state.dashboard().await;
    let initial = WsEvent::DataUpdate {
        data: serde_json::Value::Object(serde_json::Map::new()),
        store: dashboard.store,
        services: dashboard.services,
        system: dashboard.system,
    };
    if send(&mut socket, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "observer lagged, skipping to newest events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("observer disconnected");
}

async fn send(socket: &mut WebSocket, event: &WsEvent) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode event");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
