//! `/ws` feed of backup lifecycle events for the UI.
//!
//! Clients that reconnect send `{"type":"replay:request","payload":{"since":ms}}`
//! (optionally with a `backupId`) and receive the recent events they missed.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;
const RECENT_EVENTS: usize = 100;

#[derive(Debug, Clone)]
pub struct RecentEvent {
    pub backup_id: String,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl RecentEvent {
    fn to_message(&self) -> String {
        json!({ "type": self.event_type, "payload": self.payload }).to_string()
    }
}

#[derive(Clone)]
pub struct UiBroadcaster {
    tx: broadcast::Sender<String>,
    recent: Arc<Mutex<VecDeque<RecentEvent>>>,
}

impl Default for UiBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl UiBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_EVENTS))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Send `event_type` to every connected client and remember it for
    /// replay. A deletion forgets the backup's earlier events instead.
    pub fn broadcast(&self, event_type: &str, payload: Value) {
        if let Some(backup_id) = payload.get("backupId").and_then(Value::as_str) {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if event_type == "backup:deleted" {
                recent.retain(|e| e.backup_id != backup_id);
            } else {
                if recent.len() == RECENT_EVENTS {
                    recent.pop_front();
                }
                recent.push_back(RecentEvent {
                    backup_id: backup_id.to_string(),
                    event_type: event_type.to_string(),
                    payload: payload.clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
            }
        }

        let _ = self.tx.send(json!({ "type": event_type, "payload": payload }).to_string());
    }

    /// Events newer than `since` (epoch ms), oldest first.
    pub fn replay(&self, backup_id: Option<&str>, since: i64) -> Vec<RecentEvent> {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent
            .iter()
            .filter(|e| e.timestamp > since)
            .filter(|e| backup_id.map_or(true, |id| e.backup_id == id))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    fn recent_len(&self) -> usize {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_client(socket, state))
}

async fn serve_client(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.ui.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Ok(msg) = events.recv() => msg,
                Some(msg) = reply_rx.recv() => msg,
                else => break,
            };
            if sink.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let ui = state.ui.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            let Message::Text(text) = msg else { continue };
            let Some((backup_id, since)) = parse_replay_request(&text) else { continue };
            for event in ui.replay(backup_id.as_deref(), since) {
                if reply_tx.send(event.to_message()).is_err() {
                    return;
                }
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
}

fn parse_replay_request(text: &str) -> Option<(Option<String>, i64)> {
    let parsed: Value = serde_json::from_str(text).ok()?;
    if parsed.get("type")?.as_str()? != "replay:request" {
        return None;
    }
    let payload = parsed.get("payload");
    let backup_id = payload
        .and_then(|p| p.get("backupId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let since = payload.and_then(|p| p.get("since")).and_then(Value::as_i64).unwrap_or(0);
    Some((backup_id, since))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let ui = UiBroadcaster::new();
        let mut rx = ui.subscribe();
        ui.broadcast("backup:restored", json!({ "backupId": "b1", "recordsRestored": 3 }));

        let msg: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "backup:restored");
        assert_eq!(msg["payload"]["recordsRestored"], 3);
    }

    #[test]
    fn test_replay_is_bounded() {
        let ui = UiBroadcaster::new();
        for i in 0..(RECENT_EVENTS + 25) {
            ui.broadcast("backup:created", json!({ "backupId": format!("b{i}") }));
        }
        assert_eq!(ui.recent_len(), RECENT_EVENTS);

        let all = ui.replay(None, 0);
        assert_eq!(all.first().unwrap().backup_id, "b25");
        assert_eq!(ui.replay(Some("b30"), 0).len(), 1);
        assert!(ui.replay(Some("b0"), 0).is_empty());
    }

    #[test]
    fn test_deleted_backups_are_forgotten() {
        let ui = UiBroadcaster::new();
        for i in 0..50 {
            let id = format!("b{i}");
            ui.broadcast("backup:created", json!({ "backupId": id }));
            ui.broadcast("backup:deleted", json!({ "backupId": id }));
        }
        ui.broadcast("backup:created", json!({ "backupId": "kept" }));

        assert_eq!(ui.recent_len(), 1);
        assert!(ui.replay(Some("b7"), 0).is_empty());
        assert_eq!(ui.replay(None, 0)[0].backup_id, "kept");
    }

    #[test]
    fn test_parse_replay_request() {
        let req = r#"{"type":"replay:request","payload":{"backupId":"b1","since":42}}"#;
        assert_eq!(parse_replay_request(req), Some((Some("b1".to_string()), 42)));
        assert_eq!(parse_replay_request(r#"{"type":"replay:request"}"#), Some((None, 0)));
        assert_eq!(parse_replay_request(r#"{"type":"ping"}"#), None);
        assert_eq!(parse_replay_request("not json"), None);
    }
}
