//! Persistent WebSocket connection carrying the server-pushed change feed
//! (§6 WebSocket protocol).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use sync_core::{Note, SyncError, SyncResult};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const RECONNECT_BACKOFF_STEP: Duration = Duration::from_secs(2);

/// One message exchanged over the sync WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    NoteUpdate { note: Note },
    NoteDelete { note_id: String },
    Conflict { note_id: String, path: Option<String> },
    Ack { note_id: String },
    Ping,
    Pong,
    SyncRequest,
    SyncResponse { workspace_id: String },
    /// Synthetic event surfaced locally after exhausting reconnect attempts;
    /// never sent over the wire.
    ReconnectFailed,
}

/// Consumer side of the live change feed.
#[async_trait]
pub trait RemoteEvents: Send + Sync {
    /// Blocks until the next event, reconnecting internally as needed.
    async fn recv(&mut self) -> SyncResult<WsEvent>;
}

/// `tokio-tungstenite`-backed implementation of [`RemoteEvents`], owning a
/// background task that keeps the socket alive, answers pings, sends its
/// own keepalive ping, and reconnects with linear backoff.
pub struct WsRemoteEvents {
    inbox: mpsc::Receiver<SyncResult<WsEvent>>,
    _task: tokio::task::JoinHandle<()>,
}

impl WsRemoteEvents {
    pub fn connect(url: String, token: String) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run_connection_loop(url, token, tx));
        Self { inbox: rx, _task: task }
    }
}

#[async_trait]
impl RemoteEvents for WsRemoteEvents {
    async fn recv(&mut self) -> SyncResult<WsEvent> {
        match self.inbox.recv().await {
            Some(result) => result,
            None => Err(SyncError::SyncTransient("event feed closed".into())),
        }
    }
}

async fn run_connection_loop(url: String, token: String, tx: mpsc::Sender<SyncResult<WsEvent>>) {
    let mut attempt: u32 = 0;
    loop {
        let full_url = format!("{url}?token={token}");
        match tokio_tungstenite::connect_async(&full_url).await {
            Ok((stream, _response)) => {
                attempt = 0;
                info!("sync websocket connected");
                if run_session(stream, &tx).await.is_err() {
                    warn!("sync websocket session ended");
                }
            }
            Err(e) => {
                warn!(error = %e, "sync websocket connect failed");
            }
        }

        if tx.is_closed() {
            return;
        }

        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            let _ = tx.send(Ok(WsEvent::ReconnectFailed)).await;
            return;
        }
        tokio::time::sleep(RECONNECT_BACKOFF_STEP * attempt).await;
    }
}

async fn run_session(
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tx: &mpsc::Sender<SyncResult<WsEvent>>,
) -> Result<(), ()> {
    let (mut write, mut read) = stream.split();
    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    ping_ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                let payload = serde_json::to_string(&WsEvent::Ping).unwrap_or_default();
                if write.send(Message::Text(payload)).await.is_err() {
                    return Err(());
                }
            }
            msg = read.next() => {
                let Some(msg) = msg else { return Err(()) };
                let Ok(msg) = msg else { return Err(()) };
                match msg {
                    Message::Text(text) => {
                        let Ok(event) = serde_json::from_str::<WsEvent>(&text) else {
                            debug!(%text, "ignoring unrecognized websocket payload");
                            continue;
                        };
                        if matches!(event, WsEvent::Ping) {
                            let payload = serde_json::to_string(&WsEvent::Pong).unwrap_or_default();
                            if write.send(Message::Text(payload)).await.is_err() {
                                return Err(());
                            }
                            continue;
                        }
                        if matches!(event, WsEvent::Pong) {
                            continue;
                        }
                        if tx.send(Ok(event)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Message::Close(_) => return Err(()),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_round_trip_through_json() {
        let event = WsEvent::Conflict { note_id: "n1".into(), path: Some("a.md".into()) };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"conflict\""));
        let back: WsEvent = serde_json::from_str(&json).unwrap();
        match back {
            WsEvent::Conflict { note_id, path } => {
                assert_eq!(note_id, "n1");
                assert_eq!(path.as_deref(), Some("a.md"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn ping_and_pong_serialize_without_payload() {
        let json = serde_json::to_string(&WsEvent::Ping).unwrap();
        assert_eq!(json, "{\"type\":\"ping\"}");
    }
}
