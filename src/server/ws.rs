//! Real-time channel: frames (base64 JPEG), detection lists, and service
//! events pushed to every connected listener. Disconnects are silent and
//! never affect other listeners or the publisher.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::capture::Frame;

use super::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut frames = state.broadcaster.subscribe();
    let mut events = state.events.subscribe();

    let cfg = crate::CONFIG.load_full();
    // Frames are throttled below the camera rate; events pass through as-is
    let min_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.server.ws_fps.max(1)));
    let mut last_sent: Option<Instant> = None;

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if last_sent.is_some_and(|t| t.elapsed() < min_interval) {
                        continue;
                    }
                    last_sent = Some(Instant::now());
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    state.broadcaster.note_lagged(n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            ev = events.recv() => match ev {
                Ok(ev) => {
                    let Ok(payload) = serde_json::to_string(&ev) else { continue };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                // Clients only send keepalives; ignore the content
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    debug!("websocket listener disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let ts = frame.unix_ts();
    let msg = json!({
        "type": "frame",
        "data": BASE64.encode(&frame.data),
        "ts": ts,
    });
    socket.send(Message::Text(msg.to_string())).await?;

    // Detections go out even when empty so the UI can clear stale boxes
    let msg = json!({
        "type": "detections",
        "detections": frame.meta.detections,
        "ts": ts,
    });
    socket.send(Message::Text(msg.to_string())).await
}
