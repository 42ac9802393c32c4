use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rpc;
use crate::state::SharedState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Every text frame carries one request and is answered by exactly one frame.
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("new WebSocket connection: {connection_id}");

    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!("request on {connection_id}: len={}", text.len());
                let reply = rpc::dispatch_text(&state, text.as_str()).await;
                let body = match serde_json::to_string(&reply) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("failed to encode reply on {connection_id}: {e}");
                        break;
                    }
                };
                if sender.send(Message::Text(body.into())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed: {connection_id}");
                break;
            }
            Err(e) => {
                warn!("WebSocket error on {connection_id}: {e}");
                break;
            }
            _ => {}
        }
    }

    debug!("connection finished: {connection_id}");
}
