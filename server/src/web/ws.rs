use axum::extract::{
    ConnectInfo, State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;

use crate::session::Session;
use crate::state::AppState;

const CLIENT_BUFFER_SIZE: usize = 32;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::info!(client.addr = %addr, "WebSocket connection attempt");
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state, addr))
}

#[tracing::instrument(skip(socket, app_state))]
pub async fn handle_socket(socket: WebSocket, app_state: AppState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::channel::<ws::Message>(CLIENT_BUFFER_SIZE);

    let mut session = Session::new(app_state.lobby_manager.clone(), client_tx);
    let client_id = session.connection_id();
    tracing::info!(client.id = %client_id, "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = client_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::info!(
                    client.id = %client_id,
                    "WS send error, client likely disconnected"
                );
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(client.id = %client_id, "Send task finished");
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(ws::Message::Text(text))) => {
                    tracing::trace!(client.id = %client_id, event.raw = %text.as_str(), "Received text frame");
                    session.handle_text(text.as_str()).await;
                }
                Some(Ok(ws::Message::Binary(_))) => {
                    tracing::debug!(client.id = %client_id, "Received binary message (ignored)");
                }
                Some(Ok(ws::Message::Ping(_) | ws::Message::Pong(_))) => {}
                Some(Ok(ws::Message::Close(_))) | None => {
                    tracing::info!(client.id = %client_id, "WebSocket closed by client");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(client.id = %client_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    if let Some((code, player_id)) = session.bound_player() {
        tracing::info!(
            client.id = %client_id,
            lobby.code = %code,
            player.id = %player_id,
            "Client left while bound to a lobby"
        );
    }
    session.detach().await;
    send_task.abort();
    tracing::info!(client.id = %client_id, "WebSocket client fully disconnected");
}
