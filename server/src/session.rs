use axum::extract::ws;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game_logic::messages::client_message_from_ws_text;
use crate::game_logic::{
    ActionEffect, ClientToServerMessage, GameError, LobbyCode, PlayerId, PromptSelection,
    ScoringMode, ServerToClientMessage,
};
use crate::lobby::{LobbyActorHandle, LobbyManagerHandle};

struct Binding {
    lobby: LobbyActorHandle,
    player_id: PlayerId,
}

/// Per-connection context. Once bound, in-lobby actions need no lobby code
/// or player id from the client.
pub struct Session {
    connection_id: Uuid,
    client_tx: mpsc::Sender<ws::Message>,
    lobby_manager: LobbyManagerHandle,
    binding: Option<Binding>,
}

impl Session {
    pub fn new(lobby_manager: LobbyManagerHandle, client_tx: mpsc::Sender<ws::Message>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            client_tx,
            lobby_manager,
            binding: None,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn bound_player(&self) -> Option<(&LobbyCode, PlayerId)> {
        self.binding
            .as_ref()
            .map(|b| (&b.lobby.code, b.player_id))
    }

    /// Parses and runs one client frame. Failures are reported to this
    /// client only.
    #[tracing::instrument(skip(self, text), fields(client.id = %self.connection_id))]
    pub async fn handle_text(&mut self, text: &str) {
        let message = match client_message_from_ws_text(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, event.raw = %text, "Failed to deserialize client message");
                self.send(ServerToClientMessage::Error {
                    code: "PARSE_ERROR".to_string(),
                    message: format!("Invalid message format: {e}"),
                })
                .await;
                return;
            }
        };

        if let Err(err) = self.handle_message(message).await {
            tracing::debug!(error = %err, code = err.code(), "Client request failed");
            self.send(ServerToClientMessage::error(&err)).await;
        }
    }

    pub async fn handle_message(&mut self, message: ClientToServerMessage) -> Result<(), GameError> {
        let action = match message.into_action() {
            Ok(action) => action,
            Err(ClientToServerMessage::CreateLobby {
                display_name,
                scoring_mode,
                prompt_selection,
            }) => {
                return self
                    .create_lobby(display_name, scoring_mode, prompt_selection)
                    .await;
            }
            Err(ClientToServerMessage::JoinLobby {
                lobby_code,
                display_name,
            }) => return self.join_lobby(&lobby_code, display_name).await,
            Err(ClientToServerMessage::Reconnect {
                lobby_code,
                player_id,
            }) => return self.reconnect(&lobby_code, player_id).await,
            Err(other) => {
                return Err(GameError::Validation(format!(
                    "unsupported message: {other:?}"
                )));
            }
        };

        let binding = self.binding.as_ref().ok_or_else(|| {
            GameError::NotFound("create or join a lobby first".to_string())
        })?;
        let effect = binding.lobby.act(self.connection_id, action).await?;
        if effect != ActionEffect::Continue {
            self.binding = None;
        }
        Ok(())
    }

    async fn create_lobby(
        &mut self,
        display_name: String,
        scoring_mode: Option<ScoringMode>,
        prompt_selection: Option<PromptSelection>,
    ) -> Result<(), GameError> {
        self.detach().await;
        let lobby = self.lobby_manager.create_lobby().await?;
        let player_id = lobby
            .create(
                self.connection_id,
                self.client_tx.clone(),
                display_name,
                scoring_mode,
                prompt_selection,
            )
            .await?;
        tracing::info!(lobby.code = %lobby.code, player.id = %player_id, "Session created lobby");
        self.binding = Some(Binding { lobby, player_id });
        Ok(())
    }

    async fn join_lobby(&mut self, raw_code: &str, display_name: String) -> Result<(), GameError> {
        let code = LobbyCode::parse(raw_code)?;
        self.detach().await;

        let mut lobby = self.lobby_manager.get_lobby_handle(code.clone()).await?;
        let joined = lobby
            .join(self.connection_id, self.client_tx.clone(), display_name.clone())
            .await;
        let player_id = match joined {
            // The actor idled out between lookup and send. Look it up again.
            Err(GameError::Unavailable(_)) => {
                lobby = self.lobby_manager.get_lobby_handle(code).await?;
                lobby
                    .join(self.connection_id, self.client_tx.clone(), display_name)
                    .await?
            }
            other => other?,
        };

        self.binding = Some(Binding { lobby, player_id });
        Ok(())
    }

    async fn reconnect(&mut self, raw_code: &str, player_id: PlayerId) -> Result<(), GameError> {
        let code = LobbyCode::parse(raw_code)?;
        self.detach().await;

        let mut lobby = self.lobby_manager.get_lobby_handle(code.clone()).await?;
        let reconnected = lobby
            .reconnect(self.connection_id, self.client_tx.clone(), player_id)
            .await;
        match reconnected {
            Err(GameError::Unavailable(_)) => {
                lobby = self.lobby_manager.get_lobby_handle(code).await?;
                lobby
                    .reconnect(self.connection_id, self.client_tx.clone(), player_id)
                    .await?;
            }
            other => other?,
        }

        self.binding = Some(Binding { lobby, player_id });
        Ok(())
    }

    /// Releases the current binding, if any. The player stays in the lobby.
    pub async fn detach(&mut self) {
        if let Some(binding) = self.binding.take() {
            tracing::debug!(
                lobby.code = %binding.lobby.code,
                player.id = %binding.player_id,
                "Detaching session from lobby"
            );
            binding.lobby.client_disconnected(self.connection_id).await;
        }
    }

    async fn send(&self, message: ServerToClientMessage) {
        match message.to_ws_text() {
            Ok(ws_msg) => {
                if self.client_tx.send(ws_msg).await.is_err() {
                    tracing::warn!(client.id = %self.connection_id, "Failed to send message to client");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize message for client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::{LobbySettings, QuestionPool};
    use crate::lobby::LobbyContext;
    use crate::store::MemoryLobbyStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn manager() -> LobbyManagerHandle {
        LobbyManagerHandle::spawn(
            8,
            LobbyContext {
                store: Arc::new(MemoryLobbyStore::new()),
                pool: QuestionPool::builtin(),
                default_settings: LobbySettings::default(),
                idle_shutdown: Duration::from_secs(3600),
            },
        )
    }

    fn session(manager: &LobbyManagerHandle) -> (Session, mpsc::Receiver<ws::Message>) {
        let (tx, rx) = mpsc::channel(64);
        (Session::new(manager.clone(), tx), rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<ws::Message>) -> ServerToClientMessage {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("client channel closed");
        match msg {
            ws::Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    fn text(message: &ClientToServerMessage) -> String {
        serde_json::to_string(message).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_parse_error() {
        let manager = manager();
        let (mut session, mut rx) = session(&manager);
        session.handle_text("not json").await;
        assert!(matches!(
            next_message(&mut rx).await,
            ServerToClientMessage::Error { code, .. } if code == "PARSE_ERROR"
        ));
    }

    #[tokio::test]
    async fn test_action_before_binding_is_rejected() {
        let manager = manager();
        let (mut session, mut rx) = session(&manager);
        session
            .handle_text(&text(&ClientToServerMessage::StartGame))
            .await;
        assert!(matches!(
            next_message(&mut rx).await,
            ServerToClientMessage::Error { code, .. } if code == "NOT_FOUND"
        ));
    }

    #[tokio::test]
    async fn test_create_join_and_start_through_sessions() {
        let manager = manager();
        let (mut host, mut host_rx) = session(&manager);
        host.handle_text(&text(&ClientToServerMessage::CreateLobby {
            display_name: "Ann".to_string(),
            scoring_mode: None,
            prompt_selection: None,
        }))
        .await;
        let code = match next_message(&mut host_rx).await {
            ServerToClientMessage::LobbyCreated { lobby, .. } => lobby.lobby_code,
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(host.bound_player().map(|(c, _)| c.to_string()), Some(code.clone()));

        let (mut guest, mut guest_rx) = session(&manager);
        guest
            .handle_text(&text(&ClientToServerMessage::JoinLobby {
                lobby_code: code.to_lowercase(),
                display_name: "Bob".to_string(),
            }))
            .await;
        assert!(matches!(
            next_message(&mut guest_rx).await,
            ServerToClientMessage::LobbyJoined { .. }
        ));
        assert!(matches!(
            next_message(&mut host_rx).await,
            ServerToClientMessage::PlayerJoined { .. }
        ));

        guest
            .handle_text(&text(&ClientToServerMessage::StartGame))
            .await;
        assert!(matches!(
            next_message(&mut guest_rx).await,
            ServerToClientMessage::PlayerJoined { .. }
        ));
        assert!(matches!(
            next_message(&mut guest_rx).await,
            ServerToClientMessage::Error { code, .. } if code == "FORBIDDEN"
        ));

        host.handle_text(&text(&ClientToServerMessage::StartGame))
            .await;
        assert!(matches!(
            next_message(&mut host_rx).await,
            ServerToClientMessage::RoundStarted { round: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_reconnect_rebinds_new_connection() {
        let manager = manager();
        let (mut host, mut host_rx) = session(&manager);
        host.handle_message(ClientToServerMessage::CreateLobby {
            display_name: "Ann".to_string(),
            scoring_mode: None,
            prompt_selection: None,
        })
        .await
        .unwrap();
        next_message(&mut host_rx).await;
        let (code, player_id) = host
            .bound_player()
            .map(|(c, p)| (c.to_string(), p))
            .unwrap();
        host.detach().await;
        assert!(host.bound_player().is_none());

        let (mut returning, mut returning_rx) = session(&manager);
        returning
            .handle_message(ClientToServerMessage::Reconnect {
                lobby_code: code,
                player_id,
            })
            .await
            .unwrap();
        match next_message(&mut returning_rx).await {
            ServerToClientMessage::Reconnected { snapshot } => {
                assert_eq!(snapshot.player_id, player_id);
                assert!(snapshot.is_host);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_leave_unbinds_session() {
        let manager = manager();
        let (mut host, _host_rx) = session(&manager);
        host.handle_message(ClientToServerMessage::CreateLobby {
            display_name: "Ann".to_string(),
            scoring_mode: None,
            prompt_selection: None,
        })
        .await
        .unwrap();

        host.handle_message(ClientToServerMessage::LeaveGame)
            .await
            .unwrap();
        assert!(host.bound_player().is_none());

        let again = host.handle_message(ClientToServerMessage::StartGame).await;
        assert!(matches!(again, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_join_with_malformed_code_is_validation_error() {
        let manager = manager();
        let (mut session, _rx) = session(&manager);
        let result = session
            .handle_message(ClientToServerMessage::JoinLobby {
                lobby_code: "nope".to_string(),
                display_name: "Bob".to_string(),
            })
            .await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }
}
