use axum::extract::ws;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::game_logic::{
    ActionEffect, Destination, Dispatch, GameError, Lobby, LobbyCode, LobbySettings, PlayerAction,
    PlayerId, PromptSelection, QuestionPool, ScoringMode,
};
use crate::store::SharedLobbyStore;

const LOBBY_MAILBOX_SIZE: usize = 64;
const CODE_RESERVATION_ATTEMPTS: usize = 16;

/// Shared dependencies handed to every lobby actor.
#[derive(Clone)]
pub struct LobbyContext {
    pub store: SharedLobbyStore,
    pub pool: QuestionPool,
    pub default_settings: LobbySettings,
    pub idle_shutdown: StdDuration,
}

#[derive(Debug)]
pub enum LobbyManagerMessage {
    /// Reserves a fresh code and spawns an empty actor for it.
    CreateLobby {
        respond_to: oneshot::Sender<Result<LobbyActorHandle, GameError>>,
    },
    /// Finds the live actor for a code, respawning it from the store if needed.
    GetLobbyHandle {
        code: LobbyCode,
        respond_to: oneshot::Sender<Result<LobbyActorHandle, GameError>>,
    },
    LobbyActorShutdown {
        code: LobbyCode,
        instance_id: Uuid,
    },
}

pub struct LobbyManagerActor {
    receiver: mpsc::Receiver<LobbyManagerMessage>,
    lobbies: HashMap<LobbyCode, LobbyActorHandle>,
    self_sender: mpsc::Sender<LobbyManagerMessage>,
    context: LobbyContext,
    rng: StdRng,
}

impl LobbyManagerActor {
    fn new(
        receiver: mpsc::Receiver<LobbyManagerMessage>,
        self_sender: mpsc::Sender<LobbyManagerMessage>,
        context: LobbyContext,
    ) -> Self {
        LobbyManagerActor {
            receiver,
            lobbies: HashMap::new(),
            self_sender,
            context,
            rng: StdRng::from_entropy(),
        }
    }

    fn spawn_lobby(&mut self, code: LobbyCode) -> LobbyActorHandle {
        let manager_handle = LobbyManagerHandle {
            sender: self.self_sender.clone(),
        };
        let handle = LobbyActorHandle::spawn(
            code.clone(),
            LOBBY_MAILBOX_SIZE,
            manager_handle,
            self.context.clone(),
        );
        self.lobbies.insert(code, handle.clone());
        handle
    }

    async fn reserve_code(&mut self) -> Result<LobbyCode, GameError> {
        for _ in 0..CODE_RESERVATION_ATTEMPTS {
            let code = LobbyCode::generate(&mut self.rng);
            if self.lobbies.contains_key(&code) {
                continue;
            }
            if self.context.store.load(&code).await?.is_none() {
                return Ok(code);
            }
        }
        Err(GameError::Unavailable(
            "could not allocate a lobby code".to_string(),
        ))
    }

    /// Only lobbies present in the store are reachable. A reserved code whose
    /// creation has not completed is not.
    async fn find_or_respawn(&mut self, code: LobbyCode) -> Result<LobbyActorHandle, GameError> {
        if self.context.store.load(&code).await?.is_none() {
            return Err(GameError::NotFound(format!("lobby {code} does not exist")));
        }

        if let Some(handle) = self.lobbies.get(&code)
            && !handle.sender.is_closed()
        {
            return Ok(handle.clone());
        }

        tracing::info!(lobby.code = %code, "Respawning lobby actor from store");
        Ok(self.spawn_lobby(code))
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: LobbyManagerMessage) {
        match msg {
            LobbyManagerMessage::CreateLobby { respond_to } => {
                let result = match self.reserve_code().await {
                    Ok(code) => {
                        tracing::info!(lobby.code = %code, "Reserved lobby code");
                        Ok(self.spawn_lobby(code))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reserve lobby code");
                        Err(e)
                    }
                };
                let _ = respond_to.send(result);
            }
            LobbyManagerMessage::GetLobbyHandle { code, respond_to } => {
                tracing::debug!(lobby.code = %code, "Received GetLobbyHandle request");
                let result = self.find_or_respawn(code).await;
                let _ = respond_to.send(result);
            }
            LobbyManagerMessage::LobbyActorShutdown { code, instance_id } => {
                match self.lobbies.get(&code) {
                    Some(handle) if handle.instance_id == instance_id => {
                        self.lobbies.remove(&code);
                        tracing::info!(lobby.code = %code, "Cleaning up lobby after actor shutdown");
                    }
                    Some(_) => {
                        tracing::debug!(
                            lobby.code = %code,
                            "Ignoring shutdown from a replaced lobby actor"
                        );
                    }
                    None => {
                        tracing::warn!(lobby.code = %code, "Received shutdown for unknown lobby");
                    }
                }
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_lobby_manager_actor(mut actor: LobbyManagerActor) {
    tracing::info!("LobbyManager actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("LobbyManager actor stopped");
}

#[derive(Clone, Debug)]
pub struct LobbyManagerHandle {
    sender: mpsc::Sender<LobbyManagerMessage>,
}

impl LobbyManagerHandle {
    pub fn spawn(buffer_size: usize, context: LobbyContext) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = LobbyManagerActor::new(receiver, sender.clone(), context);
        tokio::spawn(run_lobby_manager_actor(actor));
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, GameError>>) -> LobbyManagerMessage,
    ) -> Result<T, GameError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|e| GameError::Unavailable(format!("lobby manager stopped: {e}")))?;
        rx.await
            .map_err(|e| GameError::Unavailable(format!("lobby manager no response: {e}")))?
    }

    pub async fn create_lobby(&self) -> Result<LobbyActorHandle, GameError> {
        self.request(|respond_to| LobbyManagerMessage::CreateLobby { respond_to })
            .await
    }

    pub async fn get_lobby_handle(&self, code: LobbyCode) -> Result<LobbyActorHandle, GameError> {
        self.request(|respond_to| LobbyManagerMessage::GetLobbyHandle { code, respond_to })
            .await
    }

    pub async fn notify_lobby_shutdown(
        &self,
        code: LobbyCode,
        instance_id: Uuid,
    ) -> Result<(), String> {
        self.sender
            .send(LobbyManagerMessage::LobbyActorShutdown { code, instance_id })
            .await
            .map_err(|e| format!("Failed to send LobbyActorShutdown: {}", e))
    }
}

#[derive(Debug)]
pub enum LobbyActorMessage {
    Create {
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        display_name: String,
        scoring_mode: Option<ScoringMode>,
        prompt_selection: Option<PromptSelection>,
        respond_to: oneshot::Sender<Result<PlayerId, GameError>>,
    },
    Join {
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        display_name: String,
        respond_to: oneshot::Sender<Result<PlayerId, GameError>>,
    },
    Reconnect {
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        player_id: PlayerId,
        respond_to: oneshot::Sender<Result<(), GameError>>,
    },
    PlayerAction {
        connection_id: Uuid,
        action: PlayerAction,
        respond_to: oneshot::Sender<Result<ActionEffect, GameError>>,
    },
    ClientDisconnected {
        connection_id: Uuid,
    },
}

struct ClientConnection {
    player_id: PlayerId,
    tx: mpsc::Sender<ws::Message>,
}

/// Serializes every read-modify-write of one lobby. The store snapshot is
/// the source of truth; the actor keeps only the live connections.
pub struct LobbyActor {
    receiver: mpsc::Receiver<LobbyActorMessage>,
    code: LobbyCode,
    instance_id: Uuid,
    context: LobbyContext,
    manager_handle: LobbyManagerHandle,
    clients: HashMap<Uuid, ClientConnection>,
    rng: StdRng,
}

impl LobbyActor {
    fn new(
        receiver: mpsc::Receiver<LobbyActorMessage>,
        code: LobbyCode,
        instance_id: Uuid,
        context: LobbyContext,
        manager_handle: LobbyManagerHandle,
    ) -> Self {
        LobbyActor {
            receiver,
            code,
            instance_id,
            context,
            manager_handle,
            clients: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    async fn load_lobby(&self) -> Result<Lobby, GameError> {
        self.context
            .store
            .load(&self.code)
            .await?
            .ok_or_else(|| GameError::NotFound(format!("lobby {} does not exist", self.code)))
    }

    async fn commit(&self, lobby: &mut Lobby) -> Result<(), GameError> {
        lobby.touch(Utc::now());
        self.context.store.save(lobby).await?;
        Ok(())
    }

    fn bind_client(
        &mut self,
        connection_id: Uuid,
        player_id: PlayerId,
        tx: mpsc::Sender<ws::Message>,
    ) {
        tracing::debug!(
            client.id = %connection_id,
            player.id = %player_id,
            "Client bound to player"
        );
        self.clients
            .insert(connection_id, ClientConnection { player_id, tx });
    }

    async fn deliver(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            let ws_msg = match dispatch.message.to_ws_text() {
                Ok(ws_msg) => ws_msg,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize lobby message");
                    continue;
                }
            };

            for (connection_id, client) in &self.clients {
                let addressed = match dispatch.destination {
                    Destination::Lobby => true,
                    Destination::Player(player_id) => client.player_id == player_id,
                };
                if addressed && client.tx.send(ws_msg.clone()).await.is_err() {
                    tracing::warn!(client.id = %connection_id, "Failed to send message to client");
                }
            }
        }
    }

    async fn handle_create(
        &mut self,
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        display_name: &str,
        scoring_mode: Option<ScoringMode>,
        prompt_selection: Option<PromptSelection>,
    ) -> Result<PlayerId, GameError> {
        if self.context.store.load(&self.code).await?.is_some() {
            return Err(GameError::Validation(format!(
                "lobby {} already exists",
                self.code
            )));
        }

        let settings = self
            .context
            .default_settings
            .clone()
            .with_overrides(scoring_mode, prompt_selection);
        let (mut lobby, dispatches) =
            Lobby::create(self.code.clone(), display_name, settings, Utc::now())?;
        self.commit(&mut lobby).await?;

        let player_id = lobby.host_id;
        self.bind_client(connection_id, player_id, client_tx);
        self.deliver(dispatches).await;

        tracing::info!(
            player.id = %player_id,
            scoring_mode = ?lobby.settings.scoring_mode,
            prompt_selection = ?lobby.settings.prompt_selection,
            "Lobby created"
        );
        Ok(player_id)
    }

    async fn handle_join(
        &mut self,
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        display_name: &str,
    ) -> Result<PlayerId, GameError> {
        let mut lobby = self.load_lobby().await?;
        let (player_id, dispatches) = lobby.join(display_name)?;
        self.commit(&mut lobby).await?;

        self.bind_client(connection_id, player_id, client_tx);
        self.deliver(dispatches).await;
        Ok(player_id)
    }

    async fn handle_reconnect(
        &mut self,
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        player_id: PlayerId,
    ) -> Result<(), GameError> {
        let mut lobby = self.load_lobby().await?;
        let dispatches = lobby.reconnect(player_id)?;
        self.commit(&mut lobby).await?;

        self.bind_client(connection_id, player_id, client_tx);
        self.deliver(dispatches).await;
        tracing::info!(player.id = %player_id, "Player reconnected");
        Ok(())
    }

    async fn handle_action(
        &mut self,
        connection_id: Uuid,
        action: PlayerAction,
    ) -> Result<ActionEffect, GameError> {
        let player_id = self
            .clients
            .get(&connection_id)
            .map(|c| c.player_id)
            .ok_or_else(|| {
                GameError::NotFound("connection is not bound to this lobby".to_string())
            })?;

        let mut lobby = self.load_lobby().await?;
        tracing::debug!(player.id = %player_id, action = ?action, "Applying player action");
        let outcome = lobby.apply(player_id, action, &self.context.pool, &mut self.rng)?;

        if outcome.effect == ActionEffect::LobbyEmptied {
            self.context.store.delete(&self.code).await?;
        } else {
            self.commit(&mut lobby).await?;
        }
        self.deliver(outcome.dispatches).await;

        if outcome.effect != ActionEffect::Continue {
            self.clients.retain(|_, c| c.player_id != player_id);
        }
        Ok(outcome.effect)
    }

    async fn handle_disconnect(&mut self, connection_id: Uuid) {
        let Some(client) = self.clients.remove(&connection_id) else {
            return;
        };
        if self
            .clients
            .values()
            .any(|c| c.player_id == client.player_id)
        {
            tracing::debug!(
                player.id = %client.player_id,
                "Player still has a live connection"
            );
            return;
        }

        let result = async {
            let mut lobby = self.load_lobby().await?;
            let dispatches = lobby.disconnect(client.player_id);
            if !dispatches.is_empty() {
                self.commit(&mut lobby).await?;
                self.deliver(dispatches).await;
            }
            Ok::<_, GameError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                player.id = %client.player_id,
                error = %e,
                "Failed to record player disconnect"
            );
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        lobby.code = %self.code,
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: LobbyActorMessage) -> bool {
        match msg {
            LobbyActorMessage::Create {
                connection_id,
                client_tx,
                display_name,
                scoring_mode,
                prompt_selection,
                respond_to,
            } => {
                let result = self
                    .handle_create(
                        connection_id,
                        client_tx,
                        &display_name,
                        scoring_mode,
                        prompt_selection,
                    )
                    .await;
                // An actor whose creation failed holds no lobby.
                let shutdown = result.is_err() && self.clients.is_empty();
                let _ = respond_to.send(result);
                shutdown
            }
            LobbyActorMessage::Join {
                connection_id,
                client_tx,
                display_name,
                respond_to,
            } => {
                let result = self
                    .handle_join(connection_id, client_tx, &display_name)
                    .await;
                let _ = respond_to.send(result);
                false
            }
            LobbyActorMessage::Reconnect {
                connection_id,
                client_tx,
                player_id,
                respond_to,
            } => {
                let result = self
                    .handle_reconnect(connection_id, client_tx, player_id)
                    .await;
                let _ = respond_to.send(result);
                false
            }
            LobbyActorMessage::PlayerAction {
                connection_id,
                action,
                respond_to,
            } => {
                let result = self.handle_action(connection_id, action).await;
                let emptied = matches!(result, Ok(ActionEffect::LobbyEmptied));
                if let Err(e) = &result {
                    tracing::debug!(client.id = %connection_id, error = %e, "Action rejected");
                }
                let _ = respond_to.send(result);
                emptied
            }
            LobbyActorMessage::ClientDisconnected { connection_id } => {
                tracing::debug!(client.id = %connection_id, "Client disconnected");
                self.handle_disconnect(connection_id).await;
                false
            }
        }
    }
}

#[tracing::instrument(skip(actor), fields(lobby.code = %actor.code))]
pub async fn run_lobby_actor(mut actor: LobbyActor) {
    tracing::info!("Lobby actor started");

    let idle_shutdown = actor.context.idle_shutdown;
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        last_activity = Instant::now();
                        if actor.handle_message(msg).await {
                            tracing::info!("Lobby shutdown requested by message handler");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Lobby actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(last_activity + idle_shutdown), if actor.clients.is_empty() => {
                // Only idle out when nobody is connected. The snapshot stays in the store.
                tracing::info!("Lobby idle with no clients. Shutting down actor");
                break;
            }
        }
    }

    if let Err(e) = actor
        .manager_handle
        .notify_lobby_shutdown(actor.code.clone(), actor.instance_id)
        .await
    {
        tracing::error!(error = %e, "Failed to notify LobbyManager of shutdown");
    }
    tracing::info!("Lobby actor stopping");
}

#[derive(Clone, Debug)]
pub struct LobbyActorHandle {
    sender: mpsc::Sender<LobbyActorMessage>,
    pub code: LobbyCode,
    instance_id: Uuid,
}

impl LobbyActorHandle {
    pub fn spawn(
        code: LobbyCode,
        buffer_size: usize,
        lobby_manager_handle: LobbyManagerHandle,
        context: LobbyContext,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let instance_id = Uuid::new_v4();
        let actor = LobbyActor::new(
            receiver,
            code.clone(),
            instance_id,
            context,
            lobby_manager_handle,
        );
        tokio::spawn(run_lobby_actor(actor));
        Self {
            sender,
            code,
            instance_id,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, GameError>>) -> LobbyActorMessage,
    ) -> Result<T, GameError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| GameError::Unavailable(format!("lobby {} is shutting down", self.code)))?;
        rx.await
            .map_err(|_| GameError::Unavailable(format!("lobby {} did not respond", self.code)))?
    }

    pub async fn create(
        &self,
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        display_name: String,
        scoring_mode: Option<ScoringMode>,
        prompt_selection: Option<PromptSelection>,
    ) -> Result<PlayerId, GameError> {
        self.request(|respond_to| LobbyActorMessage::Create {
            connection_id,
            client_tx,
            display_name,
            scoring_mode,
            prompt_selection,
            respond_to,
        })
        .await
    }

    pub async fn join(
        &self,
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        display_name: String,
    ) -> Result<PlayerId, GameError> {
        self.request(|respond_to| LobbyActorMessage::Join {
            connection_id,
            client_tx,
            display_name,
            respond_to,
        })
        .await
    }

    pub async fn reconnect(
        &self,
        connection_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
        player_id: PlayerId,
    ) -> Result<(), GameError> {
        self.request(|respond_to| LobbyActorMessage::Reconnect {
            connection_id,
            client_tx,
            player_id,
            respond_to,
        })
        .await
    }

    pub async fn act(
        &self,
        connection_id: Uuid,
        action: PlayerAction,
    ) -> Result<ActionEffect, GameError> {
        self.request(|respond_to| LobbyActorMessage::PlayerAction {
            connection_id,
            action,
            respond_to,
        })
        .await
    }

    pub async fn client_disconnected(&self, connection_id: Uuid) {
        if self
            .sender
            .send(LobbyActorMessage::ClientDisconnected { connection_id })
            .await
            .is_err()
        {
            tracing::debug!(lobby.code = %self.code, "Lobby already stopped on disconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::{PhaseKind, ServerToClientMessage};
    use crate::store::{LobbyStore, MemoryLobbyStore};
    use std::sync::Arc;

    struct TestClient {
        connection_id: Uuid,
        tx: mpsc::Sender<ws::Message>,
        rx: mpsc::Receiver<ws::Message>,
    }

    impl TestClient {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self {
                connection_id: Uuid::new_v4(),
                tx,
                rx,
            }
        }

        async fn next(&mut self) -> ServerToClientMessage {
            let msg = tokio::time::timeout(StdDuration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("client channel closed");
            match msg {
                ws::Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame: {other:?}"),
            }
        }

        fn drain(&mut self) -> Vec<ServerToClientMessage> {
            let mut messages = Vec::new();
            while let Ok(ws::Message::Text(text)) = self.rx.try_recv() {
                messages.push(serde_json::from_str(text.as_str()).unwrap());
            }
            messages
        }
    }

    fn context(settings: LobbySettings, idle_shutdown: StdDuration) -> LobbyContext {
        LobbyContext {
            store: Arc::new(MemoryLobbyStore::new()),
            pool: QuestionPool::builtin(),
            default_settings: settings,
            idle_shutdown,
        }
    }

    fn default_context() -> LobbyContext {
        context(LobbySettings::default(), StdDuration::from_secs(3600))
    }

    async fn open_lobby(
        manager: &LobbyManagerHandle,
        host: &TestClient,
    ) -> (LobbyActorHandle, PlayerId) {
        let handle = manager.create_lobby().await.unwrap();
        let player_id = handle
            .create(host.connection_id, host.tx.clone(), "Ann".to_string(), None, None)
            .await
            .unwrap();
        (handle, player_id)
    }

    #[tokio::test]
    async fn test_create_and_join_broadcasts() {
        let manager = LobbyManagerHandle::spawn(8, default_context());
        let mut host = TestClient::new();
        let (handle, host_id) = open_lobby(&manager, &host).await;

        match host.next().await {
            ServerToClientMessage::LobbyCreated { player_id, lobby } => {
                assert_eq!(player_id, host_id);
                assert_eq!(lobby.lobby_code, handle.code.to_string());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let mut guest = TestClient::new();
        let found = manager.get_lobby_handle(handle.code.clone()).await.unwrap();
        let guest_id = found
            .join(guest.connection_id, guest.tx.clone(), "Bob".to_string())
            .await
            .unwrap();

        assert!(matches!(
            guest.next().await,
            ServerToClientMessage::LobbyJoined { player_id, .. } if player_id == guest_id
        ));
        assert!(matches!(
            host.next().await,
            ServerToClientMessage::PlayerJoined { players, .. } if players.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_unknown_lobby_is_not_found() {
        let manager = LobbyManagerHandle::spawn(8, default_context());
        let code = LobbyCode::parse("ZZZZZZ").unwrap();
        let result = manager.get_lobby_handle(code).await;
        assert!(matches!(result, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_create_releases_code() {
        let manager = LobbyManagerHandle::spawn(8, default_context());
        let host = TestClient::new();
        let handle = manager.create_lobby().await.unwrap();
        let result = handle
            .create(host.connection_id, host.tx.clone(), "   ".to_string(), None, None)
            .await;
        assert!(matches!(result, Err(GameError::Validation(_))));

        let lookup = manager.get_lobby_handle(handle.code.clone()).await;
        assert!(matches!(lookup, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_answers_resolve_exactly_once() {
        let settings = LobbySettings {
            scoring_mode: ScoringMode::MajorityMatch,
            prompt_selection: PromptSelection::Automatic,
            ..LobbySettings::default()
        };
        let ctx = context(settings, StdDuration::from_secs(3600));
        let store = ctx.store.clone();
        let manager = LobbyManagerHandle::spawn(8, ctx);

        let mut clients: Vec<TestClient> = (0..4).map(|_| TestClient::new()).collect();
        let (handle, _) = open_lobby(&manager, &clients[0]).await;
        for (i, client) in clients.iter().enumerate().skip(1) {
            handle
                .join(client.connection_id, client.tx.clone(), format!("P{i}"))
                .await
                .unwrap();
        }
        handle
            .act(clients[0].connection_id, PlayerAction::StartGame)
            .await
            .unwrap();

        let answers = ["pizza", "pizza", "pasta", "pizza"];
        let submissions = clients.iter().zip(answers).map(|(client, text)| {
            let handle = handle.clone();
            let connection_id = client.connection_id;
            tokio::spawn(async move {
                handle
                    .act(
                        connection_id,
                        PlayerAction::SubmitAnswer {
                            text: text.to_string(),
                        },
                    )
                    .await
            })
        });
        for task in futures_util::future::join_all(submissions).await {
            task.unwrap().unwrap();
        }

        let lobby = store.load(&handle.code).await.unwrap().unwrap();
        assert_eq!(lobby.phase.kind(), PhaseKind::Results);
        assert_eq!(lobby.answers().len(), 4);
        let scores: Vec<u32> = lobby.players.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![1, 1, 0, 1]);

        for client in clients.iter_mut() {
            let completes = client
                .drain()
                .into_iter()
                .filter(|m| matches!(m, ServerToClientMessage::RoundComplete { .. }))
                .count();
            assert_eq!(completes, 1);
        }
    }

    #[tokio::test]
    async fn test_lobbies_are_isolated() {
        let manager = LobbyManagerHandle::spawn(8, default_context());
        let mut first_host = TestClient::new();
        let mut second_host = TestClient::new();
        let (first, _) = open_lobby(&manager, &first_host).await;
        let (second, _) = open_lobby(&manager, &second_host).await;
        assert_ne!(first.code, second.code);
        first_host.next().await;
        second_host.next().await;

        let guest = TestClient::new();
        first
            .join(guest.connection_id, guest.tx.clone(), "Bob".to_string())
            .await
            .unwrap();
        assert!(matches!(
            first_host.next().await,
            ServerToClientMessage::PlayerJoined { .. }
        ));
        assert!(second_host.drain().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_connection_cannot_act() {
        let manager = LobbyManagerHandle::spawn(8, default_context());
        let host = TestClient::new();
        let (handle, _) = open_lobby(&manager, &host).await;
        let result = handle.act(Uuid::new_v4(), PlayerAction::StartGame).await;
        assert!(matches!(result, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_only_last_connection_marks_player_disconnected() {
        let ctx = default_context();
        let store = ctx.store.clone();
        let manager = LobbyManagerHandle::spawn(8, ctx);
        let first = TestClient::new();
        let second = TestClient::new();
        let (handle, host_id) = open_lobby(&manager, &first).await;
        handle
            .reconnect(second.connection_id, second.tx.clone(), host_id)
            .await
            .unwrap();

        handle.client_disconnected(first.connection_id).await;
        // Round-trip through the mailbox so the disconnect is processed.
        let barrier = handle
            .act(second.connection_id, PlayerAction::StartGame)
            .await;
        assert!(matches!(barrier, Err(GameError::Validation(_))));
        let lobby = store.load(&handle.code).await.unwrap().unwrap();
        assert!(lobby.players[0].is_connected());

        handle.client_disconnected(second.connection_id).await;
        let guest = TestClient::new();
        handle
            .join(guest.connection_id, guest.tx.clone(), "Bob".to_string())
            .await
            .unwrap();
        let lobby = store.load(&handle.code).await.unwrap().unwrap();
        assert!(!lobby.players[0].is_connected());
        assert_eq!(lobby.players.len(), 2);
    }

    #[tokio::test]
    async fn test_last_leave_deletes_lobby() {
        let ctx = default_context();
        let store = ctx.store.clone();
        let manager = LobbyManagerHandle::spawn(8, ctx);
        let mut host = TestClient::new();
        let (handle, _) = open_lobby(&manager, &host).await;
        host.next().await;

        let effect = handle
            .act(host.connection_id, PlayerAction::LeaveGame)
            .await
            .unwrap();
        assert_eq!(effect, ActionEffect::LobbyEmptied);
        assert!(matches!(host.next().await, ServerToClientMessage::GameLeft));
        assert!(store.load(&handle.code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idle_actor_respawns_from_store() {
        let ctx = context(LobbySettings::default(), StdDuration::from_millis(50));
        let manager = LobbyManagerHandle::spawn(8, ctx);
        let host = TestClient::new();
        let (handle, host_id) = open_lobby(&manager, &host).await;
        handle.client_disconnected(host.connection_id).await;

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert!(handle.sender.is_closed());

        let returning = TestClient::new();
        let respawned = manager.get_lobby_handle(handle.code.clone()).await.unwrap();
        assert_ne!(respawned.instance_id, handle.instance_id);
        respawned
            .reconnect(returning.connection_id, returning.tx.clone(), host_id)
            .await
            .unwrap();
    }
}
