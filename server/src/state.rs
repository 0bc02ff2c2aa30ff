use crate::lobby::LobbyManagerHandle;
use crate::store::SharedLobbyStore;

#[derive(Clone)]
pub struct AppState {
    pub lobby_manager: LobbyManagerHandle,
    pub store: SharedLobbyStore,
}
