use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod content;
mod error;
mod game_logic;
mod lobby;
mod session;
mod state;
mod store;
mod web;

use crate::config::{StoreConfig, StoreKind, load_settings};
use crate::content::load_question_pool;
use crate::error::{ConfigError, Result as AppResult};
use crate::lobby::{LobbyContext, LobbyManagerHandle};
use crate::state::AppState;
use crate::store::{
    JsonFileLobbyStore, MemoryLobbyStore, SharedLobbyStore, spawn_expiry_sweeper,
};
use crate::web::run_server;

const STORE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

async fn build_store(config: &StoreConfig) -> AppResult<SharedLobbyStore> {
    let ttl = config.lobby_ttl()?;
    match config.kind {
        StoreKind::Memory => {
            tracing::info!(store.ttl_secs = config.lobby_ttl_secs, "Using in-memory lobby store");
            Ok(Arc::new(MemoryLobbyStore::new().with_ttl(ttl)))
        }
        StoreKind::File => {
            let directory = config
                .directory
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("store.directory".to_string()))?;
            Ok(Arc::new(JsonFileLobbyStore::open(directory).await?.with_ttl(ttl)))
        }
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", app_settings);

    let store = build_store(&app_settings.store).await?;
    spawn_expiry_sweeper(store.clone(), STORE_SWEEP_INTERVAL);
    let pool = load_question_pool(&app_settings.questions).await;

    let lobby_manager = LobbyManagerHandle::spawn(
        32,
        LobbyContext {
            store: store.clone(),
            pool,
            default_settings: app_settings.game.lobby_settings(),
            idle_shutdown: Duration::from_secs(app_settings.game.lobby_idle_shutdown_secs),
        },
    );

    let app_state = AppState {
        lobby_manager,
        store,
    };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
