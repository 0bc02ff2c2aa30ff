use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::game_logic::{Lobby, LobbyCode};

/// Persistence for lobby snapshots. Last write wins; callers serialize
/// access per lobby.
#[async_trait]
pub trait LobbyStore: Send + Sync {
    async fn load(&self, code: &LobbyCode) -> Result<Option<Lobby>, StoreError>;

    async fn save(&self, lobby: &Lobby) -> Result<(), StoreError>;

    /// Removing a lobby that does not exist is not an error.
    async fn delete(&self, code: &LobbyCode) -> Result<(), StoreError>;

    /// Drops every snapshot created at least one TTL before `now` and
    /// returns how many were removed. `load` already hides such snapshots.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

pub type SharedLobbyStore = Arc<dyn LobbyStore>;

pub const DEFAULT_LOBBY_TTL: TimeDelta = TimeDelta::days(1);

fn is_expired(lobby: &Lobby, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(lobby.created_at) >= ttl
}

/// Runs `purge_expired` on a fixed interval for the lifetime of the process.
pub fn spawn_expiry_sweeper(store: SharedLobbyStore, every: Duration) {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(every);
        loop {
            sweep.tick().await;
            match store.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(store.purged = purged, "Expired lobbies removed"),
                Err(e) => tracing::warn!(error = %e, "Lobby expiry pass failed"),
            }
        }
    });
}

#[derive(Debug)]
pub struct MemoryLobbyStore {
    lobbies: RwLock<HashMap<LobbyCode, Lobby>>,
    ttl: TimeDelta,
}

impl Default for MemoryLobbyStore {
    fn default() -> Self {
        Self {
            lobbies: RwLock::default(),
            ttl: DEFAULT_LOBBY_TTL,
        }
    }
}

impl MemoryLobbyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl LobbyStore for MemoryLobbyStore {
    async fn load(&self, code: &LobbyCode) -> Result<Option<Lobby>, StoreError> {
        let now = Utc::now();
        Ok(self
            .lobbies
            .read()
            .await
            .get(code)
            .filter(|lobby| !is_expired(lobby, self.ttl, now))
            .cloned())
    }

    async fn save(&self, lobby: &Lobby) -> Result<(), StoreError> {
        self.lobbies
            .write()
            .await
            .insert(lobby.code.clone(), lobby.clone());
        Ok(())
    }

    async fn delete(&self, code: &LobbyCode) -> Result<(), StoreError> {
        self.lobbies.write().await.remove(code);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut lobbies = self.lobbies.write().await;
        let before = lobbies.len();
        lobbies.retain(|_, lobby| !is_expired(lobby, self.ttl, now));
        Ok(before - lobbies.len())
    }
}

/// One pretty-printed JSON file per lobby code under `directory`.
#[derive(Debug)]
pub struct JsonFileLobbyStore {
    directory: PathBuf,
    ttl: TimeDelta,
}

impl JsonFileLobbyStore {
    #[tracing::instrument]
    pub async fn open(directory: impl AsRef<Path> + std::fmt::Debug) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| StoreError::Write {
                path: directory.display().to_string(),
                source: e,
            })?;
        tracing::info!(store.directory = %directory.display(), "Opened lobby file store");
        Ok(Self {
            directory,
            ttl: DEFAULT_LOBBY_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    fn path_for(&self, code: &LobbyCode) -> PathBuf {
        self.directory.join(format!("{code}.json"))
    }

    async fn read_snapshot(&self, code: &LobbyCode) -> Result<Option<Lobby>, StoreError> {
        let path = self.path_for(code);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                code: code.to_string(),
                source: e,
            })
    }
}

#[async_trait]
impl LobbyStore for JsonFileLobbyStore {
    async fn load(&self, code: &LobbyCode) -> Result<Option<Lobby>, StoreError> {
        let now = Utc::now();
        Ok(self
            .read_snapshot(code)
            .await?
            .filter(|lobby| !is_expired(lobby, self.ttl, now)))
    }

    async fn save(&self, lobby: &Lobby) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(lobby).map_err(|e| StoreError::Encode {
            code: lobby.code.to_string(),
            source: e,
        })?;

        let path = self.path_for(&lobby.code);
        let tmp_path = path.with_extension("json.tmp");
        let write_err = |source| StoreError::Write {
            path: path.display().to_string(),
            source,
        };

        tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(write_err)?;

        tracing::trace!(lobby.code = %lobby.code, "Lobby snapshot written");
        Ok(())
    }

    async fn delete(&self, code: &LobbyCode) -> Result<(), StoreError> {
        let path = self.path_for(code);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let read_err = |source| StoreError::Read {
            path: self.directory.display().to_string(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(read_err)?;
        let mut purged = 0;
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(code) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| LobbyCode::parse(stem).ok())
            else {
                continue;
            };

            match self.read_snapshot(&code).await {
                Ok(Some(lobby)) if is_expired(&lobby, self.ttl, now) => {
                    self.delete(&code).await?;
                    tracing::debug!(lobby.code = %code, "Expired lobby snapshot removed");
                    purged += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(lobby.code = %code, error = %e, "Skipping unreadable lobby snapshot");
                }
            }
        }
        Ok(purged)
    }
}
