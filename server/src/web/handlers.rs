use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};

use super::error::{Result as WebResult, WebError};
use crate::game_logic::LobbyCode;
use crate::game_logic::messages::LobbySummary;
use crate::state::AppState;
use crate::store::LobbyStore;

pub async fn health_handler() -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Public pre-join view of a lobby. Reads the persisted snapshot directly.
pub async fn lobby_summary_handler(
    State(app_state): State<AppState>,
    Path(raw_code): Path<String>,
) -> WebResult<Json<LobbySummary>> {
    let code = LobbyCode::parse(&raw_code).map_err(|e| WebError::BadRequest(e.to_string()))?;

    let lobby = app_state
        .store
        .load(&code)
        .await
        .map_err(|e| {
            tracing::error!(lobby.code = %code, error = %e, "Failed to load lobby for summary");
            WebError::InternalServerError("failed to load lobby".to_string())
        })?
        .ok_or_else(|| WebError::LobbyNotFound(code.to_string()))?;

    Ok(Json(LobbySummary::from_lobby(&lobby)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::{Lobby, LobbySettings, PhaseKind, QuestionPool};
    use crate::lobby::{LobbyContext, LobbyManagerHandle};
    use crate::store::{MemoryLobbyStore, SharedLobbyStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn app_state() -> AppState {
        let store: SharedLobbyStore = Arc::new(MemoryLobbyStore::new());
        let lobby_manager = LobbyManagerHandle::spawn(
            8,
            LobbyContext {
                store: store.clone(),
                pool: QuestionPool::builtin(),
                default_settings: LobbySettings::default(),
                idle_shutdown: Duration::from_secs(3600),
            },
        );
        AppState {
            lobby_manager,
            store,
        }
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let Json(body) = health_handler().await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_summary_for_existing_lobby() {
        let state = app_state();
        let code = LobbyCode::parse("SUM123").unwrap();
        let (lobby, _) =
            Lobby::create(code, "Ann", LobbySettings::default(), Utc::now()).unwrap();
        state.store.save(&lobby).await.unwrap();

        let Json(summary) = lobby_summary_handler(State(state), Path("sum123".to_string()))
            .await
            .unwrap();
        assert_eq!(summary.lobby_code, "SUM123");
        assert_eq!(summary.phase, PhaseKind::Waiting);
        assert_eq!(summary.player_count, 1);
        assert!(summary.joinable);
    }

    #[tokio::test]
    async fn test_summary_errors() {
        let state = app_state();
        let missing = lobby_summary_handler(State(state.clone()), Path("NONE00".to_string())).await;
        assert!(matches!(missing, Err(WebError::LobbyNotFound(_))));

        let malformed = lobby_summary_handler(State(state), Path("??".to_string())).await;
        assert!(matches!(malformed, Err(WebError::BadRequest(_))));
    }
}
