use crate::error::{ConfigError, Result as AppResult};
use crate::game_logic::{LobbySettings, PromptSelection, ScoringMode};
use chrono::TimeDelta;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    pub scoring_mode: ScoringMode,
    pub prompt_selection: PromptSelection,
    pub win_score: u32,
    pub min_players: usize,
    pub max_players: usize,
    pub max_name_chars: usize,
    pub max_answer_chars: usize,
    pub lobby_idle_shutdown_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        let settings = LobbySettings::default();
        Self {
            scoring_mode: settings.scoring_mode,
            prompt_selection: settings.prompt_selection,
            win_score: settings.win_score,
            min_players: settings.min_players,
            max_players: settings.max_players,
            max_name_chars: settings.max_name_chars,
            max_answer_chars: settings.max_answer_chars,
            lobby_idle_shutdown_secs: 60 * 60,
        }
    }
}

impl GameConfig {
    /// Settings copied into every newly created lobby.
    pub fn lobby_settings(&self) -> LobbySettings {
        LobbySettings {
            scoring_mode: self.scoring_mode,
            prompt_selection: self.prompt_selection,
            win_score: self.win_score,
            min_players: self.min_players,
            max_players: self.max_players,
            max_name_chars: self.max_name_chars,
            max_answer_chars: self.max_answer_chars,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players < 2 {
            return Err(ConfigError::InvalidValue(
                "game.min_players must be at least 2".to_string(),
            ));
        }
        if self.max_players < self.min_players {
            return Err(ConfigError::InvalidValue(format!(
                "game.max_players ({}) is below game.min_players ({})",
                self.max_players, self.min_players
            )));
        }
        if self.win_score == 0 {
            return Err(ConfigError::InvalidValue(
                "game.win_score must be positive".to_string(),
            ));
        }
        if self.max_name_chars == 0 || self.max_answer_chars == 0 {
            return Err(ConfigError::InvalidValue(
                "game.max_name_chars and game.max_answer_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub directory: Option<String>,
    /// Snapshots older than this, counted from creation, are dropped.
    pub lobby_ttl_secs: u64,
}

impl StoreConfig {
    pub fn lobby_ttl(&self) -> Result<TimeDelta, ConfigError> {
        i64::try_from(self.lobby_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .filter(|ttl| *ttl > TimeDelta::zero())
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "store.lobby_ttl_secs must be a positive number of seconds, got {}",
                    self.lobby_ttl_secs
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSourceType {
    Builtin,
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionsConfig {
    pub source_type: QuestionSourceType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub store: StoreConfig,
    pub questions: QuestionsConfig,
}

pub const DEFAULT_LOBBY_TTL_SECS: u64 = 24 * 60 * 60;

pub fn load_settings() -> AppResult<AppSettings> {
    let defaults = GameConfig::default();

    let settings = Config::builder()
        .set_default("server.port", 3001)?
        .set_default("server.cors_origins", Vec::<String>::new())?
        .set_default("game.scoring_mode", "mutual_endorsement")?
        .set_default("game.prompt_selection", "prompt_holder")?
        .set_default("game.win_score", defaults.win_score)?
        .set_default("game.min_players", defaults.min_players as u64)?
        .set_default("game.max_players", defaults.max_players as u64)?
        .set_default("game.max_name_chars", defaults.max_name_chars as u64)?
        .set_default("game.max_answer_chars", defaults.max_answer_chars as u64)?
        .set_default("game.lobby_idle_shutdown_secs", defaults.lobby_idle_shutdown_secs)?
        .set_default("store.kind", "memory")?
        .set_default("store.lobby_ttl_secs", DEFAULT_LOBBY_TTL_SECS)?
        .set_default("questions.source_type", "builtin")?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("HERDMIND")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate(&app_settings)?;
    Ok(app_settings)
}

fn validate(settings: &AppSettings) -> Result<(), ConfigError> {
    settings.game.validate()?;

    if settings.store.kind == StoreKind::File && settings.store.directory.is_none() {
        return Err(ConfigError::Missing(
            "store.directory is required when store.kind = \"file\"".to_string(),
        ));
    }
    settings.store.lobby_ttl()?;

    match settings.questions.source_type {
        QuestionSourceType::File if settings.questions.file_path.is_none() => Err(
            ConfigError::Missing("questions.file_path for file source".to_string()),
        ),
        QuestionSourceType::Http if settings.questions.http_url.is_none() => Err(
            ConfigError::Missing("questions.http_url for http source".to_string()),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(game: GameConfig, store: StoreConfig) -> AppSettings {
        AppSettings {
            server: ServerConfig {
                port: 3001,
                cors_origins: vec![],
            },
            game,
            store,
            questions: QuestionsConfig {
                source_type: QuestionSourceType::Builtin,
                file_path: None,
                http_url: None,
            },
        }
    }

    fn memory_store() -> StoreConfig {
        StoreConfig {
            kind: StoreKind::Memory,
            directory: None,
            lobby_ttl_secs: DEFAULT_LOBBY_TTL_SECS,
        }
    }

    #[test]
    fn test_default_game_config_is_valid() {
        let settings = settings_with(GameConfig::default(), memory_store());
        assert!(validate(&settings).is_ok());
        assert_eq!(settings.game.win_score, 8);
        assert_eq!(settings.game.max_players, 10);
    }

    #[test]
    fn test_rejects_max_below_min_players() {
        let game = GameConfig {
            min_players: 4,
            max_players: 3,
            ..GameConfig::default()
        };
        let result = validate(&settings_with(game, memory_store()));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_file_store_requires_directory() {
        let store = StoreConfig {
            kind: StoreKind::File,
            directory: None,
            lobby_ttl_secs: DEFAULT_LOBBY_TTL_SECS,
        };
        let result = validate(&settings_with(GameConfig::default(), store));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_rejects_zero_lobby_ttl() {
        let store = StoreConfig {
            lobby_ttl_secs: 0,
            ..memory_store()
        };
        let result = validate(&settings_with(GameConfig::default(), store));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_lobby_ttl_defaults_to_one_day() {
        assert_eq!(memory_store().lobby_ttl().unwrap(), TimeDelta::days(1));
    }

    #[test]
    fn test_lobby_settings_mirror_game_config() {
        let game = GameConfig {
            scoring_mode: ScoringMode::MajorityMatch,
            prompt_selection: PromptSelection::Automatic,
            win_score: 5,
            ..GameConfig::default()
        };
        let lobby_settings = game.lobby_settings();
        assert_eq!(lobby_settings.scoring_mode, ScoringMode::MajorityMatch);
        assert_eq!(lobby_settings.prompt_selection, PromptSelection::Automatic);
        assert_eq!(lobby_settings.win_score, 5);
    }
}
