use serde::{Deserialize, Serialize};

pub mod error;
pub mod machine;
pub mod messages;
pub mod model;
pub mod questions;
pub mod resolution;

pub use error::GameError;
pub use machine::{ActionEffect, PlayerAction};
pub use messages::{ClientToServerMessage, Destination, Dispatch, ServerToClientMessage};
pub use model::{Lobby, LobbyCode, PhaseKind, PlayerId};
pub use questions::QuestionPool;

/// How a resolved round decides who answered "the same".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Group by exact normalized answer text.
    MajorityMatch,
    /// Group by who endorsed whom during the voting phase.
    MutualEndorsement,
}

/// Who puts the round's prompt in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSelection {
    /// The server draws a single prompt.
    Automatic,
    /// The rotating prompt holder picks one of two drawn options.
    PromptHolder,
}

/// Rules fixed for a lobby at creation time and persisted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub scoring_mode: ScoringMode,
    pub prompt_selection: PromptSelection,
    pub win_score: u32,
    pub min_players: usize,
    pub max_players: usize,
    pub max_name_chars: usize,
    pub max_answer_chars: usize,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            scoring_mode: ScoringMode::MutualEndorsement,
            prompt_selection: PromptSelection::PromptHolder,
            win_score: 8,
            min_players: 2,
            max_players: 10,
            max_name_chars: 20,
            max_answer_chars: 50,
        }
    }
}

impl LobbySettings {
    pub fn with_overrides(
        mut self,
        scoring_mode: Option<ScoringMode>,
        prompt_selection: Option<PromptSelection>,
    ) -> Self {
        if let Some(mode) = scoring_mode {
            self.scoring_mode = mode;
        }
        if let Some(selection) = prompt_selection {
            self.prompt_selection = selection;
        }
        self
    }
}
