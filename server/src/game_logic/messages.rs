use serde::{Deserialize, Serialize};

use super::error::GameError;
use super::machine::PlayerAction;
use super::model::{Lobby, Phase, PhaseKind, Player, PlayerId, PlayerSnapshot};
use super::resolution::RoundOutcome;
use super::{PromptSelection, ScoringMode};

/// Messages sent from a game client (WebSocket) to the server.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")]
pub enum ClientToServerMessage {
    /// Opens a new lobby with the sender as host.
    CreateLobby {
        display_name: String,
        scoring_mode: Option<ScoringMode>,
        prompt_selection: Option<PromptSelection>,
    },
    JoinLobby {
        lobby_code: String,
        display_name: String,
    },
    /// Rebinds a fresh connection to an existing player.
    Reconnect {
        lobby_code: String,
        player_id: PlayerId,
    },
    StartGame,
    SelectPrompt {
        index: usize,
    },
    SubmitAnswer {
        text: String,
    },
    /// Players the sender believes gave the same answer. Including the
    /// sender is allowed and ignored.
    SubmitVotes {
        endorsed_player_ids: Vec<PlayerId>,
    },
    NextRound,
    RestartGame,
    /// Explicit leave. The player is removed from the lobby for good.
    LeaveGame,
}

impl ClientToServerMessage {
    /// In-lobby actions map onto a [`PlayerAction`]; lobby entry messages
    /// are handed back unchanged.
    pub fn into_action(self) -> Result<PlayerAction, Self> {
        match self {
            ClientToServerMessage::StartGame => Ok(PlayerAction::StartGame),
            ClientToServerMessage::SelectPrompt { index } => Ok(PlayerAction::SelectPrompt { index }),
            ClientToServerMessage::SubmitAnswer { text } => Ok(PlayerAction::SubmitAnswer { text }),
            ClientToServerMessage::SubmitVotes {
                endorsed_player_ids,
            } => Ok(PlayerAction::SubmitVotes {
                endorsed: endorsed_player_ids,
            }),
            ClientToServerMessage::NextRound => Ok(PlayerAction::NextRound),
            ClientToServerMessage::RestartGame => Ok(PlayerAction::RestartGame),
            ClientToServerMessage::LeaveGame => Ok(PlayerAction::LeaveGame),
            entry => Err(entry),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub has_marker: bool,
    pub connected: bool,
    pub is_host: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerView {
    pub player_id: PlayerId,
    pub player_name: String,
    pub text: String,
}

/// What every player is allowed to see of the current phase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseView {
    Waiting,
    ChoosingPrompt {
        prompt_holder_id: PlayerId,
        options: Vec<String>,
    },
    Answering {
        prompt: String,
        submitted: usize,
        total: usize,
    },
    Voting {
        prompt: String,
        answers: Vec<AnswerView>,
        voted: usize,
        total: usize,
    },
    Results {
        prompt: String,
        outcome: RoundOutcome,
    },
    Finished {
        prompt: String,
        outcome: RoundOutcome,
        winner: PlayerSnapshot,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LobbyView {
    pub lobby_code: String,
    pub host_id: PlayerId,
    pub round: u32,
    pub scoring_mode: ScoringMode,
    pub prompt_selection: PromptSelection,
    pub win_score: u32,
    pub players: Vec<PlayerView>,
    pub state: PhaseView,
}

/// Everything a returning client needs to redraw its screen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSnapshot {
    pub lobby: LobbyView,
    pub player_id: PlayerId,
    pub is_host: bool,
    pub is_prompt_holder: bool,
    pub has_answered: bool,
    pub has_voted: bool,
}

/// Public lobby info served over HTTP before joining.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LobbySummary {
    pub lobby_code: String,
    pub phase: PhaseKind,
    pub round: u32,
    pub player_count: usize,
    pub max_players: usize,
    pub joinable: bool,
}

/// Messages sent from the server to game clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "messageType", content = "payload")]
pub enum ServerToClientMessage {
    LobbyCreated {
        lobby: LobbyView,
        player_id: PlayerId,
    },
    LobbyJoined {
        lobby: LobbyView,
        player_id: PlayerId,
    },
    PlayerJoined {
        player: PlayerView,
        players: Vec<PlayerView>,
    },
    Reconnected {
        snapshot: ReconnectSnapshot,
    },
    PlayerConnectionChanged {
        player_id: PlayerId,
        connected: bool,
    },
    /// A new round began, either with a prompt choice or a prompt in force.
    RoundStarted {
        round: u32,
        state: PhaseView,
    },
    PromptSelected {
        prompt: String,
    },
    AnswerAccepted {
        text: String,
    },
    AnswerProgress {
        submitted: usize,
        total: usize,
    },
    VotingStarted {
        prompt: String,
        answers: Vec<AnswerView>,
    },
    VotesAccepted {
        endorsed_player_ids: Vec<PlayerId>,
    },
    VotingProgress {
        voted: usize,
        total: usize,
    },
    RoundComplete {
        outcome: RoundOutcome,
        players: Vec<PlayerView>,
        game_over: bool,
    },
    GameRestarted {
        lobby: LobbyView,
    },
    GameLeft,
    PlayerLeft {
        player_id: PlayerId,
        new_host_id: Option<PlayerId>,
        players: Vec<PlayerView>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn error(err: &GameError) -> Self {
        ServerToClientMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Player(PlayerId),
    Lobby,
}

/// A message the lobby wants delivered, with its audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub destination: Destination,
    pub message: ServerToClientMessage,
}

impl Dispatch {
    pub fn to_player(player_id: PlayerId, message: ServerToClientMessage) -> Self {
        Self {
            destination: Destination::Player(player_id),
            message,
        }
    }

    pub fn to_lobby(message: ServerToClientMessage) -> Self {
        Self {
            destination: Destination::Lobby,
            message,
        }
    }
}

impl PlayerView {
    pub fn new(player: &Player, host_id: PlayerId) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            score: player.score,
            has_marker: player.has_marker,
            connected: player.is_connected(),
            is_host: player.id == host_id,
        }
    }

    pub fn roster(lobby: &Lobby) -> Vec<Self> {
        lobby
            .players
            .iter()
            .map(|p| Self::new(p, lobby.host_id))
            .collect()
    }
}

impl AnswerView {
    pub fn list(lobby: &Lobby) -> Vec<Self> {
        lobby
            .answers()
            .iter()
            .map(|answer| AnswerView {
                player_id: answer.player_id,
                player_name: lobby
                    .player(answer.player_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
                text: answer.text.clone(),
            })
            .collect()
    }
}

impl PhaseView {
    pub fn from_lobby(lobby: &Lobby) -> Self {
        let total = lobby.players.len();
        match &lobby.phase {
            Phase::Waiting => PhaseView::Waiting,
            Phase::ChoosingPrompt {
                prompt_holder,
                options,
            } => PhaseView::ChoosingPrompt {
                prompt_holder_id: *prompt_holder,
                options: options.clone(),
            },
            Phase::Answering { prompt, answers } => PhaseView::Answering {
                prompt: prompt.clone(),
                submitted: answers.len(),
                total,
            },
            Phase::Voting { prompt, votes, .. } => PhaseView::Voting {
                prompt: prompt.clone(),
                answers: AnswerView::list(lobby),
                voted: votes.len(),
                total,
            },
            Phase::Results {
                prompt, outcome, ..
            } => PhaseView::Results {
                prompt: prompt.clone(),
                outcome: outcome.clone(),
            },
            Phase::Finished {
                prompt,
                outcome,
                winner,
            } => PhaseView::Finished {
                prompt: prompt.clone(),
                outcome: outcome.clone(),
                winner: winner.clone(),
            },
        }
    }
}

impl LobbyView {
    pub fn from_lobby(lobby: &Lobby) -> Self {
        Self {
            lobby_code: lobby.code.to_string(),
            host_id: lobby.host_id,
            round: lobby.round,
            scoring_mode: lobby.settings.scoring_mode,
            prompt_selection: lobby.settings.prompt_selection,
            win_score: lobby.settings.win_score,
            players: PlayerView::roster(lobby),
            state: PhaseView::from_lobby(lobby),
        }
    }
}

impl ReconnectSnapshot {
    pub fn for_player(lobby: &Lobby, player_id: PlayerId) -> Self {
        Self {
            lobby: LobbyView::from_lobby(lobby),
            player_id,
            is_host: lobby.is_host(player_id),
            is_prompt_holder: lobby.prompt_holder() == Some(player_id),
            has_answered: lobby.has_answered(player_id),
            has_voted: lobby.has_voted(player_id),
        }
    }
}

impl LobbySummary {
    pub fn from_lobby(lobby: &Lobby) -> Self {
        let phase = lobby.phase.kind();
        Self {
            lobby_code: lobby.code.to_string(),
            phase,
            round: lobby.round,
            player_count: lobby.players.len(),
            max_players: lobby.settings.max_players,
            joinable: phase == PhaseKind::Waiting
                && lobby.players.len() < lobby.settings.max_players,
        }
    }
}
