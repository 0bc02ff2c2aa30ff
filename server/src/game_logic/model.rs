use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use uuid::Uuid;

use super::error::GameError;
use super::resolution::RoundOutcome;
use super::LobbySettings;

pub type PlayerId = Uuid;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Short shareable lobby identifier: six uppercase alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyCode(String);

impl LobbyCode {
    pub const LENGTH: usize = 6;

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..Self::LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Accepts user-typed codes case-insensitively.
    pub fn parse(raw: &str) -> Result<Self, GameError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() != Self::LENGTH || !code.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
            return Err(GameError::Validation(format!(
                "lobby code must be {} letters or digits",
                Self::LENGTH
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    /// Odd-one-out flag from the most recent resolution. Blocks victory.
    pub has_marker: bool,
    pub connection: ConnectionState,
}

impl Player {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            score: 0,
            has_marker: false,
            connection: ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub player_id: PlayerId,
    /// Normalized text: trimmed, lowercased, inner whitespace collapsed.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub player_id: PlayerId,
    /// Other players the voter believes answered the same. Never contains the voter.
    pub endorsed: BTreeSet<PlayerId>,
}

/// Lobby phase. Each variant carries only the round data meaningful to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    ChoosingPrompt {
        prompt_holder: PlayerId,
        options: Vec<String>,
    },
    Answering {
        prompt: String,
        answers: Vec<Answer>,
    },
    Voting {
        prompt: String,
        answers: Vec<Answer>,
        votes: Vec<Vote>,
    },
    Results {
        prompt: String,
        answers: Vec<Answer>,
        votes: Vec<Vote>,
        outcome: RoundOutcome,
    },
    Finished {
        prompt: String,
        outcome: RoundOutcome,
        winner: PlayerSnapshot,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Waiting,
    ChoosingPrompt,
    Answering,
    Voting,
    Results,
    Finished,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseKind::Waiting => "waiting",
            PhaseKind::ChoosingPrompt => "choosing a prompt",
            PhaseKind::Answering => "answering",
            PhaseKind::Voting => "voting",
            PhaseKind::Results => "showing results",
            PhaseKind::Finished => "finished",
        };
        f.write_str(name)
    }
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Waiting => PhaseKind::Waiting,
            Phase::ChoosingPrompt { .. } => PhaseKind::ChoosingPrompt,
            Phase::Answering { .. } => PhaseKind::Answering,
            Phase::Voting { .. } => PhaseKind::Voting,
            Phase::Results { .. } => PhaseKind::Results,
            Phase::Finished { .. } => PhaseKind::Finished,
        }
    }
}

/// Aggregate root for one game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    pub code: LobbyCode,
    pub host_id: PlayerId,
    /// Join order. Drives prompt holder rotation.
    pub players: Vec<Player>,
    pub phase: Phase,
    pub round: u32,
    pub prompt_holder_index: usize,
    pub used_prompts: BTreeSet<String>,
    pub settings: LobbySettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lobby {
    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub(super) fn player_mut(&mut self, player_id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn is_host(&self, player_id: PlayerId) -> bool {
        self.host_id == player_id
    }

    pub fn current_prompt(&self) -> Option<&str> {
        match &self.phase {
            Phase::Waiting | Phase::ChoosingPrompt { .. } => None,
            Phase::Answering { prompt, .. }
            | Phase::Voting { prompt, .. }
            | Phase::Results { prompt, .. }
            | Phase::Finished { prompt, .. } => Some(prompt),
        }
    }

    pub fn prompt_options(&self) -> &[String] {
        match &self.phase {
            Phase::ChoosingPrompt { options, .. } => options,
            _ => &[],
        }
    }

    pub fn prompt_holder(&self) -> Option<PlayerId> {
        match &self.phase {
            Phase::ChoosingPrompt { prompt_holder, .. } => Some(*prompt_holder),
            _ => None,
        }
    }

    pub fn answers(&self) -> &[Answer] {
        match &self.phase {
            Phase::Answering { answers, .. }
            | Phase::Voting { answers, .. }
            | Phase::Results { answers, .. } => answers,
            _ => &[],
        }
    }

    pub fn votes(&self) -> &[Vote] {
        match &self.phase {
            Phase::Voting { votes, .. } | Phase::Results { votes, .. } => votes,
            _ => &[],
        }
    }

    pub fn winner(&self) -> Option<&PlayerSnapshot> {
        match &self.phase {
            Phase::Finished { winner, .. } => Some(winner),
            _ => None,
        }
    }

    pub fn has_answered(&self, player_id: PlayerId) -> bool {
        self.answers().iter().any(|a| a.player_id == player_id)
    }

    pub fn has_voted(&self, player_id: PlayerId) -> bool {
        self.votes().iter().any(|v| v.player_id == player_id)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Every current player has an entry keyed by their id.
pub(super) fn all_players_submitted<'a>(
    players: &[Player],
    submitted: impl Iterator<Item = &'a PlayerId>,
) -> bool {
    let submitted: HashSet<&PlayerId> = submitted.collect();
    players.iter().all(|p| submitted.contains(&p.id))
}

/// Trims, lowercases and collapses inner whitespace so that "  Pizza  Hut"
/// and "pizza hut" compare equal.
pub fn normalize_answer(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
