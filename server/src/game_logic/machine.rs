use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeSet;

use super::error::GameError;
use super::messages::{
    AnswerView, Dispatch, LobbyView, PhaseView, PlayerView, ReconnectSnapshot,
    ServerToClientMessage,
};
use super::model::{
    Answer, ConnectionState, Lobby, LobbyCode, Phase, Player, PlayerId, Vote,
    all_players_submitted, normalize_answer,
};
use super::questions::QuestionPool;
use super::resolution::resolve_round;
use super::{LobbySettings, PromptSelection, ScoringMode};

/// Options offered to the prompt holder each round.
const PROMPT_OPTION_COUNT: usize = 2;

/// An in-lobby action by a bound player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    StartGame,
    SelectPrompt { index: usize },
    SubmitAnswer { text: String },
    SubmitVotes { endorsed: Vec<PlayerId> },
    NextRound,
    RestartGame,
    LeaveGame,
}

impl PlayerAction {
    fn describe(&self) -> &'static str {
        match self {
            PlayerAction::StartGame => "start the game",
            PlayerAction::SelectPrompt { .. } => "select a prompt",
            PlayerAction::SubmitAnswer { .. } => "submit an answer",
            PlayerAction::SubmitVotes { .. } => "submit votes",
            PlayerAction::NextRound => "start the next round",
            PlayerAction::RestartGame => "restart the game",
            PlayerAction::LeaveGame => "leave the game",
        }
    }
}

/// What the owner of the lobby has to do after an action succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEffect {
    Continue,
    /// The caller is no longer a player and its connection should unbind.
    CallerLeft,
    /// The last player left. The lobby must be deleted, not saved.
    LobbyEmptied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub dispatches: Vec<Dispatch>,
    pub effect: ActionEffect,
}

impl ActionOutcome {
    fn continue_with(dispatches: Vec<Dispatch>) -> Self {
        Self {
            dispatches,
            effect: ActionEffect::Continue,
        }
    }
}

fn validate_display_name(raw: &str, max_chars: usize) -> Result<String, GameError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(GameError::Validation("display name is required".to_string()));
    }
    if name.chars().count() > max_chars {
        return Err(GameError::Validation(format!(
            "display name is limited to {max_chars} characters"
        )));
    }
    Ok(name.to_string())
}

impl Lobby {
    /// New lobby in `Waiting` with the creator as its only player and host.
    pub fn create(
        code: LobbyCode,
        display_name: &str,
        settings: LobbySettings,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<Dispatch>), GameError> {
        let name = validate_display_name(display_name, settings.max_name_chars)?;
        let host = Player::new(name);
        let host_id = host.id;

        let lobby = Self {
            code,
            host_id,
            players: vec![host],
            phase: Phase::Waiting,
            round: 0,
            prompt_holder_index: 0,
            used_prompts: BTreeSet::new(),
            settings,
            created_at: now,
            updated_at: now,
        };

        let dispatches = vec![Dispatch::to_player(
            host_id,
            ServerToClientMessage::LobbyCreated {
                lobby: LobbyView::from_lobby(&lobby),
                player_id: host_id,
            },
        )];
        Ok((lobby, dispatches))
    }

    pub fn join(&mut self, display_name: &str) -> Result<(PlayerId, Vec<Dispatch>), GameError> {
        if !matches!(self.phase, Phase::Waiting) {
            return Err(GameError::InvalidPhase {
                action: "join",
                phase: self.phase.kind(),
            });
        }
        if self.players.len() >= self.settings.max_players {
            return Err(GameError::Full {
                capacity: self.settings.max_players,
            });
        }
        let name = validate_display_name(display_name, self.settings.max_name_chars)?;

        let player = Player::new(name);
        let player_id = player.id;
        let view = PlayerView::new(&player, self.host_id);
        self.players.push(player);

        tracing::info!(
            lobby.code = %self.code,
            player.id = %player_id,
            players.count = self.players.len(),
            "Player joined lobby"
        );

        let dispatches = vec![
            Dispatch::to_player(
                player_id,
                ServerToClientMessage::LobbyJoined {
                    lobby: LobbyView::from_lobby(self),
                    player_id,
                },
            ),
            Dispatch::to_lobby(ServerToClientMessage::PlayerJoined {
                player: view,
                players: PlayerView::roster(self),
            }),
        ];
        Ok((player_id, dispatches))
    }

    pub fn reconnect(&mut self, player_id: PlayerId) -> Result<Vec<Dispatch>, GameError> {
        let player = self
            .player_mut(player_id)
            .ok_or_else(|| GameError::NotFound("player is not part of this lobby".to_string()))?;
        player.connection = ConnectionState::Connected;

        Ok(vec![
            Dispatch::to_player(
                player_id,
                ServerToClientMessage::Reconnected {
                    snapshot: ReconnectSnapshot::for_player(self, player_id),
                },
            ),
            Dispatch::to_lobby(ServerToClientMessage::PlayerConnectionChanged {
                player_id,
                connected: true,
            }),
        ])
    }

    /// Best effort. Never removes the player and never blocks completion.
    pub fn disconnect(&mut self, player_id: PlayerId) -> Vec<Dispatch> {
        match self.player_mut(player_id) {
            Some(player) if player.is_connected() => {
                player.connection = ConnectionState::Disconnected;
                vec![Dispatch::to_lobby(
                    ServerToClientMessage::PlayerConnectionChanged {
                        player_id,
                        connected: false,
                    },
                )]
            }
            _ => Vec::new(),
        }
    }

    /// Validates and applies one action. On error the lobby is untouched.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        actor: PlayerId,
        action: PlayerAction,
        pool: &QuestionPool,
        rng: &mut R,
    ) -> Result<ActionOutcome, GameError> {
        if self.player(actor).is_none() {
            return Err(GameError::NotFound(
                "player is not part of this lobby".to_string(),
            ));
        }
        let description = action.describe();

        match action {
            PlayerAction::StartGame => {
                self.require_phase(matches!(self.phase, Phase::Waiting), description)?;
                self.require_host(actor, description)?;
                if self.players.len() < self.settings.min_players {
                    return Err(GameError::Validation(format!(
                        "at least {} players are needed to start",
                        self.settings.min_players
                    )));
                }
                self.begin_round(pool, rng).map(ActionOutcome::continue_with)
            }
            PlayerAction::SelectPrompt { index } => self
                .select_prompt(actor, index, description)
                .map(ActionOutcome::continue_with),
            PlayerAction::SubmitAnswer { text } => self
                .submit_answer(actor, &text, description)
                .map(ActionOutcome::continue_with),
            PlayerAction::SubmitVotes { endorsed } => self
                .submit_votes(actor, endorsed, description)
                .map(ActionOutcome::continue_with),
            PlayerAction::NextRound => {
                self.require_phase(matches!(self.phase, Phase::Results { .. }), description)?;
                self.require_host(actor, description)?;
                self.prompt_holder_index = (self.prompt_holder_index + 1) % self.players.len();
                self.begin_round(pool, rng).map(ActionOutcome::continue_with)
            }
            PlayerAction::RestartGame => {
                self.require_phase(matches!(self.phase, Phase::Finished { .. }), description)?;
                self.require_host(actor, description)?;
                Ok(ActionOutcome::continue_with(self.restart()))
            }
            PlayerAction::LeaveGame => Ok(self.leave(actor)),
        }
    }

    fn require_phase(&self, ok: bool, action: &'static str) -> Result<(), GameError> {
        if ok {
            Ok(())
        } else {
            Err(GameError::InvalidPhase {
                action,
                phase: self.phase.kind(),
            })
        }
    }

    fn require_host(&self, actor: PlayerId, action: &'static str) -> Result<(), GameError> {
        if self.is_host(actor) {
            Ok(())
        } else {
            Err(GameError::Forbidden(format!("only the host can {action}")))
        }
    }

    fn begin_round<R: Rng + ?Sized>(
        &mut self,
        pool: &QuestionPool,
        rng: &mut R,
    ) -> Result<Vec<Dispatch>, GameError> {
        if pool.is_empty() {
            return Err(GameError::Unavailable("no prompts available".to_string()));
        }

        self.round += 1;
        self.prompt_holder_index %= self.players.len();

        self.phase = match self.settings.prompt_selection {
            PromptSelection::PromptHolder => Phase::ChoosingPrompt {
                prompt_holder: self.players[self.prompt_holder_index].id,
                options: pool.draw(&mut self.used_prompts, PROMPT_OPTION_COUNT, rng),
            },
            PromptSelection::Automatic => Phase::Answering {
                prompt: pool
                    .draw(&mut self.used_prompts, 1, rng)
                    .into_iter()
                    .next()
                    .unwrap_or_default(),
                answers: Vec::new(),
            },
        };

        tracing::info!(
            lobby.code = %self.code,
            round = self.round,
            phase = %self.phase.kind(),
            "Round started"
        );

        Ok(vec![Dispatch::to_lobby(ServerToClientMessage::RoundStarted {
            round: self.round,
            state: PhaseView::from_lobby(self),
        })])
    }

    fn select_prompt(
        &mut self,
        actor: PlayerId,
        index: usize,
        description: &'static str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let Phase::ChoosingPrompt {
            prompt_holder,
            options,
        } = &self.phase
        else {
            return Err(GameError::InvalidPhase {
                action: description,
                phase: self.phase.kind(),
            });
        };
        if *prompt_holder != actor {
            return Err(GameError::Forbidden(
                "only the prompt holder can select the prompt".to_string(),
            ));
        }
        let prompt = options.get(index).cloned().ok_or_else(|| {
            GameError::Validation(format!("prompt option {index} does not exist"))
        })?;

        self.phase = Phase::Answering {
            prompt: prompt.clone(),
            answers: Vec::new(),
        };
        Ok(vec![Dispatch::to_lobby(
            ServerToClientMessage::PromptSelected { prompt },
        )])
    }

    fn submit_answer(
        &mut self,
        actor: PlayerId,
        raw: &str,
        description: &'static str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let max_chars = self.settings.max_answer_chars;
        let total = self.players.len();
        let Phase::Answering { answers, .. } = &mut self.phase else {
            return Err(GameError::InvalidPhase {
                action: description,
                phase: self.phase.kind(),
            });
        };
        if answers.iter().any(|a| a.player_id == actor) {
            return Err(GameError::DuplicateSubmission("an answer"));
        }
        let text = normalize_answer(raw);
        if text.is_empty() {
            return Err(GameError::Validation("answer must not be empty".to_string()));
        }
        if text.chars().count() > max_chars {
            return Err(GameError::Validation(format!(
                "answer is limited to {max_chars} characters"
            )));
        }

        answers.push(Answer {
            player_id: actor,
            text: text.clone(),
        });
        let submitted = answers.len();

        let mut dispatches = vec![
            Dispatch::to_player(actor, ServerToClientMessage::AnswerAccepted { text }),
            Dispatch::to_lobby(ServerToClientMessage::AnswerProgress { submitted, total }),
        ];
        dispatches.extend(self.advance_if_answers_complete());
        Ok(dispatches)
    }

    fn submit_votes(
        &mut self,
        actor: PlayerId,
        endorsed: Vec<PlayerId>,
        description: &'static str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let total = self.players.len();
        let unknown = endorsed
            .iter()
            .find(|id| self.player(**id).is_none())
            .copied();
        let Phase::Voting { votes, .. } = &mut self.phase else {
            return Err(GameError::InvalidPhase {
                action: description,
                phase: self.phase.kind(),
            });
        };
        if votes.iter().any(|v| v.player_id == actor) {
            return Err(GameError::DuplicateSubmission("votes"));
        }
        if let Some(unknown) = unknown {
            return Err(GameError::Validation(format!(
                "endorsed player {unknown} is not in this lobby"
            )));
        }

        let endorsed: BTreeSet<PlayerId> = endorsed.into_iter().filter(|id| *id != actor).collect();
        votes.push(Vote {
            player_id: actor,
            endorsed: endorsed.clone(),
        });
        let voted = votes.len();

        let mut dispatches = vec![
            Dispatch::to_player(
                actor,
                ServerToClientMessage::VotesAccepted {
                    endorsed_player_ids: endorsed.into_iter().collect(),
                },
            ),
            Dispatch::to_lobby(ServerToClientMessage::VotingProgress { voted, total }),
        ];
        dispatches.extend(self.advance_if_votes_complete());
        Ok(dispatches)
    }

    fn advance_if_answers_complete(&mut self) -> Vec<Dispatch> {
        let Phase::Answering { answers, .. } = &self.phase else {
            return Vec::new();
        };
        if !all_players_submitted(&self.players, answers.iter().map(|a| &a.player_id)) {
            return Vec::new();
        }
        let Phase::Answering { prompt, answers } = std::mem::replace(&mut self.phase, Phase::Waiting)
        else {
            return Vec::new();
        };

        match self.settings.scoring_mode {
            ScoringMode::MajorityMatch => self.resolve(prompt, answers, Vec::new()),
            ScoringMode::MutualEndorsement => {
                self.phase = Phase::Voting {
                    prompt: prompt.clone(),
                    answers,
                    votes: Vec::new(),
                };
                tracing::debug!(lobby.code = %self.code, round = self.round, "All answers in, voting");
                vec![Dispatch::to_lobby(ServerToClientMessage::VotingStarted {
                    prompt,
                    answers: AnswerView::list(self),
                })]
            }
        }
    }

    fn advance_if_votes_complete(&mut self) -> Vec<Dispatch> {
        let Phase::Voting { votes, .. } = &self.phase else {
            return Vec::new();
        };
        if !all_players_submitted(&self.players, votes.iter().map(|v| &v.player_id)) {
            return Vec::new();
        }
        let Phase::Voting {
            prompt,
            answers,
            votes,
        } = std::mem::replace(&mut self.phase, Phase::Waiting)
        else {
            return Vec::new();
        };
        self.resolve(prompt, answers, votes)
    }

    fn resolve(&mut self, prompt: String, answers: Vec<Answer>, votes: Vec<Vote>) -> Vec<Dispatch> {
        let outcome = resolve_round(
            &mut self.players,
            &answers,
            &votes,
            &self.settings,
            self.round,
        );
        let game_over = outcome.winner.is_some();

        tracing::info!(
            lobby.code = %self.code,
            round = self.round,
            majority.size = outcome.majority_group.len(),
            game_over,
            "Round resolved"
        );

        self.phase = match outcome.winner.clone() {
            Some(winner) => Phase::Finished {
                prompt,
                outcome: outcome.clone(),
                winner,
            },
            None => Phase::Results {
                prompt,
                answers,
                votes,
                outcome: outcome.clone(),
            },
        };

        vec![Dispatch::to_lobby(ServerToClientMessage::RoundComplete {
            outcome,
            players: PlayerView::roster(self),
            game_over,
        })]
    }

    fn restart(&mut self) -> Vec<Dispatch> {
        for player in &mut self.players {
            player.score = 0;
            player.has_marker = false;
        }
        self.round = 0;
        self.prompt_holder_index = 0;
        self.used_prompts.clear();
        self.phase = Phase::Waiting;

        tracing::info!(lobby.code = %self.code, "Game restarted");
        vec![Dispatch::to_lobby(ServerToClientMessage::GameRestarted {
            lobby: LobbyView::from_lobby(self),
        })]
    }

    fn leave(&mut self, actor: PlayerId) -> ActionOutcome {
        let Some(index) = self.players.iter().position(|p| p.id == actor) else {
            return ActionOutcome::continue_with(Vec::new());
        };
        self.players.remove(index);
        let mut dispatches = vec![Dispatch::to_player(actor, ServerToClientMessage::GameLeft)];

        if self.players.is_empty() {
            tracing::info!(lobby.code = %self.code, "Last player left lobby");
            return ActionOutcome {
                dispatches,
                effect: ActionEffect::LobbyEmptied,
            };
        }

        let new_host_id = if self.host_id == actor {
            let successor = self
                .players
                .iter()
                .find(|p| p.is_connected())
                .unwrap_or(&self.players[0])
                .id;
            self.host_id = successor;
            Some(successor)
        } else {
            None
        };

        let remaining = self.players.len();
        if index < self.prompt_holder_index {
            self.prompt_holder_index -= 1;
        } else if index == self.prompt_holder_index
            && !matches!(self.phase, Phase::Waiting | Phase::ChoosingPrompt { .. })
        {
            // The successor slid into the holder slot; the next rotation must land on them.
            self.prompt_holder_index = self
                .prompt_holder_index
                .checked_sub(1)
                .unwrap_or(remaining - 1);
        }
        self.prompt_holder_index %= remaining;

        tracing::info!(
            lobby.code = %self.code,
            player.id = %actor,
            new_host = ?new_host_id,
            players.count = self.players.len(),
            "Player left lobby"
        );

        dispatches.push(Dispatch::to_lobby(ServerToClientMessage::PlayerLeft {
            player_id: actor,
            new_host_id,
            players: PlayerView::roster(self),
        }));

        let holder_index = self.prompt_holder_index;
        let successor_holder = self.players[holder_index].id;
        match &mut self.phase {
            Phase::ChoosingPrompt { prompt_holder, .. } if *prompt_holder == actor => {
                *prompt_holder = successor_holder;
                // Re-announce so clients see who holds the prompt now.
                dispatches.push(Dispatch::to_lobby(ServerToClientMessage::RoundStarted {
                    round: self.round,
                    state: PhaseView::from_lobby(self),
                }));
            }
            Phase::Answering { answers, .. } => {
                answers.retain(|a| a.player_id != actor);
                dispatches.extend(self.advance_if_answers_complete());
            }
            Phase::Voting { answers, votes, .. } => {
                answers.retain(|a| a.player_id != actor);
                votes.retain(|v| v.player_id != actor);
                for vote in votes.iter_mut() {
                    vote.endorsed.remove(&actor);
                }
                dispatches.extend(self.advance_if_votes_complete());
            }
            _ => {}
        }

        ActionOutcome {
            dispatches,
            effect: ActionEffect::CallerLeft,
        }
    }
}
