use disjoint::DisjointSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::model::{Answer, Player, PlayerId, PlayerSnapshot, Vote};
use super::{LobbySettings, ScoringMode};

/// Who matched whom in one round, before any score is touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grouping {
    /// Members of the unique largest group of size > 1. Empty on a tie.
    pub majority: BTreeSet<PlayerId>,
    pub markers: BTreeSet<PlayerId>,
    /// Every group in first-member player order, members in player order.
    pub groups: Vec<Vec<PlayerId>>,
    pub majority_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRoundResult {
    pub player_id: PlayerId,
    pub player_name: String,
    pub answer: Option<String>,
    pub scored: bool,
    pub got_marker: bool,
    pub new_score: u32,
}

/// Everything the results screen needs, persisted with the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: u32,
    pub scoring_mode: ScoringMode,
    pub results: Vec<PlayerRoundResult>,
    pub majority_group: Vec<PlayerId>,
    pub majority_answer: Option<String>,
    pub answer_counts: BTreeMap<String, usize>,
    pub groups: Vec<Vec<PlayerId>>,
    pub winner: Option<PlayerSnapshot>,
}

/// Picks the unique strictly-largest group of size > 1.
fn unique_largest(groups: &[Vec<PlayerId>]) -> Option<usize> {
    let largest = groups.iter().map(Vec::len).max()?;
    if largest < 2 {
        return None;
    }
    let mut candidates = groups
        .iter()
        .enumerate()
        .filter(|(_, group)| group.len() == largest);
    let (index, _) = candidates.next()?;
    if candidates.next().is_some() {
        return None;
    }
    Some(index)
}

/// Groups players by exact normalized answer text.
pub fn group_by_answer(order: &[PlayerId], answers: &[Answer]) -> Grouping {
    let text_by_player: HashMap<PlayerId, &str> = answers
        .iter()
        .map(|a| (a.player_id, a.text.as_str()))
        .collect();

    let mut texts: Vec<&str> = Vec::new();
    let mut groups: Vec<Vec<PlayerId>> = Vec::new();
    for player_id in order {
        let Some(text) = text_by_player.get(player_id) else {
            continue;
        };
        match texts.iter().position(|t| t == text) {
            Some(index) => groups[index].push(*player_id),
            None => {
                texts.push(text);
                groups.push(vec![*player_id]);
            }
        }
    }

    let markers = groups
        .iter()
        .filter(|group| group.len() == 1)
        .flatten()
        .copied()
        .collect();

    let (majority, majority_answer) = match unique_largest(&groups) {
        Some(index) => (
            groups[index].iter().copied().collect(),
            Some(texts[index].to_string()),
        ),
        None => (BTreeSet::new(), None),
    };

    Grouping {
        majority,
        markers,
        groups,
        majority_answer,
    }
}

/// Groups players by the transitive closure of their endorsements.
/// Self-endorsements and endorsements of unknown ids are ignored.
pub fn group_by_endorsement(order: &[PlayerId], votes: &[Vote]) -> Grouping {
    let index_of: HashMap<PlayerId, usize> =
        order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut sets = DisjointSet::with_len(order.len());
    let mut endorsed_by_others: BTreeSet<PlayerId> = BTreeSet::new();

    for vote in votes {
        let Some(&voter) = index_of.get(&vote.player_id) else {
            continue;
        };
        for endorsed in &vote.endorsed {
            if *endorsed == vote.player_id {
                continue;
            }
            if let Some(&target) = index_of.get(endorsed) {
                sets.join(voter, target);
                endorsed_by_others.insert(*endorsed);
            }
        }
    }

    // `sets()` yields sets ordered by their smallest index, members sorted.
    let groups: Vec<Vec<PlayerId>> = sets
        .sets()
        .into_iter()
        .map(|members| members.into_iter().map(|i| order[i]).collect())
        .collect();

    let markers = groups
        .iter()
        .filter(|group| group.len() == 1 && !endorsed_by_others.contains(&group[0]))
        .flatten()
        .copied()
        .collect();

    let majority = unique_largest(&groups)
        .map(|index| groups[index].iter().copied().collect())
        .unwrap_or_default();

    Grouping {
        majority,
        markers,
        groups,
        majority_answer: None,
    }
}

/// Applies a finished round to the players: every marker is cleared, the
/// majority scores a point, the new markers are set and the first qualifying
/// player in join order becomes the winner.
pub fn resolve_round(
    players: &mut [Player],
    answers: &[Answer],
    votes: &[Vote],
    settings: &LobbySettings,
    round: u32,
) -> RoundOutcome {
    let order: Vec<PlayerId> = players.iter().map(|p| p.id).collect();
    let grouping = match settings.scoring_mode {
        ScoringMode::MajorityMatch => group_by_answer(&order, answers),
        ScoringMode::MutualEndorsement => group_by_endorsement(&order, votes),
    };

    for player in players.iter_mut() {
        player.has_marker = false;
    }
    for player in players.iter_mut() {
        if grouping.majority.contains(&player.id) {
            player.score += 1;
        }
        player.has_marker = grouping.markers.contains(&player.id);
    }

    let winner = players
        .iter()
        .find(|p| p.score >= settings.win_score && !p.has_marker)
        .map(Player::snapshot);

    let mut answer_counts: BTreeMap<String, usize> = BTreeMap::new();
    for answer in answers {
        *answer_counts.entry(answer.text.clone()).or_default() += 1;
    }

    let results = players
        .iter()
        .map(|player| PlayerRoundResult {
            player_id: player.id,
            player_name: player.name.clone(),
            answer: answers
                .iter()
                .find(|a| a.player_id == player.id)
                .map(|a| a.text.clone()),
            scored: grouping.majority.contains(&player.id),
            got_marker: player.has_marker,
            new_score: player.score,
        })
        .collect();

    let majority_group = order
        .iter()
        .filter(|id| grouping.majority.contains(id))
        .copied()
        .collect();

    RoundOutcome {
        round,
        scoring_mode: settings.scoring_mode,
        results,
        majority_group,
        majority_answer: grouping.majority_answer,
        answer_counts,
        groups: grouping.groups,
        winner,
    }
}
