//! Pure round state machine: phase transitions, target selection and vote tallying.
//!
//! Nothing here touches storage or locks; the round service feeds it the
//! persisted game and applies whatever it decides.

use indexmap::IndexMap;
use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{AnswerEntity, VoteEntity};

/// What the current round expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Question shown, non-target players submit answers.
    Question,
    /// Answer collection; kept for clients that render it explicitly.
    Answer,
    /// Target picks a favorite answer.
    Vote,
    /// Scores and per-answer breakdown are shown.
    Results,
}

impl RoundPhase {
    fn rank(self) -> u8 {
        match self {
            RoundPhase::Question => 0,
            RoundPhase::Answer => 1,
            RoundPhase::Vote => 2,
            RoundPhase::Results => 3,
        }
    }

    /// Whether answers are still accepted in this phase.
    pub fn accepts_answers(self) -> bool {
        matches!(self, RoundPhase::Question | RoundPhase::Answer)
    }
}

/// Lifecycle of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    InProgress,
    Completed,
}

/// Position of a game in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Playing(RoundPhase),
    Completed,
}

impl Stage {
    pub fn new(status: GameStatus, phase: RoundPhase) -> Self {
        match status {
            GameStatus::InProgress => Stage::Playing(phase),
            GameStatus::Completed => Stage::Completed,
        }
    }
}

/// Events that can be applied to a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// Every eligible player has answered.
    AnswersCollected,
    /// The target cast the round-deciding vote.
    TargetVoted,
    /// Host or target moves on; `last_round` completes the game instead.
    AdvanceRound { last_round: bool },
}

/// Outcome of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The game moves to a new stage.
    Move(Stage),
    /// The event was already applied; nothing to do.
    AlreadyApplied,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Stage the game was in when the event was received.
    pub from: Stage,
    /// The event that cannot be applied from this stage.
    pub event: RoundEvent,
}

/// Compute the next stage. Phases only move forward within a round;
/// replaying an event that a later phase already implies is a no-op.
pub fn compute_transition(from: Stage, event: RoundEvent) -> Result<Step, InvalidTransition> {
    let step = match (from, event) {
        (Stage::Playing(phase), RoundEvent::AnswersCollected) => {
            if phase.rank() >= RoundPhase::Vote.rank() {
                Step::AlreadyApplied
            } else {
                Step::Move(Stage::Playing(RoundPhase::Vote))
            }
        }
        (Stage::Playing(RoundPhase::Vote), RoundEvent::TargetVoted) => {
            Step::Move(Stage::Playing(RoundPhase::Results))
        }
        (Stage::Playing(RoundPhase::Results), RoundEvent::TargetVoted) => Step::AlreadyApplied,
        (
            Stage::Playing(RoundPhase::Results | RoundPhase::Vote),
            RoundEvent::AdvanceRound { last_round },
        ) => {
            if last_round {
                Step::Move(Stage::Completed)
            } else {
                Step::Move(Stage::Playing(RoundPhase::Question))
            }
        }
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(step)
}

/// Choose the next target uniformly among `players`, skipping `previous` when
/// at least two other players remain.
pub fn pick_target<R: Rng + ?Sized>(
    players: &[String],
    previous: Option<&str>,
    rng: &mut R,
) -> Option<String> {
    let others: Vec<&String> = players
        .iter()
        .filter(|id| Some(id.as_str()) != previous)
        .collect();

    if others.len() >= 2 {
        others.choose(rng).map(|id| (*id).clone())
    } else {
        players.choose(rng).cloned()
    }
}

/// Per-answer line of a round's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AnswerTally {
    pub answer_id: Uuid,
    pub author_id: String,
    pub votes: u32,
    /// Chosen by the round's target.
    pub selected: bool,
}

/// Fold the votes of one question into `scores`. Every vote credits the author
/// of the chosen answer, never the voter. Votes for unknown answers are ignored.
pub fn tally_votes(
    scores: &IndexMap<String, i32>,
    answers: &[AnswerEntity],
    votes: &[VoteEntity],
    target_id: &str,
) -> (IndexMap<String, i32>, Vec<AnswerTally>) {
    let mut breakdown: Vec<AnswerTally> = answers
        .iter()
        .map(|answer| AnswerTally {
            answer_id: answer.id,
            author_id: answer.author_id.clone(),
            votes: 0,
            selected: false,
        })
        .collect();
    let mut next = scores.clone();

    for vote in votes {
        let Some(line) = breakdown.iter_mut().find(|line| line.answer_id == vote.answer_id) else {
            continue;
        };
        line.votes += 1;
        if vote.voter_id == target_id {
            line.selected = true;
        }
        *next.entry(line.author_id.clone()).or_insert(0) += 1;
    }

    (next, breakdown)
}

/// Whether every eligible player (everyone but the target) has answered.
pub fn answers_complete(players: &[String], target_id: &str, answers: &[AnswerEntity]) -> bool {
    let mut eligible = players.iter().filter(|id| id.as_str() != target_id).peekable();
    eligible.peek().is_some()
        && eligible.all(|id| answers.iter().any(|answer| &answer.author_id == id))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::SystemTime};

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn players(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("p{i}")).collect()
    }

    #[test]
    fn answers_collected_moves_to_vote_once() {
        let first = compute_transition(
            Stage::Playing(RoundPhase::Question),
            RoundEvent::AnswersCollected,
        )
        .unwrap();
        assert_eq!(first, Step::Move(Stage::Playing(RoundPhase::Vote)));

        for phase in [RoundPhase::Vote, RoundPhase::Results] {
            let again =
                compute_transition(Stage::Playing(phase), RoundEvent::AnswersCollected).unwrap();
            assert_eq!(again, Step::AlreadyApplied);
        }
    }

    #[test]
    fn target_vote_requires_vote_phase() {
        assert_eq!(
            compute_transition(Stage::Playing(RoundPhase::Vote), RoundEvent::TargetVoted).unwrap(),
            Step::Move(Stage::Playing(RoundPhase::Results))
        );
        assert_eq!(
            compute_transition(Stage::Playing(RoundPhase::Results), RoundEvent::TargetVoted)
                .unwrap(),
            Step::AlreadyApplied
        );
        assert!(
            compute_transition(Stage::Playing(RoundPhase::Question), RoundEvent::TargetVoted)
                .is_err()
        );
    }

    #[test]
    fn advance_round_allowed_from_results_and_vote_only() {
        let next = RoundEvent::AdvanceRound { last_round: false };
        assert_eq!(
            compute_transition(Stage::Playing(RoundPhase::Vote), next).unwrap(),
            Step::Move(Stage::Playing(RoundPhase::Question))
        );
        assert_eq!(
            compute_transition(
                Stage::Playing(RoundPhase::Results),
                RoundEvent::AdvanceRound { last_round: true }
            )
            .unwrap(),
            Step::Move(Stage::Completed)
        );

        for from in [
            Stage::Playing(RoundPhase::Question),
            Stage::Playing(RoundPhase::Answer),
            Stage::Completed,
        ] {
            let err = compute_transition(from, next).unwrap_err();
            assert_eq!(err.from, from);
        }
    }

    #[test]
    fn completed_game_rejects_everything() {
        for event in [
            RoundEvent::AnswersCollected,
            RoundEvent::TargetVoted,
            RoundEvent::AdvanceRound { last_round: true },
        ] {
            assert!(compute_transition(Stage::Completed, event).is_err());
        }
    }

    #[test]
    fn pick_target_never_repeats_previous_with_enough_players() {
        let mut rng = StdRng::seed_from_u64(7);
        let roster = players(3);
        for _ in 0..200 {
            let next = pick_target(&roster, Some("p2"), &mut rng).unwrap();
            assert_ne!(next, "p2");
        }
    }

    #[test]
    fn pick_target_covers_all_eligible_players() {
        let mut rng = StdRng::seed_from_u64(11);
        let roster = players(4);
        let seen: HashSet<String> = (0..200)
            .map(|_| pick_target(&roster, Some("p1"), &mut rng).unwrap())
            .collect();
        assert_eq!(seen, HashSet::from(["p2".into(), "p3".into(), "p4".into()]));
    }

    #[test]
    fn pick_target_with_two_players_may_repeat() {
        let mut rng = StdRng::seed_from_u64(3);
        let roster = players(2);
        let picked = pick_target(&roster, Some("p1"), &mut rng).unwrap();
        assert!(roster.contains(&picked));
        assert!(pick_target(&[], None, &mut rng).is_none());
    }

    #[test]
    fn tally_credits_author_not_voter() {
        let question_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        let answer = |author: &str| AnswerEntity {
            id: Uuid::new_v4(),
            question_id,
            game_id,
            author_id: author.into(),
            content: "x".into(),
            vote_count: 0,
            selected: false,
            created_at: SystemTime::now(),
        };
        let answers = vec![answer("p2"), answer("p3"), answer("p4")];
        let votes = vec![VoteEntity {
            id: Uuid::new_v4(),
            question_id,
            game_id,
            voter_id: "p1".into(),
            answer_id: answers[0].id,
            created_at: SystemTime::now(),
        }];
        let scores: IndexMap<String, i32> = players(4).into_iter().map(|p| (p, 0)).collect();

        let (next, breakdown) = tally_votes(&scores, &answers, &votes, "p1");

        assert_eq!(next["p1"], 0);
        assert_eq!(next["p2"], 1);
        assert_eq!(next["p3"], 0);
        assert_eq!(next["p4"], 0);
        assert!(breakdown[0].selected);
        assert_eq!(breakdown[0].votes, 1);
        assert_eq!(breakdown.iter().filter(|line| line.selected).count(), 1);
    }

    #[test]
    fn answers_complete_once_everyone_but_target_answered() {
        let roster = players(4);
        let answer = |author: &str| AnswerEntity {
            id: Uuid::new_v4(),
            question_id: Uuid::nil(),
            game_id: Uuid::nil(),
            author_id: author.into(),
            content: "x".into(),
            vote_count: 0,
            selected: false,
            created_at: SystemTime::now(),
        };

        let mut answers = vec![answer("p2"), answer("p3")];
        assert!(!answers_complete(&roster, "p1", &answers));
        answers.push(answer("p4"));
        assert!(answers_complete(&roster, "p1", &answers));
        assert!(!answers_complete(&["p1".to_string()], "p1", &[]));
    }
}
