use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    dto::{
        game::{AnswerSummary, QuestionSummary},
        sse::{
            GameEndEvent, NewAnswerEvent, NewRoundEvent, PhaseChangeEvent, TargetPlayerVoteEvent,
            VoteSubmittedEvent,
        },
    },
    state::{
        ChannelId, SharedState,
        state_machine::{AnswerTally, RoundPhase},
    },
};

pub const EVENT_NEW_ROUND: &str = "new_round";
pub const EVENT_PHASE_CHANGE: &str = "phase_change";
pub const EVENT_NEW_ANSWER: &str = "new_answer";
pub const EVENT_VOTE_SUBMITTED: &str = "vote_submitted";
pub const EVENT_TARGET_PLAYER_VOTE: &str = "target_player_vote";
pub const EVENT_GAME_END: &str = "game_end";
pub const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Announce a freshly started round on the game channel.
pub fn broadcast_new_round(state: &SharedState, game_id: Uuid, question: QuestionSummary) {
    let payload = NewRoundEvent {
        round: question.round,
        question,
    };
    send_game_event(state, game_id, EVENT_NEW_ROUND, &payload);
}

/// Broadcast a phase change, with scores and breakdown when entering results.
pub fn broadcast_phase_change(
    state: &SharedState,
    game_id: Uuid,
    phase: RoundPhase,
    scores: Option<IndexMap<String, i32>>,
    results: Option<Vec<AnswerTally>>,
) {
    let payload = PhaseChangeEvent {
        phase,
        scores,
        results,
    };
    send_game_event(state, game_id, EVENT_PHASE_CHANGE, &payload);
}

pub fn broadcast_new_answer(state: &SharedState, game_id: Uuid, answer: AnswerSummary) {
    send_game_event(state, game_id, EVENT_NEW_ANSWER, &NewAnswerEvent { answer });
}

pub fn broadcast_vote_submitted(state: &SharedState, game_id: Uuid, voter_id: &str) {
    let payload = VoteSubmittedEvent {
        voter_id: voter_id.to_owned(),
    };
    send_game_event(state, game_id, EVENT_VOTE_SUBMITTED, &payload);
}

/// Hand the target every answer so their ballot renders without a refetch.
pub fn notify_target_vote(
    state: &SharedState,
    target_id: &str,
    question_id: Uuid,
    answers: Vec<AnswerSummary>,
) {
    let payload = TargetPlayerVoteEvent {
        question_id,
        answers,
    };
    state.bus().publish_json(
        &ChannelId::User(target_id.to_owned()),
        EVENT_TARGET_PLAYER_VOTE,
        &payload,
    );
}

pub fn broadcast_game_end(state: &SharedState, game_id: Uuid, final_scores: IndexMap<String, i32>) {
    send_game_event(state, game_id, EVENT_GAME_END, &GameEndEvent { final_scores });
}

fn send_game_event<T: serde::Serialize>(
    state: &SharedState,
    game_id: Uuid,
    event: &str,
    payload: &T,
) {
    state
        .bus()
        .publish_json(&ChannelId::Game(game_id), event, payload);
}
