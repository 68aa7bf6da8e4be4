use indexmap::IndexMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::game::{AnswerSummary, QuestionSummary},
    state::state_machine::{AnswerTally, RoundPhase},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across notification channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already serialised payload.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Channel the stream is bound to (`game:{id}` or `user:{id}`).
    pub channel: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// `new_round`: a round started with a fresh question.
pub struct NewRoundEvent {
    pub round: u32,
    pub question: QuestionSummary,
}

#[derive(Debug, Serialize, ToSchema)]
/// `phase_change`: the shared phase moved.
pub struct PhaseChangeEvent {
    pub phase: RoundPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<IndexMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<AnswerTally>>,
}

#[derive(Debug, Serialize, ToSchema)]
/// `new_answer`: someone answered. Informational only.
pub struct NewAnswerEvent {
    pub answer: AnswerSummary,
}

#[derive(Debug, Serialize, ToSchema)]
/// `vote_submitted`.
pub struct VoteSubmittedEvent {
    pub voter_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// `target_player_vote`, sent on the target's private channel with every choice.
pub struct TargetPlayerVoteEvent {
    pub question_id: Uuid,
    pub answers: Vec<AnswerSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
/// `game_end`.
pub struct GameEndEvent {
    pub final_scores: IndexMap<String, i32>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}
