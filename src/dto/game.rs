use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        AnswerEntity, GameEntity, PlayerStatsEntity, QuestionEntity, RoomMemberEntity,
        RoomRosterEntity,
    },
    dto::{format_system_time, validation::validate_roster},
    state::{
        reconcile::{CurrentUserState, EffectivePhase},
        state_machine::{GameStatus, RoundPhase},
    },
};

/// Room member as pushed by the room-lifecycle collaborator.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct RosterMemberInput {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[validate(length(min = 1, max = 40))]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_host: bool,
}

/// Full replacement of a room's member list.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_roster"))]
pub struct UpdateRosterRequest {
    #[validate(length(min = 1, max = 32), nested)]
    pub members: Vec<RosterMemberInput>,
}

/// Stored roster of a room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RosterResponse {
    pub room_id: String,
    pub members: Vec<RosterMemberInput>,
}

impl From<RosterMemberInput> for RoomMemberEntity {
    fn from(value: RosterMemberInput) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            avatar: value.avatar,
            is_host: value.is_host,
        }
    }
}

impl From<RoomMemberEntity> for RosterMemberInput {
    fn from(value: RoomMemberEntity) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            avatar: value.avatar,
            is_host: value.is_host,
        }
    }
}

impl From<RoomRosterEntity> for RosterResponse {
    fn from(value: RoomRosterEntity) -> Self {
        Self {
            room_id: value.room_id,
            members: value.members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Payload used by the room host to start a game.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct StartGameRequest {
    #[validate(length(min = 1, max = 64))]
    pub room_id: String,
    /// Defaults to the configured number of rounds.
    #[serde(default)]
    #[validate(range(min = 1, max = 100))]
    pub total_rounds: Option<u32>,
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub theme: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: Uuid,
    #[validate(length(min = 1, max = 2000))]
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitVoteRequest {
    pub question_id: Uuid,
    pub answer_id: Uuid,
}

/// Re-evaluate thresholds for `question_id`, or for the current question when omitted.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ForceCheckRequest {
    #[serde(default)]
    pub question_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ForceCheckResponse {
    /// Whether this call moved the game forward.
    pub transitioned: bool,
    pub phase: RoundPhase,
    pub status: GameStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerSubmittedResponse {
    pub answer: AnswerSummary,
    /// Phase after the submission; `vote` when it was the last missing answer.
    pub phase: RoundPhase,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VoteSubmittedResponse {
    pub vote_id: Uuid,
    pub phase: RoundPhase,
}

/// Reference to a player with the name to display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerRef {
    pub id: String,
    pub name: String,
}

/// Question as shown to players.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionSummary {
    pub id: Uuid,
    pub round: u32,
    pub theme: String,
    pub text: String,
    pub target: PlayerRef,
}

impl QuestionSummary {
    pub fn new(question: &QuestionEntity, roster: &RoomRosterEntity) -> Self {
        Self {
            id: question.id,
            round: question.round,
            theme: question.theme.clone(),
            text: question.text.clone(),
            target: PlayerRef {
                id: question.target_player_id.clone(),
                name: roster.display_name(&question.target_player_id).to_owned(),
            },
        }
    }
}

/// Answer as shown to players.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnswerSummary {
    pub id: Uuid,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    pub vote_count: u32,
    pub selected: bool,
}

impl AnswerSummary {
    pub fn new(answer: &AnswerEntity, roster: &RoomRosterEntity) -> Self {
        Self {
            id: answer.id,
            content: answer.content.clone(),
            author_id: answer.author_id.clone(),
            author_name: roster.display_name(&answer.author_id).to_owned(),
            vote_count: answer.vote_count,
            selected: answer.selected,
        }
    }
}

/// Game row without per-caller data.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameView {
    pub id: Uuid,
    pub room_id: String,
    pub host_id: String,
    pub current_round: u32,
    pub total_rounds: u32,
    pub status: GameStatus,
    pub phase: RoundPhase,
    pub target_player_id: String,
    pub theme: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<&GameEntity> for GameView {
    fn from(game: &GameEntity) -> Self {
        Self {
            id: game.id,
            room_id: game.room_id.clone(),
            host_id: game.host_id.clone(),
            current_round: game.current_round,
            total_rounds: game.total_rounds,
            status: game.status,
            phase: game.phase,
            target_player_id: game.target_player_id.clone(),
            theme: game.theme.clone(),
            created_at: format_system_time(game.created_at),
            completed_at: game.completed_at.map(format_system_time),
        }
    }
}

/// Player line of the scoreboard.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerScore {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_host: bool,
    pub score: i32,
}

/// Everything a client needs to render the game, personalised for the caller.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameSnapshot {
    pub game: GameView,
    pub question: Option<QuestionSummary>,
    pub answers: Vec<AnswerSummary>,
    pub players: Vec<PlayerScore>,
    pub scores: IndexMap<String, i32>,
    pub current_user_state: CurrentUserState,
    pub is_host: bool,
    /// Server-side evaluation of the phase the caller should see.
    pub effective_phase: EffectivePhase,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerStatsResponse {
    pub player_id: String,
    pub games_played: u32,
    pub wins: u32,
    pub xp: u64,
    pub level: u32,
}

impl From<PlayerStatsEntity> for PlayerStatsResponse {
    fn from(value: PlayerStatsEntity) -> Self {
        Self {
            player_id: value.player_id,
            games_played: value.games_played,
            wins: value.wins,
            xp: value.xp,
            level: value.level,
        }
    }
}
