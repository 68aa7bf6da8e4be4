use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::state_machine::{GameStatus, RoundPhase};

/// Aggregate game entity persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Primary key of the game.
    pub id: Uuid,
    /// Room the game was started from.
    pub room_id: String,
    /// Member allowed to drive privileged actions.
    pub host_id: String,
    /// 1-based round currently being played.
    pub current_round: u32,
    /// Number of rounds after which the game completes.
    pub total_rounds: u32,
    /// Lifecycle status of the game.
    pub status: GameStatus,
    /// Phase of the current round.
    pub phase: RoundPhase,
    /// Player the current question is about.
    pub target_player_id: String,
    /// Question of the current round, once created.
    pub current_question_id: Option<Uuid>,
    /// Accumulated score per player id, in roster order.
    pub scores: IndexMap<String, i32>,
    /// Theme tag used to pick questions.
    pub theme: String,
    /// Incremented on every write; used for optimistic concurrency.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the game row was written.
    pub updated_at: SystemTime,
    /// Set once the game reaches the completed status.
    pub completed_at: Option<SystemTime>,
}

/// One question per (game, round).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    pub id: Uuid,
    pub game_id: Uuid,
    pub round: u32,
    pub theme: String,
    pub target_player_id: String,
    /// Question text already personalised with the target's name.
    pub text: String,
    /// Identifier of the template in the question source, when known.
    pub source_id: Option<String>,
    pub created_at: SystemTime,
}

/// Free-text answer written by a non-target player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    pub id: Uuid,
    pub question_id: Uuid,
    pub game_id: Uuid,
    pub author_id: String,
    pub content: String,
    /// Cached number of votes received.
    pub vote_count: u32,
    /// Whether the target picked this answer.
    pub selected: bool,
    pub created_at: SystemTime,
}

/// A ballot cast on a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    pub id: Uuid,
    pub question_id: Uuid,
    pub game_id: Uuid,
    pub voter_id: String,
    pub answer_id: Uuid,
    pub created_at: SystemTime,
}

/// Room member as projected from the room-lifecycle service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMemberEntity {
    pub id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub is_host: bool,
}

/// Roster snapshot of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomRosterEntity {
    pub room_id: String,
    pub members: Vec<RoomMemberEntity>,
    pub updated_at: SystemTime,
}

impl RoomRosterEntity {
    /// Host of the room, if one is designated.
    pub fn host(&self) -> Option<&RoomMemberEntity> {
        self.members.iter().find(|member| member.is_host)
    }

    /// Look up a member by id.
    pub fn member(&self, id: &str) -> Option<&RoomMemberEntity> {
        self.members.iter().find(|member| member.id == id)
    }

    /// Member ids in roster order.
    pub fn player_ids(&self) -> Vec<String> {
        self.members.iter().map(|member| member.id.clone()).collect()
    }

    /// Display name for `id`, falling back to the id itself.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.member(id)
            .map(|member| member.display_name.as_str())
            .unwrap_or(id)
    }
}

/// XP needed per level.
pub const XP_PER_LEVEL: u64 = 500;

/// One finished game as it counts towards a player's aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameResult {
    pub xp: u64,
    pub won: bool,
}

/// Level reached with `xp` experience points.
pub fn level_for(xp: u64) -> u32 {
    u32::try_from(1 + xp / XP_PER_LEVEL).unwrap_or(u32::MAX)
}

/// Long-lived per-player aggregates updated when games complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStatsEntity {
    pub player_id: String,
    pub games_played: u32,
    pub wins: u32,
    pub xp: u64,
    pub level: u32,
    pub updated_at: SystemTime,
}

impl PlayerStatsEntity {
    /// Fresh aggregates for a player that never finished a game.
    pub fn empty(player_id: String) -> Self {
        Self {
            player_id,
            games_played: 0,
            wins: 0,
            xp: 0,
            level: 1,
            updated_at: SystemTime::now(),
        }
    }

    /// Fold one finished game into the aggregates.
    pub fn record(&mut self, result: GameResult) {
        self.games_played += 1;
        if result.won {
            self.wins += 1;
        }
        self.xp += result.xp;
        self.level = level_for(self.xp);
        self.updated_at = SystemTime::now();
    }
}
