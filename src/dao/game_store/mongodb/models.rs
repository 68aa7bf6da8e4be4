//! BSON document shapes. Identifiers are stored as strings so filters and
//! documents always agree on the representation.

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{
        AnswerEntity, GameEntity, PlayerStatsEntity, QuestionEntity, RoomMemberEntity,
        RoomRosterEntity, VoteEntity,
    },
    state::state_machine::{GameStatus, RoundPhase},
};

use super::error::MongoDaoError;

pub fn doc_id(id: impl ToString) -> Document {
    doc! {"_id": id.to_string()}
}

fn parse_uuid(entity: &'static str, id: &str, value: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(value).map_err(|err| MongoDaoError::Corrupt {
        entity,
        id: id.to_owned(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreEntry {
    player_id: String,
    score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: String,
    room_id: String,
    host_id: String,
    current_round: u32,
    total_rounds: u32,
    status: GameStatus,
    phase: RoundPhase,
    target_player_id: String,
    current_question_id: Option<String>,
    scores: Vec<MongoScoreEntry>,
    theme: String,
    pub version: i64,
    created_at: DateTime,
    updated_at: DateTime,
    completed_at: Option<DateTime>,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id.to_string(),
            room_id: value.room_id,
            host_id: value.host_id,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            status: value.status,
            phase: value.phase,
            target_player_id: value.target_player_id,
            current_question_id: value.current_question_id.map(|id| id.to_string()),
            scores: value
                .scores
                .into_iter()
                .map(|(player_id, score)| MongoScoreEntry { player_id, score })
                .collect(),
            theme: value.theme,
            version: value.version as i64,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            completed_at: value.completed_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoGameDocument> for GameEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGameDocument) -> Result<Self, Self::Error> {
        let id = parse_uuid("game", &value.id, &value.id)?;
        let current_question_id = value
            .current_question_id
            .as_deref()
            .map(|raw| parse_uuid("game", &value.id, raw))
            .transpose()?;

        Ok(Self {
            id,
            room_id: value.room_id,
            host_id: value.host_id,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            status: value.status,
            phase: value.phase,
            target_player_id: value.target_player_id,
            current_question_id,
            scores: value
                .scores
                .into_iter()
                .map(|entry| (entry.player_id, entry.score))
                .collect(),
            theme: value.theme,
            version: value.version.max(0) as u64,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            completed_at: value.completed_at.map(|at| at.to_system_time()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuestionDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    round: u32,
    theme: String,
    target_player_id: String,
    text: String,
    source_id: Option<String>,
    created_at: DateTime,
}

impl From<QuestionEntity> for MongoQuestionDocument {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            round: value.round,
            theme: value.theme,
            target_player_id: value.target_player_id,
            text: value.text,
            source_id: value.source_id,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoQuestionDocument> for QuestionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoQuestionDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid("question", &value.id, &value.id)?,
            game_id: parse_uuid("question", &value.id, &value.game_id)?,
            round: value.round,
            theme: value.theme,
            target_player_id: value.target_player_id,
            text: value.text,
            source_id: value.source_id,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    id: String,
    question_id: String,
    game_id: String,
    author_id: String,
    content: String,
    vote_count: u32,
    selected: bool,
    created_at: DateTime,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            question_id: value.question_id.to_string(),
            game_id: value.game_id.to_string(),
            author_id: value.author_id,
            content: value.content,
            vote_count: value.vote_count,
            selected: value.selected,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid("answer", &value.id, &value.id)?,
            question_id: parse_uuid("answer", &value.id, &value.question_id)?,
            game_id: parse_uuid("answer", &value.id, &value.game_id)?,
            author_id: value.author_id,
            content: value.content,
            vote_count: value.vote_count,
            selected: value.selected,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteDocument {
    #[serde(rename = "_id")]
    id: String,
    question_id: String,
    game_id: String,
    voter_id: String,
    answer_id: String,
    created_at: DateTime,
}

impl From<VoteEntity> for MongoVoteDocument {
    fn from(value: VoteEntity) -> Self {
        Self {
            id: value.id.to_string(),
            question_id: value.question_id.to_string(),
            game_id: value.game_id.to_string(),
            voter_id: value.voter_id,
            answer_id: value.answer_id.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoVoteDocument> for VoteEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoVoteDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid("vote", &value.id, &value.id)?,
            question_id: parse_uuid("vote", &value.id, &value.question_id)?,
            game_id: parse_uuid("vote", &value.id, &value.game_id)?,
            voter_id: value.voter_id,
            answer_id: parse_uuid("vote", &value.id, &value.answer_id)?,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRosterDocument {
    #[serde(rename = "_id")]
    room_id: String,
    members: Vec<RoomMemberEntity>,
    updated_at: DateTime,
}

impl From<RoomRosterEntity> for MongoRosterDocument {
    fn from(value: RoomRosterEntity) -> Self {
        Self {
            room_id: value.room_id,
            members: value.members,
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoRosterDocument> for RoomRosterEntity {
    fn from(value: MongoRosterDocument) -> Self {
        Self {
            room_id: value.room_id,
            members: value.members,
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerStatsDocument {
    #[serde(rename = "_id")]
    player_id: String,
    games_played: u32,
    wins: u32,
    xp: i64,
    level: u32,
    updated_at: DateTime,
}

impl From<MongoPlayerStatsDocument> for PlayerStatsEntity {
    fn from(value: MongoPlayerStatsDocument) -> Self {
        Self {
            player_id: value.player_id,
            games_played: value.games_played,
            wins: value.wins,
            xp: value.xp.max(0) as u64,
            level: value.level,
            updated_at: value.updated_at.to_system_time(),
        }
    }
}
