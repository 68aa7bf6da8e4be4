pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    AnswerEntity, GameEntity, GameResult, PlayerStatsEntity, QuestionEntity, RoomRosterEntity, VoteEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for games, rounds and submissions.
///
/// Backends must enforce the uniqueness constraints documented on each insert
/// method and report violations as [`StorageError::Duplicate`](crate::dao::storage::StorageError::Duplicate),
/// so concurrent writers racing past a pre-check still end up with a single row.
pub trait GameStore: Send + Sync {
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Replace the game row if its stored version still equals `expected_version`.
    ///
    /// The written row carries `expected_version + 1`, which is returned.
    fn update_game(
        &self,
        game: GameEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<GameEntity>>;

    /// Unique on `(game_id, round)`.
    fn insert_question(&self, question: QuestionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_question(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;
    fn find_question_for_round(
        &self,
        game_id: Uuid,
        round: u32,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;

    /// Unique on `(question_id, author_id)`.
    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Answers of a question in submission order.
    fn list_answers(&self, question_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Atomically bump the cached vote count, optionally flagging the answer as selected.
    fn record_answer_vote(
        &self,
        answer_id: Uuid,
        selected: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Unique on `(question_id, voter_id)`.
    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_votes(&self, question_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;

    fn save_roster(&self, roster: RoomRosterEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_roster(
        &self,
        room_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomRosterEntity>>>;

    fn find_player_stats(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsEntity>>>;
    /// Atomically fold `result` into the aggregates of `player_id`, creating them
    /// on first use. Concurrent calls for the same player must all count.
    fn apply_game_result(
        &self,
        player_id: String,
        result: GameResult,
    ) -> BoxFuture<'static, StorageResult<PlayerStatsEntity>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
