//! Process-local [`GameStore`] used when no database is configured and as the
//! backing store of the service tests.

use std::{hash::Hash, sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, ready};
use uuid::Uuid;

use crate::dao::{
    game_store::GameStore,
    models::{
        AnswerEntity, GameEntity, GameResult, PlayerStatsEntity, QuestionEntity, RoomRosterEntity,
        VoteEntity,
    },
    storage::{StorageError, StorageResult},
};

/// In-memory store enforcing the same uniqueness rules as the database backends.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    games: DashMap<Uuid, GameEntity>,
    questions: DashMap<Uuid, QuestionEntity>,
    question_rounds: DashMap<(Uuid, u32), Uuid>,
    answers: DashMap<Uuid, AnswerEntity>,
    answer_keys: DashMap<(Uuid, String), Uuid>,
    question_answers: DashMap<Uuid, Vec<Uuid>>,
    votes: DashMap<Uuid, VoteEntity>,
    vote_keys: DashMap<(Uuid, String), Uuid>,
    question_votes: DashMap<Uuid, Vec<Uuid>>,
    rosters: DashMap<String, RoomRosterEntity>,
    stats: DashMap<String, PlayerStatsEntity>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored question in place, bypassing uniqueness checks.
    #[cfg(test)]
    pub(crate) fn replace_question(&self, question: QuestionEntity) {
        self.inner.questions.insert(question.id, question);
    }

    fn insert_game_sync(&self, game: GameEntity) -> StorageResult<()> {
        match self.inner.games.entry(game.id) {
            Entry::Occupied(_) => Err(StorageError::Duplicate {
                entity: "game",
                key: game.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(game);
                Ok(())
            }
        }
    }

    fn update_game_sync(&self, mut game: GameEntity, expected: u64) -> StorageResult<GameEntity> {
        let mut stored = self
            .inner
            .games
            .get_mut(&game.id)
            .ok_or_else(|| StorageError::Missing {
                entity: "game",
                id: game.id.to_string(),
            })?;

        if stored.version != expected {
            return Err(StorageError::Conflict {
                entity: "game",
                id: game.id.to_string(),
                expected,
            });
        }

        game.version = expected + 1;
        game.updated_at = SystemTime::now();
        *stored = game.clone();
        Ok(game)
    }

    fn insert_question_sync(&self, question: QuestionEntity) -> StorageResult<()> {
        let key = (question.game_id, question.round);
        claim_unique(&self.inner.question_rounds, key, question.id, || {
            StorageError::Duplicate {
                entity: "question",
                key: format!("game {} round {}", question.game_id, question.round),
            }
        })?;
        self.inner.questions.insert(question.id, question);
        Ok(())
    }

    fn insert_answer_sync(&self, answer: AnswerEntity) -> StorageResult<()> {
        let key = (answer.question_id, answer.author_id.clone());
        claim_unique(&self.inner.answer_keys, key, answer.id, || {
            StorageError::Duplicate {
                entity: "answer",
                key: format!("question {} author {}", answer.question_id, answer.author_id),
            }
        })?;
        self.inner
            .question_answers
            .entry(answer.question_id)
            .or_default()
            .push(answer.id);
        self.inner.answers.insert(answer.id, answer);
        Ok(())
    }

    fn insert_vote_sync(&self, vote: VoteEntity) -> StorageResult<()> {
        let key = (vote.question_id, vote.voter_id.clone());
        claim_unique(&self.inner.vote_keys, key, vote.id, || StorageError::Duplicate {
            entity: "vote",
            key: format!("question {} voter {}", vote.question_id, vote.voter_id),
        })?;
        self.inner
            .question_votes
            .entry(vote.question_id)
            .or_default()
            .push(vote.id);
        self.inner.votes.insert(vote.id, vote);
        Ok(())
    }

    fn list_answers_sync(&self, question_id: Uuid) -> Vec<AnswerEntity> {
        let ids = self
            .inner
            .question_answers
            .get(&question_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.inner.answers.get(id).map(|answer| answer.clone()))
            .collect()
    }

    fn list_votes_sync(&self, question_id: Uuid) -> Vec<VoteEntity> {
        let ids = self
            .inner
            .question_votes
            .get(&question_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.inner.votes.get(id).map(|vote| vote.clone()))
            .collect()
    }

    fn record_answer_vote_sync(&self, answer_id: Uuid, selected: bool) -> StorageResult<()> {
        let mut answer =
            self.inner
                .answers
                .get_mut(&answer_id)
                .ok_or_else(|| StorageError::Missing {
                    entity: "answer",
                    id: answer_id.to_string(),
                })?;
        answer.vote_count += 1;
        answer.selected |= selected;
        Ok(())
    }
}

/// Reserve `key` in a uniqueness index, failing when another row already owns it.
fn claim_unique<K, F>(index: &DashMap<K, Uuid>, key: K, id: Uuid, err: F) -> StorageResult<()>
where
    K: Eq + Hash,
    F: FnOnce() -> StorageError,
{
    match index.entry(key) {
        Entry::Occupied(_) => Err(err()),
        Entry::Vacant(slot) => {
            slot.insert(id);
            Ok(())
        }
    }
}

impl GameStore for MemoryGameStore {
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_game_sync(game)))
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let game = self.inner.games.get(&id).map(|game| game.clone());
        Box::pin(ready(Ok(game)))
    }

    fn update_game(
        &self,
        game: GameEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<GameEntity>> {
        Box::pin(ready(self.update_game_sync(game, expected_version)))
    }

    fn insert_question(&self, question: QuestionEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_question_sync(question)))
    }

    fn find_question(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let question = self.inner.questions.get(&id).map(|q| q.clone());
        Box::pin(ready(Ok(question)))
    }

    fn find_question_for_round(
        &self,
        game_id: Uuid,
        round: u32,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let question = self
            .inner
            .question_rounds
            .get(&(game_id, round))
            .and_then(|id| self.inner.questions.get(&*id).map(|q| q.clone()));
        Box::pin(ready(Ok(question)))
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_answer_sync(answer)))
    }

    fn list_answers(
        &self,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        Box::pin(ready(Ok(self.list_answers_sync(question_id))))
    }

    fn record_answer_vote(
        &self,
        answer_id: Uuid,
        selected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.record_answer_vote_sync(answer_id, selected)))
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_vote_sync(vote)))
    }

    fn list_votes(&self, question_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        Box::pin(ready(Ok(self.list_votes_sync(question_id))))
    }

    fn save_roster(&self, roster: RoomRosterEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.rosters.insert(roster.room_id.clone(), roster);
        Box::pin(ready(Ok(())))
    }

    fn find_roster(
        &self,
        room_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomRosterEntity>>> {
        let roster = self.inner.rosters.get(&room_id).map(|r| r.clone());
        Box::pin(ready(Ok(roster)))
    }

    fn find_player_stats(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsEntity>>> {
        let stats = self.inner.stats.get(&player_id).map(|s| s.clone());
        Box::pin(ready(Ok(stats)))
    }

    fn apply_game_result(
        &self,
        player_id: String,
        result: GameResult,
    ) -> BoxFuture<'static, StorageResult<PlayerStatsEntity>> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .inner
            .stats
            .entry(player_id.clone())
            .or_insert_with(|| PlayerStatsEntity::empty(player_id));
        entry.record(result);
        let updated = entry.clone();
        drop(entry);
        Box::pin(ready(Ok(updated)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::state::state_machine::{GameStatus, RoundPhase};

    fn game() -> GameEntity {
        let now = SystemTime::now();
        GameEntity {
            id: Uuid::new_v4(),
            room_id: "room".into(),
            host_id: "p1".into(),
            current_round: 1,
            total_rounds: 3,
            status: GameStatus::InProgress,
            phase: RoundPhase::Question,
            target_player_id: "p1".into(),
            current_question_id: None,
            scores: IndexMap::new(),
            theme: "default".into(),
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn answer(question_id: Uuid, author: &str) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            question_id,
            game_id: Uuid::new_v4(),
            author_id: author.into(),
            content: "hello".into(),
            vote_count: 0,
            selected: false,
            created_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn second_answer_from_same_author_is_rejected() {
        let store = MemoryGameStore::new();
        let question_id = Uuid::new_v4();

        store.insert_answer(answer(question_id, "p2")).await.unwrap();
        let err = store
            .insert_answer(answer(question_id, "p2"))
            .await
            .unwrap_err();

        assert!(err.is_duplicate());
        assert_eq!(store.list_answers(question_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn answers_keep_submission_order() {
        let store = MemoryGameStore::new();
        let question_id = Uuid::new_v4();
        for author in ["p2", "p3", "p4"] {
            store.insert_answer(answer(question_id, author)).await.unwrap();
        }

        let authors: Vec<_> = store
            .list_answers(question_id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.author_id)
            .collect();
        assert_eq!(authors, vec!["p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn one_question_per_round() {
        let store = MemoryGameStore::new();
        let game_id = Uuid::new_v4();
        let question = |round| QuestionEntity {
            id: Uuid::new_v4(),
            game_id,
            round,
            theme: "default".into(),
            target_player_id: "p1".into(),
            text: "?".into(),
            source_id: None,
            created_at: SystemTime::now(),
        };

        store.insert_question(question(1)).await.unwrap();
        assert!(store.insert_question(question(1)).await.unwrap_err().is_duplicate());
        store.insert_question(question(2)).await.unwrap();
    }

    #[tokio::test]
    async fn stale_version_update_conflicts() {
        let store = MemoryGameStore::new();
        let game = game();
        store.insert_game(game.clone()).await.unwrap();

        let updated = store.update_game(game.clone(), 0).await.unwrap();
        assert_eq!(updated.version, 1);

        let err = store.update_game(game, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { expected: 0, .. }));
    }

    #[tokio::test]
    async fn answer_votes_accumulate() {
        let store = MemoryGameStore::new();
        let question_id = Uuid::new_v4();
        let entry = answer(question_id, "p2");
        let id = entry.id;
        store.insert_answer(entry).await.unwrap();

        store.record_answer_vote(id, true).await.unwrap();
        store.record_answer_vote(id, false).await.unwrap();

        let stored = &store.list_answers(question_id).await.unwrap()[0];
        assert_eq!(stored.vote_count, 2);
        assert!(stored.selected);
    }
}
