use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    connection::{MongoConfig, establish_connection},
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoAnswerDocument, MongoGameDocument, MongoPlayerStatsDocument, MongoQuestionDocument,
        MongoRosterDocument, MongoVoteDocument, doc_id,
    },
};
use crate::dao::{
    game_store::GameStore,
    models::{
        AnswerEntity, GameEntity, GameResult, PlayerStatsEntity, QuestionEntity, RoomRosterEntity,
        VoteEntity, XP_PER_LEVEL,
    },
    storage::{StorageError, StorageResult},
};

const GAMES: &str = "games";
const QUESTIONS: &str = "questions";
const ANSWERS: &str = "answers";
const VOTES: &str = "votes";
const ROSTERS: &str = "room_rosters";
const PLAYER_STATS: &str = "player_stats";

/// `(collection, index name, keys, unique)` for every index the store relies on.
fn required_indexes() -> Vec<(&'static str, &'static str, Document, bool)> {
    vec![
        (QUESTIONS, "question_round_uniq", doc! {"game_id": 1, "round": 1}, true),
        (ANSWERS, "answer_author_uniq", doc! {"question_id": 1, "author_id": 1}, true),
        (ANSWERS, "answer_created_idx", doc! {"question_id": 1, "created_at": 1}, false),
        (VOTES, "vote_voter_uniq", doc! {"question_id": 1, "voter_id": 1}, true),
        (GAMES, "game_room_idx", doc! {"room_id": 1}, false),
    ]
}

/// MongoDB-backed [`GameStore`] implementation.
#[derive(Clone)]
pub struct MongoGameStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Kept so the driver's connection pool lives as long as the database handle.
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        for (collection, name, keys, unique) in required_indexes() {
            let index = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(name.to_owned()))
                        .unique(Some(unique))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Current database handle; shared with the lock backend.
    pub async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.database().await.collection::<T>(name)
    }

    /// Insert a document, translating unique index violations into [`StorageError::Duplicate`].
    async fn insert_unique<T>(
        &self,
        collection: &'static str,
        entity: &'static str,
        id: String,
        document: T,
    ) -> StorageResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let collection = self.collection::<T>(collection).await;
        match collection.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(source) if is_duplicate_key(&source) => {
                Err(StorageError::Duplicate { entity, key: id })
            }
            Err(source) => Err(MongoDaoError::Write { entity, id, source }.into()),
        }
    }

    async fn find_many<T>(
        &self,
        collection: &'static str,
        entity: &'static str,
        filter: Document,
        id: String,
    ) -> MongoResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let collection = self.collection::<T>(collection).await;
        collection
            .find(filter)
            .sort(doc! {"created_at": 1, "_id": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                entity,
                id: id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read { entity, id, source })
    }

    async fn find_game(&self, id: Uuid) -> MongoResult<Option<GameEntity>> {
        let collection = self.collection::<MongoGameDocument>(GAMES).await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                entity: "game",
                id: id.to_string(),
                source,
            })?;
        document.map(TryInto::try_into).transpose()
    }

    async fn update_game(&self, mut game: GameEntity, expected: u64) -> StorageResult<GameEntity> {
        let id = game.id;
        game.version = expected + 1;
        game.updated_at = SystemTime::now();
        let document: MongoGameDocument = game.clone().into();

        let collection = self.collection::<MongoGameDocument>(GAMES).await;
        let result = collection
            .replace_one(
                doc! {"_id": id.to_string(), "version": expected as i64},
                &document,
            )
            .await
            .map_err(|source| MongoDaoError::Write {
                entity: "game",
                id: id.to_string(),
                source,
            })?;

        if result.matched_count == 0 {
            return match self.find_game(id).await? {
                Some(_) => Err(StorageError::Conflict {
                    entity: "game",
                    id: id.to_string(),
                    expected,
                }),
                None => Err(StorageError::Missing {
                    entity: "game",
                    id: id.to_string(),
                }),
            };
        }

        Ok(game)
    }

    async fn find_question(&self, filter: Document, id: String) -> MongoResult<Option<QuestionEntity>> {
        let collection = self.collection::<MongoQuestionDocument>(QUESTIONS).await;
        let document = collection
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Read {
                entity: "question",
                id,
                source,
            })?;
        document.map(TryInto::try_into).transpose()
    }

    async fn list_answers(&self, question_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let documents: Vec<MongoAnswerDocument> = self
            .find_many(
                ANSWERS,
                "answer",
                doc! {"question_id": question_id.to_string()},
                question_id.to_string(),
            )
            .await?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_votes(&self, question_id: Uuid) -> MongoResult<Vec<VoteEntity>> {
        let documents: Vec<MongoVoteDocument> = self
            .find_many(
                VOTES,
                "vote",
                doc! {"question_id": question_id.to_string()},
                question_id.to_string(),
            )
            .await?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_answer_vote(&self, answer_id: Uuid, selected: bool) -> StorageResult<()> {
        let mut update = doc! {"$inc": {"vote_count": 1}};
        if selected {
            update.insert("$set", doc! {"selected": true});
        }

        let collection = self.collection::<Document>(ANSWERS).await;
        let result = collection
            .update_one(doc_id(answer_id), update)
            .await
            .map_err(|source| MongoDaoError::Write {
                entity: "answer",
                id: answer_id.to_string(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(StorageError::Missing {
                entity: "answer",
                id: answer_id.to_string(),
            });
        }
        Ok(())
    }

    /// Single pipeline update so concurrent results for one player never overwrite each other.
    async fn apply_game_result(
        &self,
        player_id: String,
        result: GameResult,
    ) -> StorageResult<PlayerStatsEntity> {
        let xp = i64::try_from(result.xp).unwrap_or(i64::MAX);
        let pipeline = vec![
            doc! {"$set": {
                "games_played": {"$add": [{"$ifNull": ["$games_played", 0]}, 1]},
                "wins": {"$add": [{"$ifNull": ["$wins", 0]}, i32::from(result.won)]},
                "xp": {"$add": [{"$ifNull": ["$xp", 0_i64]}, xp]},
                "updated_at": "$$NOW",
            }},
            doc! {"$set": {
                "level": {"$toInt": {"$add": [
                    1,
                    {"$floor": {"$divide": ["$xp", XP_PER_LEVEL as i64]}},
                ]}},
            }},
        ];

        let collection = self.collection::<MongoPlayerStatsDocument>(PLAYER_STATS).await;
        let document = collection
            .find_one_and_update(doc_id(&player_id), pipeline)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::Write {
                entity: "player stats",
                id: player_id.clone(),
                source,
            })?;

        document.map(Into::into).ok_or_else(|| {
            MongoDaoError::Corrupt {
                entity: "player stats",
                id: player_id,
                reason: "upsert returned no document".into(),
            }
            .into()
        })
    }

    async fn upsert<T>(
        &self,
        collection: &'static str,
        entity: &'static str,
        id: String,
        document: T,
    ) -> MongoResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let collection = self.collection::<T>(collection).await;
        collection
            .replace_one(doc_id(&id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write { entity, id, source })?;
        Ok(())
    }

    async fn find_by_id<T>(
        &self,
        collection: &'static str,
        entity: &'static str,
        id: String,
    ) -> MongoResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let collection = self.collection::<T>(collection).await;
        collection
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::Read { entity, id, source })
    }
}

impl GameStore for MongoGameStore {
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let id = game.id.to_string();
            let document: MongoGameDocument = game.into();
            store.insert_unique(GAMES, "game", id, document).await
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await.map_err(Into::into) })
    }

    fn update_game(
        &self,
        game: GameEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<GameEntity>> {
        let store = self.clone();
        Box::pin(async move { store.update_game(game, expected_version).await })
    }

    fn insert_question(&self, question: QuestionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let key = format!("game {} round {}", question.game_id, question.round);
            let document: MongoQuestionDocument = question.into();
            store.insert_unique(QUESTIONS, "question", key, document).await
        })
    }

    fn find_question(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_question(doc_id(id), id.to_string())
                .await
                .map_err(Into::into)
        })
    }

    fn find_question_for_round(
        &self,
        game_id: Uuid,
        round: u32,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_question(
                    doc! {"game_id": game_id.to_string(), "round": round as i64},
                    format!("game {game_id} round {round}"),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let key = format!("question {} author {}", answer.question_id, answer.author_id);
            let document: MongoAnswerDocument = answer.into();
            store.insert_unique(ANSWERS, "answer", key, document).await
        })
    }

    fn list_answers(
        &self,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(question_id).await.map_err(Into::into) })
    }

    fn record_answer_vote(
        &self,
        answer_id: Uuid,
        selected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.record_answer_vote(answer_id, selected).await })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let key = format!("question {} voter {}", vote.question_id, vote.voter_id);
            let document: MongoVoteDocument = vote.into();
            store.insert_unique(VOTES, "vote", key, document).await
        })
    }

    fn list_votes(&self, question_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_votes(question_id).await.map_err(Into::into) })
    }

    fn save_roster(&self, roster: RoomRosterEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let id = roster.room_id.clone();
            let document: MongoRosterDocument = roster.into();
            store
                .upsert(ROSTERS, "roster", id, document)
                .await
                .map_err(Into::into)
        })
    }

    fn find_roster(
        &self,
        room_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomRosterEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document: Option<MongoRosterDocument> =
                store.find_by_id(ROSTERS, "roster", room_id).await?;
            Ok(document.map(Into::into))
        })
    }

    fn find_player_stats(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document: Option<MongoPlayerStatsDocument> = store
                .find_by_id(PLAYER_STATS, "player stats", player_id)
                .await?;
            Ok(document.map(Into::into))
        })
    }

    fn apply_game_result(
        &self,
        player_id: String,
        result: GameResult,
    ) -> BoxFuture<'static, StorageResult<PlayerStatsEntity>> {
        let store = self.clone();
        Box::pin(async move { store.apply_game_result(player_id, result).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
