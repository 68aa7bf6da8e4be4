use std::time::Duration;

use futures::future::BoxFuture;
use mongodb::{
    Collection, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};

use super::{LockError, LockResult, LockService, LockToken};
use crate::dao::game_store::mongodb::{MongoDaoError, MongoGameStore, is_duplicate_key};

const LOCKS: &str = "locks";

/// Locks stored as one document per key in the game database.
///
/// Acquisition is an upsert filtered on `expires_at <= now`: a live holder
/// makes the filter miss, the upsert collides on `_id` and the attempt reports
/// contention. A TTL index removes abandoned entries.
#[derive(Clone)]
pub struct MongoLockService {
    store: MongoGameStore,
}

impl MongoLockService {
    pub async fn connect(store: MongoGameStore) -> Result<Self, MongoDaoError> {
        let index = IndexModel::builder()
            .keys(doc! {"expires_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("lock_expiry_ttl".to_owned()))
                    .expire_after(Some(Duration::ZERO))
                    .build(),
            )
            .build();

        store
            .database()
            .await
            .collection::<Document>(LOCKS)
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: LOCKS,
                index: "expires_at",
                source,
            })?;

        Ok(Self { store })
    }

    async fn collection(&self) -> Collection<Document> {
        self.store.database().await.collection::<Document>(LOCKS)
    }

    async fn acquire(&self, key: String, ttl: Duration) -> LockResult<Option<LockToken>> {
        let token = LockToken::new();
        let now = DateTime::now();
        let expires_at =
            DateTime::from_millis(now.timestamp_millis() + ttl.as_millis().min(i64::MAX as u128) as i64);

        let outcome = self
            .collection()
            .await
            .update_one(
                doc! {"_id": &key, "expires_at": {"$lte": now}},
                doc! {"$set": {"token": token.to_string(), "expires_at": expires_at}},
            )
            .upsert(true)
            .await;

        match outcome {
            Ok(_) => Ok(Some(token)),
            Err(err) if is_duplicate_key(&err) => Ok(None),
            Err(err) => Err(LockError::backend(&key, MongoDaoError::Lock { key: key.clone(), source: err })),
        }
    }

    async fn release_owned(&self, key: String, token: LockToken) -> LockResult<()> {
        self.collection()
            .await
            .delete_one(doc! {"_id": &key, "token": token.to_string()})
            .await
            .map_err(|err| LockError::backend(&key, MongoDaoError::Lock { key: key.clone(), source: err }))?;
        Ok(())
    }
}

impl LockService for MongoLockService {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'static, LockResult<Option<LockToken>>> {
        let service = self.clone();
        let key = key.to_owned();
        Box::pin(async move { service.acquire(key, ttl).await })
    }

    fn release(&self, key: &str, token: LockToken) -> BoxFuture<'static, LockResult<()>> {
        let service = self.clone();
        let key = key.to_owned();
        Box::pin(async move { service.release_owned(key, token).await })
    }
}
