use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, ready};

use super::{LockResult, LockService, LockToken};

struct LockEntry {
    token: LockToken,
    expires_at: Instant,
}

/// Single-process lock table. Expired entries are taken over on the next acquire.
#[derive(Clone, Default)]
pub struct MemoryLockService {
    entries: Arc<DashMap<String, LockEntry>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_sync(&self, key: &str, ttl: Duration) -> Option<LockToken> {
        let now = Instant::now();
        let fresh = LockEntry {
            token: LockToken::new(),
            expires_at: now + ttl,
        };
        let token = fresh.token;

        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(entry) if entry.get().expires_at > now => None,
            Entry::Occupied(mut entry) => {
                entry.insert(fresh);
                Some(token)
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Some(token)
            }
        }
    }
}

impl LockService for MemoryLockService {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'static, LockResult<Option<LockToken>>> {
        Box::pin(ready(Ok(self.acquire_sync(key, ttl))))
    }

    fn release(&self, key: &str, token: LockToken) -> BoxFuture<'static, LockResult<()>> {
        self.entries.remove_if(key, |_, entry| entry.token == token);
        Box::pin(ready(Ok(())))
    }
}
