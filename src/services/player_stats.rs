//! Cross-game player aggregates: games played, wins, XP and level.

use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    dao::{
        game_store::GameStore,
        models::{GameResult, PlayerStatsEntity},
        storage::StorageResult,
    },
    dto::game::PlayerStatsResponse,
    error::ServiceError,
    state::SharedState,
};

/// XP granted for finishing a game, before score bonus.
const BASE_XP: u64 = 50;
/// XP granted per point scored.
const XP_PER_POINT: u64 = 10;

/// Receives final scores of completed games.
pub trait PlayerStats: Send + Sync {
    fn record_game_result(
        &self,
        room_id: String,
        final_scores: IndexMap<String, i32>,
    ) -> BoxFuture<'static, StorageResult<()>>;
}

/// [`PlayerStats`] persisted in the game store.
pub struct StorePlayerStats {
    store: Arc<dyn GameStore>,
}

impl StorePlayerStats {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }
}

impl PlayerStats for StorePlayerStats {
    fn record_game_result(
        &self,
        room_id: String,
        final_scores: IndexMap<String, i32>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = Arc::clone(&self.store);
        Box::pin(async move {
            let top = final_scores.values().copied().max();
            for (player_id, score) in final_scores {
                let result = game_result(score, top == Some(score));
                store.apply_game_result(player_id, result).await?;
            }
            debug!(room_id, "player stats updated");
            Ok(())
        })
    }
}

/// How a final score counts towards the player's aggregates.
pub fn game_result(score: i32, won: bool) -> GameResult {
    GameResult {
        xp: BASE_XP + XP_PER_POINT * u64::from(score.max(0).unsigned_abs()),
        won,
    }
}

/// Hand the final scores to the stats collaborator without waiting for it.
pub fn spawn_record_game_result(
    stats: Arc<dyn PlayerStats>,
    room_id: String,
    final_scores: IndexMap<String, i32>,
) {
    tokio::spawn(async move {
        if let Err(err) = stats
            .record_game_result(room_id.clone(), final_scores)
            .await
        {
            warn!(room_id, error = %err, "failed to record game result");
        }
    });
}

/// Aggregates for one player; unknown players get zeroed stats at level 1.
pub async fn get_player_stats(
    state: &SharedState,
    player_id: &str,
) -> Result<PlayerStatsResponse, ServiceError> {
    let backend = state.backend().await?;
    let stats = backend
        .store
        .find_player_stats(player_id.to_owned())
        .await?
        .unwrap_or_else(|| PlayerStatsEntity::empty(player_id.to_owned()));
    Ok(stats.into())
}
