use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::game::PlayerStatsResponse, error::AppError, services::player_stats, state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::new().route("/players/{id}/stats", get(get_stats))
}

#[utoipa::path(
    get,
    path = "/players/{id}/stats",
    tag = "players",
    params(("id" = String, Path, description = "Player identifier")),
    responses((status = 200, description = "Player aggregates", body = PlayerStatsResponse))
)]
/// Games played, wins, XP and level of a player.
pub async fn get_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PlayerStatsResponse>, AppError> {
    let stats = player_stats::get_player_stats(&state, &id).await?;
    Ok(Json(stats))
}
