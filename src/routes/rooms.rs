use axum::{
    Json, Router,
    extract::{Path, State},
    routing::put,
};
use axum_valid::Valid;

use crate::{
    dto::game::{RosterResponse, UpdateRosterRequest},
    error::{AppError, ErrorBody},
    services::roster_service,
    state::SharedState,
};

/// Room member projection, kept in sync by the room service.
pub fn router() -> Router<SharedState> {
    Router::new().route("/rooms/{room_id}/members", put(update_members))
}

#[utoipa::path(
    put,
    path = "/rooms/{room_id}/members",
    tag = "rooms",
    request_body = UpdateRosterRequest,
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Roster stored", body = RosterResponse),
        (status = 400, description = "Invalid member list", body = ErrorBody)
    )
)]
/// Replace the member list of a room.
pub async fn update_members(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
    Valid(Json(payload)): Valid<Json<UpdateRosterRequest>>,
) -> Result<Json<RosterResponse>, AppError> {
    let roster = roster_service::update_roster(&state, &room_id, payload).await?;
    Ok(Json(roster))
}
