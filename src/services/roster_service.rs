//! Room member projection owned by the room-lifecycle collaborator.

use std::time::SystemTime;

use tracing::info;

use crate::{
    dao::{game_store::GameStore, models::RoomRosterEntity},
    dto::game::{RosterResponse, UpdateRosterRequest},
    error::ServiceError,
    state::SharedState,
};

/// Replace the stored member list of `room_id`.
pub async fn update_roster(
    state: &SharedState,
    room_id: &str,
    request: UpdateRosterRequest,
) -> Result<RosterResponse, ServiceError> {
    let backend = state.backend().await?;
    let roster = RoomRosterEntity {
        room_id: room_id.to_owned(),
        members: request.members.into_iter().map(Into::into).collect(),
        updated_at: SystemTime::now(),
    };
    backend.store.save_roster(roster.clone()).await?;
    info!(room_id, members = roster.members.len(), "room roster updated");
    Ok(roster.into())
}

/// Current roster of `room_id`.
pub async fn load_roster(
    store: &dyn GameStore,
    room_id: &str,
) -> Result<RoomRosterEntity, ServiceError> {
    store
        .find_roster(room_id.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}`")))
}
