use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, ServiceError},
    routes::caller::Caller,
    services::sse_service,
    state::{ChannelId, SharedState},
};

#[utoipa::path(
    get,
    path = "/sse/games/{id}",
    tag = "sse",
    params(
        ("id" = Uuid, Path, description = "Game identifier"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses((status = 200, description = "Game event stream", content_type = "text/event-stream", body = String))
)]
/// Stream the events every player of a game receives.
pub async fn game_stream(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(game_id = %id, actor = %caller, "new game SSE connection");
    sse_service::open_stream(&state, ChannelId::Game(id))
}

#[utoipa::path(
    get,
    path = "/sse/users/{id}",
    tag = "sse",
    params(
        ("id" = String, Path, description = "User identifier, must match the caller"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Private event stream", content_type = "text/event-stream", body = String),
        (status = 403, description = "Stream belongs to another user")
    )
)]
/// Stream events addressed to a single user.
pub async fn user_stream(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if caller != id {
        return Err(ServiceError::Forbidden("cannot follow another user's stream".into()).into());
    }
    info!(actor = %caller, "new user SSE connection");
    Ok(sse_service::open_stream(&state, ChannelId::User(id)))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/games/{id}", get(game_stream))
        .route("/sse/users/{id}", get(user_stream))
}
