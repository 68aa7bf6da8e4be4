use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::game::{
        AnswerSubmittedResponse, ForceCheckRequest, ForceCheckResponse, GameSnapshot,
        StartGameRequest, SubmitAnswerRequest, SubmitVoteRequest, VoteSubmittedResponse,
    },
    error::{AppError, ErrorBody},
    routes::caller::Caller,
    services::{round_service, snapshot_service, submission_service},
    state::SharedState,
};

/// Gameplay routes: starting, reading and driving a game.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(start_game))
        .route("/games/{id}", get(get_game))
        .route("/games/{id}/answers", post(submit_answer))
        .route("/games/{id}/votes", post(submit_vote))
        .route("/games/{id}/advance", post(advance_round))
        .route("/games/{id}/check", post(force_check))
}

/// Start a game for a room; the caller must be the room host.
#[utoipa::path(
    post,
    path = "/games",
    tag = "game",
    request_body = StartGameRequest,
    params(("X-User-Id" = String, Header, description = "Authenticated user id")),
    responses(
        (status = 200, description = "Game started", body = GameSnapshot),
        (status = 400, description = "Not enough players", body = ErrorBody),
        (status = 403, description = "Caller is not the host", body = ErrorBody),
        (status = 404, description = "Unknown room", body = ErrorBody)
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Valid(Json(payload)): Valid<Json<StartGameRequest>>,
) -> Result<Json<GameSnapshot>, AppError> {
    let snapshot = round_service::start_game(&state, &caller, payload).await?;
    Ok(Json(snapshot))
}

/// Current game state personalised for the caller.
#[utoipa::path(
    get,
    path = "/games/{id}",
    tag = "game",
    params(
        ("id" = Uuid, Path, description = "Game identifier"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Game snapshot", body = GameSnapshot),
        (status = 404, description = "Unknown game", body = ErrorBody)
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSnapshot>, AppError> {
    let snapshot = snapshot_service::get_game_state(&state, &caller, id).await?;
    Ok(Json(snapshot))
}

/// Submit an answer to the current question.
#[utoipa::path(
    post,
    path = "/games/{id}/answers",
    tag = "game",
    request_body = SubmitAnswerRequest,
    params(
        ("id" = Uuid, Path, description = "Game identifier"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Answer recorded", body = AnswerSubmittedResponse),
        (status = 403, description = "Caller is the target", body = ErrorBody),
        (status = 409, description = "Already answered or answers closed", body = ErrorBody),
        (status = 422, description = "Empty answer", body = ErrorBody),
        (status = 503, description = "Busy, retry later", body = ErrorBody)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<AnswerSubmittedResponse>, AppError> {
    let response = submission_service::submit_answer(&state, &caller, id, payload).await?;
    Ok(Json(response))
}

/// Vote for an answer of the current question.
#[utoipa::path(
    post,
    path = "/games/{id}/votes",
    tag = "game",
    request_body = SubmitVoteRequest,
    params(
        ("id" = Uuid, Path, description = "Game identifier"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Vote recorded", body = VoteSubmittedResponse),
        (status = 403, description = "Caller must answer first", body = ErrorBody),
        (status = 409, description = "Already voted or voting closed", body = ErrorBody),
        (status = 503, description = "Busy, retry later", body = ErrorBody)
    )
)]
pub async fn submit_vote(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitVoteRequest>,
) -> Result<Json<VoteSubmittedResponse>, AppError> {
    let response = submission_service::submit_vote(&state, &caller, id, payload).await?;
    Ok(Json(response))
}

/// Move to the next round or finish the game. Host or round target only.
#[utoipa::path(
    post,
    path = "/games/{id}/advance",
    tag = "game",
    params(
        ("id" = Uuid, Path, description = "Game identifier"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Round advanced", body = GameSnapshot),
        (status = 403, description = "Caller is neither host nor target", body = ErrorBody),
        (status = 409, description = "Round cannot be advanced now", body = ErrorBody),
        (status = 503, description = "Busy, retry later", body = ErrorBody)
    )
)]
pub async fn advance_round(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSnapshot>, AppError> {
    let snapshot = round_service::advance_round(&state, &caller, id).await?;
    Ok(Json(snapshot))
}

/// Re-evaluate phase thresholds after missed notifications.
#[utoipa::path(
    post,
    path = "/games/{id}/check",
    tag = "game",
    request_body = ForceCheckRequest,
    params(
        ("id" = Uuid, Path, description = "Game identifier"),
        ("X-User-Id" = String, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Check performed", body = ForceCheckResponse),
        (status = 503, description = "Busy, retry later", body = ErrorBody)
    )
)]
pub async fn force_check(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    payload: Option<Json<ForceCheckRequest>>,
) -> Result<Json<ForceCheckResponse>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let response = submission_service::force_check(&state, &caller, id, request).await?;
    Ok(Json(response))
}
