use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Spotlight Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::update_members,
        crate::routes::game::start_game,
        crate::routes::game::get_game,
        crate::routes::game::submit_answer,
        crate::routes::game::submit_vote,
        crate::routes::game::advance_round,
        crate::routes::game::force_check,
        crate::routes::players::get_stats,
        crate::routes::sse::game_stream,
        crate::routes::sse::user_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::error::ErrorBody,
            crate::dto::game::RosterMemberInput,
            crate::dto::game::UpdateRosterRequest,
            crate::dto::game::RosterResponse,
            crate::dto::game::StartGameRequest,
            crate::dto::game::SubmitAnswerRequest,
            crate::dto::game::SubmitVoteRequest,
            crate::dto::game::ForceCheckRequest,
            crate::dto::game::ForceCheckResponse,
            crate::dto::game::AnswerSubmittedResponse,
            crate::dto::game::VoteSubmittedResponse,
            crate::dto::game::GameSnapshot,
            crate::dto::game::PlayerStatsResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::NewRoundEvent,
            crate::dto::sse::PhaseChangeEvent,
            crate::dto::sse::NewAnswerEvent,
            crate::dto::sse::VoteSubmittedEvent,
            crate::dto::sse::TargetPlayerVoteEvent,
            crate::dto::sse::GameEndEvent,
            crate::dto::sse::SystemStatus,
            crate::state::reconcile::EffectivePhase,
            crate::state::state_machine::RoundPhase,
            crate::state::state_machine::GameStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room roster projection"),
        (name = "game", description = "Round lifecycle and submissions"),
        (name = "players", description = "Player aggregates"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_gameplay_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/games",
            "/games/{id}",
            "/games/{id}/answers",
            "/games/{id}/votes",
            "/games/{id}/advance",
            "/games/{id}/check",
            "/rooms/{room_id}/members",
            "/sse/users/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
