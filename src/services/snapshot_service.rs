use uuid::Uuid;

use crate::{
    dao::{game_store::GameStore, models::GameEntity},
    dto::game::{AnswerSummary, GameSnapshot, GameView, PlayerScore, QuestionSummary},
    error::ServiceError,
    services::{
        request_context::{record_phase, request_span, traced},
        round_service::load_game,
        roster_service::load_roster,
    },
    state::{
        SharedState,
        reconcile::{CurrentUserState, EffectivePhase, reconcile},
        state_machine::GameStatus,
    },
};

/// Current game state as seen by `caller`.
pub async fn get_game_state(
    state: &SharedState,
    caller: &str,
    game_id: Uuid,
) -> Result<GameSnapshot, ServiceError> {
    let span = request_span("get_game_state", Some(game_id), None, caller);
    traced(span, async {
        let backend = state.backend().await?;
        let store = backend.store.as_ref();
        let game = load_game(store, game_id).await?;
        record_phase(game.phase);
        build_snapshot(store, game, caller).await
    })
    .await
}

/// Assemble the snapshot of `game` for `caller`. The per-user triple is read
/// from the same answer and vote rows the thresholds are computed from.
pub(crate) async fn build_snapshot(
    store: &dyn GameStore,
    game: GameEntity,
    caller: &str,
) -> Result<GameSnapshot, ServiceError> {
    let roster = load_roster(store, &game.room_id).await?;

    let question = match game.current_question_id {
        Some(id) => store.find_question(id).await?,
        None => None,
    };
    let (answers, votes) = match &question {
        Some(question) => (
            store.list_answers(question.id).await?,
            store.list_votes(question.id).await?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    let user = CurrentUserState {
        has_answered: answers.iter().any(|answer| answer.author_id == caller),
        has_voted: votes.iter().any(|vote| vote.voter_id == caller),
        is_target_player: question
            .as_ref()
            .map(|q| q.target_player_id.as_str())
            .unwrap_or(game.target_player_id.as_str())
            == caller,
    };
    let effective_phase = match game.status {
        GameStatus::Completed => EffectivePhase::Results,
        GameStatus::InProgress => reconcile(game.phase, user),
    };

    let mut players: Vec<PlayerScore> = roster
        .members
        .iter()
        .map(|member| PlayerScore {
            id: member.id.clone(),
            display_name: member.display_name.clone(),
            avatar: member.avatar.clone(),
            is_host: member.id == game.host_id,
            score: game.scores.get(&member.id).copied().unwrap_or(0),
        })
        .collect();
    // Players who left the room keep their line on the scoreboard.
    for (id, score) in &game.scores {
        if roster.member(id).is_none() {
            players.push(PlayerScore {
                id: id.clone(),
                display_name: id.clone(),
                avatar: None,
                is_host: *id == game.host_id,
                score: *score,
            });
        }
    }

    Ok(GameSnapshot {
        game: GameView::from(&game),
        question: question
            .as_ref()
            .map(|question| QuestionSummary::new(question, &roster)),
        answers: answers
            .iter()
            .map(|answer| AnswerSummary::new(answer, &roster))
            .collect(),
        players,
        scores: game.scores.clone(),
        current_user_state: user,
        is_host: game.host_id == caller,
        effective_phase,
    })
}
