//! Round lifecycle: starting a game, moving between phases and advancing rounds.
//!
//! Every write to a game's phase, round or target goes through this module and
//! happens while the game's phase-transition lock is held.

use std::time::SystemTime;

use indexmap::IndexMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::DEFAULT_THEME,
    dao::{
        game_store::GameStore,
        models::{GameEntity, QuestionEntity, RoomRosterEntity},
        storage::StorageError,
    },
    dto::game::{AnswerSummary, GameSnapshot, QuestionSummary, StartGameRequest},
    error::ServiceError,
    lock::{LockKey, with_lock},
    services::{
        events,
        player_stats::spawn_record_game_result,
        question_source::format_question,
        request_context::{record_game, record_phase, record_question, request_span, traced},
        roster_service::load_roster,
        snapshot_service::build_snapshot,
    },
    state::{
        Backend, SharedState,
        state_machine::{
            GameStatus, RoundEvent, RoundPhase, Stage, Step, compute_transition, pick_target,
            tally_votes,
        },
    },
};

/// Minimum number of room members needed to play.
const MIN_PLAYERS: usize = 2;

pub(crate) async fn load_game(
    store: &dyn GameStore,
    game_id: Uuid,
) -> Result<GameEntity, ServiceError> {
    store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}`")))
}

/// Load a question and make sure it belongs to `game_id`.
pub(crate) async fn load_question(
    store: &dyn GameStore,
    game_id: Uuid,
    question_id: Uuid,
) -> Result<QuestionEntity, ServiceError> {
    store
        .find_question(question_id)
        .await?
        .filter(|question| question.game_id == game_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}`")))
}

/// Versioned write of `game`.
async fn persist(store: &dyn GameStore, game: GameEntity) -> Result<GameEntity, ServiceError> {
    let expected = game.version;
    Ok(store.update_game(game, expected).await?)
}

/// Question of `round`, created on first call. Concurrent callers end up with the same row.
async fn ensure_round_question(
    state: &SharedState,
    store: &dyn GameStore,
    game_id: Uuid,
    theme: &str,
    round: u32,
    target_id: &str,
    roster: &RoomRosterEntity,
) -> Result<QuestionEntity, ServiceError> {
    if let Some(existing) = store.find_question_for_round(game_id, round).await? {
        return Ok(existing);
    }

    let (source_id, template) = match state.questions().fetch_question(theme).await {
        Some(picked) => (picked.id, picked.text_template),
        None => {
            warn!(%game_id, theme, "no question available for theme; using fallback");
            (None, state.config().fallback_template.clone())
        }
    };

    let question = QuestionEntity {
        id: Uuid::new_v4(),
        game_id,
        round,
        theme: theme.to_owned(),
        target_player_id: target_id.to_owned(),
        text: format_question(&template, roster.display_name(target_id)),
        source_id,
        created_at: SystemTime::now(),
    };

    match store.insert_question(question.clone()).await {
        Ok(()) => Ok(question),
        Err(StorageError::Duplicate { .. }) => store
            .find_question_for_round(game_id, round)
            .await?
            .ok_or_else(|| ServiceError::Internal(format!("question for round {round} vanished"))),
        Err(err) => Err(err.into()),
    }
}

/// Start a game for a room. Only the room host may do so.
pub async fn start_game(
    state: &SharedState,
    caller: &str,
    request: StartGameRequest,
) -> Result<GameSnapshot, ServiceError> {
    let span = request_span("start_game", None, None, caller);
    traced(span, async {
        let backend = state.backend().await?;
        let store = backend.store.as_ref();
        let config = state.config();

        let roster = load_roster(store, &request.room_id).await?;
        let host_id = roster
            .host()
            .map(|host| host.id.clone())
            .ok_or_else(|| ServiceError::InvalidInput("room has no host".into()))?;
        if host_id != caller {
            return Err(ServiceError::Forbidden(
                "only the room host can start a game".into(),
            ));
        }

        let players = roster.player_ids();
        if players.len() < MIN_PLAYERS {
            return Err(ServiceError::InsufficientPlayers(players.len()));
        }

        let total_rounds = request.total_rounds.unwrap_or(config.default_total_rounds);
        if total_rounds == 0 || total_rounds > config.max_total_rounds {
            return Err(ServiceError::InvalidInput(format!(
                "total_rounds must be between 1 and {}",
                config.max_total_rounds
            )));
        }
        let theme = request.theme.unwrap_or_else(|| DEFAULT_THEME.to_owned());

        let target_id = pick_target(&players, None, &mut rand::rng())
            .ok_or(ServiceError::InsufficientPlayers(players.len()))?;
        let game_id = Uuid::new_v4();
        record_game(game_id);

        // The question exists before the game becomes visible.
        let question =
            ensure_round_question(state, store, game_id, &theme, 1, &target_id, &roster).await?;
        record_question(question.id);
        record_phase(RoundPhase::Question);

        let now = SystemTime::now();
        let game = GameEntity {
            id: game_id,
            room_id: request.room_id,
            host_id,
            current_round: 1,
            total_rounds,
            status: GameStatus::InProgress,
            phase: RoundPhase::Question,
            target_player_id: question.target_player_id.clone(),
            current_question_id: Some(question.id),
            scores: players.iter().map(|id| (id.clone(), 0)).collect(),
            theme,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        store.insert_game(game.clone()).await?;

        info!(
            %game_id,
            room_id = %game.room_id,
            players = players.len(),
            total_rounds,
            target = %game.target_player_id,
            "game started"
        );
        events::broadcast_new_round(state, game_id, QuestionSummary::new(&question, &roster));

        build_snapshot(store, game, caller).await
    })
    .await
}

/// Move the current round to `vote` once every eligible player answered.
///
/// Caller must hold the game's phase-transition lock. Returns `false` when the
/// transition already happened or `question_id` is no longer current.
pub(crate) async fn advance_to_vote(
    state: &SharedState,
    backend: &Backend,
    game_id: Uuid,
    question_id: Uuid,
) -> Result<bool, ServiceError> {
    let store = backend.store.as_ref();
    let mut game = load_game(store, game_id).await?;
    if game.current_question_id != Some(question_id) {
        return Ok(false);
    }

    let step = compute_transition(Stage::new(game.status, game.phase), RoundEvent::AnswersCollected)?;
    let Step::Move(Stage::Playing(phase)) = step else {
        return Ok(false);
    };

    game.phase = phase;
    game.updated_at = SystemTime::now();
    let game = persist(store, game).await?;

    let roster = load_roster(store, &game.room_id).await?;
    let answers: Vec<AnswerSummary> = store
        .list_answers(question_id)
        .await?
        .iter()
        .map(|answer| AnswerSummary::new(answer, &roster))
        .collect();

    info!(%game_id, %question_id, answers = answers.len(), "all answers in; voting opened");
    events::notify_target_vote(state, &game.target_player_id, question_id, answers);
    events::broadcast_phase_change(state, game_id, game.phase, None, None);
    Ok(true)
}

/// Score the round and move to `results` once the target voted.
///
/// Caller must hold the game's phase-transition lock. Idempotent like
/// [`advance_to_vote`].
pub(crate) async fn advance_to_results(
    state: &SharedState,
    backend: &Backend,
    game_id: Uuid,
    question_id: Uuid,
) -> Result<bool, ServiceError> {
    let store = backend.store.as_ref();
    let mut game = load_game(store, game_id).await?;
    if game.current_question_id != Some(question_id) {
        return Ok(false);
    }

    let step = compute_transition(Stage::new(game.status, game.phase), RoundEvent::TargetVoted)?;
    let Step::Move(Stage::Playing(phase)) = step else {
        return Ok(false);
    };

    let answers = store.list_answers(question_id).await?;
    let votes = store.list_votes(question_id).await?;
    let (scores, breakdown) = tally_votes(&game.scores, &answers, &votes, &game.target_player_id);

    game.scores = scores;
    game.phase = phase;
    game.updated_at = SystemTime::now();
    let game = persist(store, game).await?;

    info!(%game_id, %question_id, votes = votes.len(), "round scored");
    events::broadcast_phase_change(
        state,
        game_id,
        game.phase,
        Some(game.scores.clone()),
        Some(breakdown),
    );
    Ok(true)
}

/// Move to the next round, or complete the game after the last one.
///
/// Allowed for the host and the round's target, from `results` or, as a
/// logged override for stalled rounds, from `vote`.
pub async fn advance_round(
    state: &SharedState,
    caller: &str,
    game_id: Uuid,
) -> Result<GameSnapshot, ServiceError> {
    let span = request_span("advance_round", Some(game_id), None, caller);
    traced(span, async {
        let backend = state.backend().await?;
        let ttl = state.config().phase_lock_ttl;

        let game = with_lock(&backend.locks, LockKey::phase_transition(game_id), ttl, || {
            advance_round_locked(state, &backend, caller, game_id)
        })
        .await?;

        build_snapshot(backend.store.as_ref(), game, caller).await
    })
    .await
}

async fn advance_round_locked(
    state: &SharedState,
    backend: &Backend,
    caller: &str,
    game_id: Uuid,
) -> Result<GameEntity, ServiceError> {
    let store = backend.store.as_ref();
    let mut game = load_game(store, game_id).await?;
    record_phase(game.phase);
    if let Some(question_id) = game.current_question_id {
        record_question(question_id);
    }

    if caller != game.host_id && caller != game.target_player_id {
        return Err(ServiceError::Forbidden(
            "only the host or the round's target can advance the round".into(),
        ));
    }

    let last_round = game.current_round >= game.total_rounds;
    let from = Stage::new(game.status, game.phase);
    let step = compute_transition(from, RoundEvent::AdvanceRound { last_round })?;

    if game.phase == RoundPhase::Vote {
        warn!(
            %game_id,
            actor = caller,
            round = game.current_round,
            phase = ?game.phase,
            "advancing round while still voting"
        );
    }

    match step {
        Step::Move(Stage::Completed) => {
            let now = SystemTime::now();
            game.status = GameStatus::Completed;
            game.completed_at = Some(now);
            game.updated_at = now;
            let game = persist(store, game).await?;

            info!(%game_id, rounds = game.total_rounds, "game completed");
            events::broadcast_game_end(state, game_id, game.scores.clone());
            spawn_record_game_result(
                backend.stats.clone(),
                game.room_id.clone(),
                game.scores.clone(),
            );
            Ok(game)
        }
        Step::Move(Stage::Playing(phase)) => {
            let roster = load_roster(store, &game.room_id).await?;
            let players = roster.player_ids();
            let next_round = game.current_round + 1;
            let previous = Some(game.target_player_id.as_str());
            let target_id = pick_target(&players, previous, &mut rand::rng())
                .ok_or(ServiceError::InsufficientPlayers(players.len()))?;

            let question = ensure_round_question(
                state,
                store,
                game_id,
                &game.theme,
                next_round,
                &target_id,
                &roster,
            )
            .await?;

            merge_new_players(&mut game.scores, &players);
            game.current_round = next_round;
            game.target_player_id = question.target_player_id.clone();
            game.current_question_id = Some(question.id);
            game.phase = phase;
            game.updated_at = SystemTime::now();
            let game = persist(store, game).await?;

            info!(
                %game_id,
                round = game.current_round,
                target = %game.target_player_id,
                "new round started"
            );
            events::broadcast_new_round(state, game_id, QuestionSummary::new(&question, &roster));
            Ok(game)
        }
        Step::AlreadyApplied => Ok(game),
    }
}

/// Give players who joined mid-game a zero score.
fn merge_new_players(scores: &mut IndexMap<String, i32>, players: &[String]) {
    for player in players {
        scores.entry(player.clone()).or_insert(0);
    }
}
