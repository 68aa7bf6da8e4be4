//! Answer and vote submissions, and the threshold re-evaluation entry point.
//!
//! Answers run under the author's lock, votes and forced checks under the
//! game's phase-transition lock. Uniqueness is enforced again by the store, so
//! a writer that raced past the pre-checks still gets a typed rejection.

use std::time::SystemTime;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, VoteEntity},
        storage::StorageError,
    },
    dto::game::{
        AnswerSubmittedResponse, AnswerSummary, ForceCheckRequest, ForceCheckResponse,
        SubmitAnswerRequest, SubmitVoteRequest, VoteSubmittedResponse,
    },
    error::ServiceError,
    lock::{LockGuard, LockKey, with_lock},
    services::{
        events,
        request_context::{record_phase, record_question, request_span, traced},
        round_service::{advance_to_results, advance_to_vote, load_game, load_question},
        roster_service::load_roster,
    },
    state::{
        Backend, SharedState,
        state_machine::{GameStatus, RoundPhase, answers_complete},
    },
};

/// Record `caller`'s answer to the current question.
///
/// The last missing answer moves the round to `vote` before returning.
pub async fn submit_answer(
    state: &SharedState,
    caller: &str,
    game_id: Uuid,
    request: SubmitAnswerRequest,
) -> Result<AnswerSubmittedResponse, ServiceError> {
    let span = request_span("submit_answer", Some(game_id), Some(request.question_id), caller);
    traced(span, async {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(ServiceError::EmptyContent);
        }
        let max_len = state.config().answer_max_len;
        if content.chars().count() > max_len {
            return Err(ServiceError::InvalidInput(format!(
                "answer exceeds {max_len} characters"
            )));
        }

        let backend = state.backend().await?;
        let ttl = state.config().answer_lock_ttl;
        with_lock(&backend.locks, LockKey::answer(game_id, caller), ttl, || {
            submit_answer_locked(
                state,
                &backend,
                caller,
                game_id,
                request.question_id,
                content.to_owned(),
            )
        })
        .await
    })
    .await
}

async fn submit_answer_locked(
    state: &SharedState,
    backend: &Backend,
    caller: &str,
    game_id: Uuid,
    question_id: Uuid,
    content: String,
) -> Result<AnswerSubmittedResponse, ServiceError> {
    let store = backend.store.as_ref();
    let game = load_game(store, game_id).await?;
    record_phase(game.phase);
    let question = load_question(store, game_id, question_id).await?;

    if question.target_player_id == caller {
        return Err(ServiceError::TargetCannotAnswer);
    }
    let roster = load_roster(store, &game.room_id).await?;
    if roster.member(caller).is_none() {
        return Err(ServiceError::Forbidden("not a member of this room".into()));
    }

    let mut answers = store.list_answers(question_id).await?;
    if answers.iter().any(|answer| answer.author_id == caller) {
        return Err(ServiceError::AlreadyAnswered);
    }
    if game.status != GameStatus::InProgress
        || game.current_question_id != Some(question.id)
        || !game.phase.accepts_answers()
    {
        return Err(ServiceError::InvalidPhase(format!(
            "answers are closed for question `{question_id}`"
        )));
    }

    let answer = AnswerEntity {
        id: Uuid::new_v4(),
        question_id,
        game_id,
        author_id: caller.to_owned(),
        content,
        vote_count: 0,
        selected: false,
        created_at: SystemTime::now(),
    };
    match store.insert_answer(answer.clone()).await {
        Ok(()) => {}
        Err(StorageError::Duplicate { .. }) => return Err(ServiceError::AlreadyAnswered),
        Err(err) => return Err(err.into()),
    }

    debug!(%game_id, %question_id, actor = caller, "answer recorded");
    let summary = AnswerSummary::new(&answer, &roster);
    events::broadcast_new_answer(state, game_id, summary.clone());
    answers.push(answer);

    let mut phase = game.phase;
    if answers_complete(&roster.player_ids(), &question.target_player_id, &answers) {
        phase = close_answers(state, backend, game_id, question_id, caller, phase).await;
    }

    Ok(AnswerSubmittedResponse {
        answer: summary,
        phase,
    })
}

/// Move to `vote` under the phase lock, retrying briefly when contended.
/// Failures are logged and `loaded` (the phase the answer was accepted in) is
/// reported; the answer is already stored and `force_check` heals the round later.
async fn close_answers(
    state: &SharedState,
    backend: &Backend,
    game_id: Uuid,
    question_id: Uuid,
    caller: &str,
    loaded: RoundPhase,
) -> RoundPhase {
    let config = state.config();
    let guard = match LockGuard::acquire_with_retry(
        &backend.locks,
        LockKey::phase_transition(game_id),
        config.phase_lock_ttl,
        config.transition_retry,
    )
    .await
    {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            warn!(%game_id, %question_id, actor = caller, "phase lock contended; deferring vote transition");
            return loaded;
        }
        Err(err) => {
            error!(%game_id, %question_id, actor = caller, error = %err, "failed to take phase lock");
            return loaded;
        }
    };

    let outcome = advance_to_vote(state, backend, game_id, question_id).await;
    guard.release().await;

    match outcome {
        Ok(true) => RoundPhase::Vote,
        Ok(false) => current_phase(backend, game_id, loaded).await,
        Err(err) => {
            error!(
                %game_id,
                %question_id,
                actor = caller,
                error = %err,
                "failed to open voting"
            );
            loaded
        }
    }
}

/// Phase after another writer moved the round, `loaded` when it cannot be re-read.
async fn current_phase(backend: &Backend, game_id: Uuid, loaded: RoundPhase) -> RoundPhase {
    match load_game(backend.store.as_ref(), game_id).await {
        Ok(game) => game.phase,
        Err(err) => {
            warn!(%game_id, error = %err, "failed to re-read phase after transition");
            loaded
        }
    }
}

/// Record `caller`'s vote. The target's vote scores the round.
pub async fn submit_vote(
    state: &SharedState,
    caller: &str,
    game_id: Uuid,
    request: SubmitVoteRequest,
) -> Result<VoteSubmittedResponse, ServiceError> {
    let span = request_span("submit_vote", Some(game_id), Some(request.question_id), caller);
    traced(span, async {
        let backend = state.backend().await?;
        let ttl = state.config().phase_lock_ttl;
        with_lock(&backend.locks, LockKey::phase_transition(game_id), ttl, || {
            submit_vote_locked(state, &backend, caller, game_id, request)
        })
        .await
    })
    .await
}

async fn submit_vote_locked(
    state: &SharedState,
    backend: &Backend,
    caller: &str,
    game_id: Uuid,
    request: SubmitVoteRequest,
) -> Result<VoteSubmittedResponse, ServiceError> {
    let store = backend.store.as_ref();
    let game = load_game(store, game_id).await?;
    record_phase(game.phase);
    let question = load_question(store, game_id, request.question_id).await?;
    let question_id = question.id;

    if game.status != GameStatus::InProgress
        || game.phase != RoundPhase::Vote
        || game.current_question_id != Some(question_id)
    {
        return Err(ServiceError::InvalidPhase(format!(
            "voting is not open for question `{question_id}`"
        )));
    }

    let votes = store.list_votes(question_id).await?;
    if votes.iter().any(|vote| vote.voter_id == caller) {
        return Err(ServiceError::AlreadyVoted);
    }

    let answers = store.list_answers(question_id).await?;
    if !answers.iter().any(|answer| answer.id == request.answer_id) {
        return Err(ServiceError::NotFound(format!(
            "answer `{}`",
            request.answer_id
        )));
    }

    let is_target = question.target_player_id == caller;
    if !is_target && !answers.iter().any(|answer| answer.author_id == caller) {
        return Err(ServiceError::MustAnswerFirst);
    }

    let vote = VoteEntity {
        id: Uuid::new_v4(),
        question_id,
        game_id,
        voter_id: caller.to_owned(),
        answer_id: request.answer_id,
        created_at: SystemTime::now(),
    };
    match store.insert_vote(vote.clone()).await {
        Ok(()) => {}
        Err(StorageError::Duplicate { .. }) => return Err(ServiceError::AlreadyVoted),
        Err(err) => return Err(err.into()),
    }

    if let Err(err) = store.record_answer_vote(request.answer_id, is_target).await {
        warn!(%game_id, %question_id, answer_id = %request.answer_id, error = %err, "failed to update cached vote count");
    }
    info!(%game_id, %question_id, actor = caller, target = is_target, "vote recorded");
    events::broadcast_vote_submitted(state, game_id, caller);

    let mut phase = game.phase;
    if is_target {
        match advance_to_results(state, backend, game_id, question_id).await {
            Ok(_) => phase = RoundPhase::Results,
            Err(err) => error!(
                %game_id,
                %question_id,
                actor = caller,
                phase = ?game.phase,
                error = %err,
                "failed to score round"
            ),
        }
    }

    Ok(VoteSubmittedResponse {
        vote_id: vote.id,
        phase,
    })
}

/// Re-run both threshold checks without a new submission.
///
/// Returns whether this call moved the game; nothing to do is not an error.
pub async fn force_check(
    state: &SharedState,
    caller: &str,
    game_id: Uuid,
    request: ForceCheckRequest,
) -> Result<ForceCheckResponse, ServiceError> {
    let span = request_span("force_check", Some(game_id), request.question_id, caller);
    traced(span, async {
        let backend = state.backend().await?;
        let ttl = state.config().phase_lock_ttl;
        with_lock(&backend.locks, LockKey::phase_transition(game_id), ttl, || {
            force_check_locked(state, &backend, caller, game_id, request.question_id)
        })
        .await
    })
    .await
}

async fn force_check_locked(
    state: &SharedState,
    backend: &Backend,
    caller: &str,
    game_id: Uuid,
    question_id: Option<Uuid>,
) -> Result<ForceCheckResponse, ServiceError> {
    let store = backend.store.as_ref();
    let game = load_game(store, game_id).await?;
    record_phase(game.phase);
    let roster = load_roster(store, &game.room_id).await?;
    if roster.member(caller).is_none() && caller != game.host_id {
        return Err(ServiceError::Forbidden("not a participant of this game".into()));
    }

    let current = game.current_question_id;
    let question_id = match (question_id, current) {
        (Some(requested), Some(current)) if requested == current => current,
        (None, Some(current)) => current,
        _ => return Ok(unchanged(&game.phase, game.status)),
    };
    record_question(question_id);
    if game.status != GameStatus::InProgress {
        return Ok(unchanged(&game.phase, game.status));
    }

    let mut transitioned = false;
    if game.phase.accepts_answers() {
        let answers = store.list_answers(question_id).await?;
        if answers_complete(&roster.player_ids(), &game.target_player_id, &answers) {
            transitioned |= advance_to_vote(state, backend, game_id, question_id).await?;
        }
    }

    let game = load_game(store, game_id).await?;
    if game.phase == RoundPhase::Vote {
        let votes = store.list_votes(question_id).await?;
        if votes
            .iter()
            .any(|vote| vote.voter_id == game.target_player_id)
        {
            transitioned |= advance_to_results(state, backend, game_id, question_id).await?;
        }
    }

    let game = if transitioned {
        info!(%game_id, %question_id, actor = caller, "forced check advanced the round");
        load_game(store, game_id).await?
    } else {
        game
    };

    Ok(ForceCheckResponse {
        transitioned,
        phase: game.phase,
        status: game.status,
    })
}

fn unchanged(phase: &RoundPhase, status: GameStatus) -> ForceCheckResponse {
    ForceCheckResponse {
        transitioned: false,
        phase: *phase,
        status,
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        dao::game_store::GameStore,
        services::round_service::{
            advance_round,
            tests::{Harness, drain, harness, names},
        },
        state::ChannelId,
    };

    fn answer_req(question_id: Uuid, content: &str) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_id,
            content: content.into(),
        }
    }

    /// Four players, `p1` targeted in round 1.
    async fn four_player_round(total_rounds: u32) -> (Harness, Uuid, Uuid) {
        let h = harness(4).await;
        let game = h.start(total_rounds).await;
        let game = h.retarget(game, "p1").await;
        let question_id = game.current_question_id.unwrap();
        (h, game.id, question_id)
    }

    #[tokio::test]
    async fn third_answer_opens_voting_for_target_only() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let mut target_rx = h.subscribe(ChannelId::User("p1".into()));
        let mut other_rx = h.subscribe(ChannelId::User("p2".into()));
        let mut game_rx = h.subscribe(ChannelId::Game(game_id));

        for (player, content) in [("p2", "cats"), ("p3", "dogs")] {
            let response = submit_answer(&h.state, player, game_id, answer_req(question_id, content))
                .await
                .unwrap();
            assert_eq!(response.phase, RoundPhase::Question);
        }
        assert!(drain(&mut target_rx).is_empty());

        let last = submit_answer(&h.state, "p4", game_id, answer_req(question_id, "birds"))
            .await
            .unwrap();
        assert_eq!(last.phase, RoundPhase::Vote);
        assert_eq!(h.game(game_id).await.phase, RoundPhase::Vote);

        let target_events = drain(&mut target_rx);
        assert_eq!(names(&target_events), vec!["target_player_vote"]);
        let payload: serde_json::Value = serde_json::from_str(&target_events[0].data).unwrap();
        assert_eq!(payload["answers"].as_array().unwrap().len(), 3);
        assert_eq!(payload["question_id"], question_id.to_string());
        assert!(drain(&mut other_rx).is_empty());

        let game_events = drain(&mut game_rx);
        assert_eq!(
            names(&game_events),
            vec!["new_answer", "new_answer", "new_answer", "phase_change"]
        );
    }

    #[tokio::test]
    async fn target_vote_scores_the_chosen_author() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let mut by_author = Vec::new();
        for player in ["p2", "p3", "p4"] {
            let response = submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
            by_author.push((player, response.answer.id));
        }
        let mut game_rx = h.subscribe(ChannelId::Game(game_id));

        let vote = submit_vote(
            &h.state,
            "p1",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: by_author[0].1,
            },
        )
        .await
        .unwrap();
        assert_eq!(vote.phase, RoundPhase::Results);

        let game = h.game(game_id).await;
        assert_eq!(game.phase, RoundPhase::Results);
        assert_eq!(game.scores["p2"], 1);
        assert_eq!(game.scores["p3"], 0);
        assert_eq!(game.scores["p4"], 0);
        assert_eq!(game.scores["p1"], 0);

        let events = drain(&mut game_rx);
        assert_eq!(names(&events), vec!["vote_submitted", "phase_change"]);
        let payload: serde_json::Value = serde_json::from_str(&events[1].data).unwrap();
        assert_eq!(payload["phase"], "results");
        assert_eq!(payload["scores"]["p2"], 1);
        assert_eq!(payload["results"].as_array().unwrap().len(), 3);

        let answers = h.store.list_answers(question_id).await.unwrap();
        assert_eq!(answers[0].vote_count, 1);
        assert!(answers[0].selected);
    }

    #[tokio::test]
    async fn second_answer_is_rejected_without_new_row() {
        let (h, game_id, question_id) = four_player_round(2).await;
        for player in ["p2", "p3", "p4"] {
            submit_answer(&h.state, player, game_id, answer_req(question_id, "first"))
                .await
                .unwrap();
        }

        let err = submit_answer(&h.state, "p2", game_id, answer_req(question_id, "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyAnswered));
        assert_eq!(h.store.list_answers(question_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_answer_before_threshold_is_already_answered() {
        let (h, game_id, question_id) = four_player_round(2).await;
        submit_answer(&h.state, "p2", game_id, answer_req(question_id, "one"))
            .await
            .unwrap();
        let err = submit_answer(&h.state, "p2", game_id, answer_req(question_id, "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyAnswered));
        assert_eq!(h.store.list_answers(question_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_submissions_leave_one_row() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let state = Arc::clone(&h.state);
        let other = Arc::clone(&h.state);

        let (first, second) = tokio::join!(
            submit_answer(&state, "p2", game_id, answer_req(question_id, "a")),
            submit_answer(&other, "p2", game_id, answer_req(question_id, "b")),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().filter_map(|r| r.as_ref().err()).all(|err| matches!(
            err,
            ServiceError::AlreadyAnswered | ServiceError::Busy(_)
        )));
        assert_eq!(h.store.list_answers(question_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn racing_submissions_across_tasks_never_duplicate() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let state = Arc::clone(&h.state);
            handles.push(tokio::spawn(async move {
                submit_answer(&state, "p3", game_id, answer_req(question_id, &format!("v{i}")))
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(ServiceError::AlreadyAnswered | ServiceError::Busy(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(h.store.list_answers(question_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn target_cannot_answer_and_blank_is_rejected() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let err = submit_answer(&h.state, "p1", game_id, answer_req(question_id, "me"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TargetCannotAnswer));

        let err = submit_answer(&h.state, "p2", game_id, answer_req(question_id, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmptyContent));
        assert!(h.store.list_answers(question_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_is_busy_while_author_lock_held() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let _held = LockGuard::acquire(
            &h.backend.locks,
            LockKey::answer(game_id, "p2"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        let err = submit_answer(&h.state, "p2", game_id, answer_req(question_id, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Busy(_)));
    }

    #[tokio::test]
    async fn vote_rules_are_enforced() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let early = submit_vote(
            &h.state,
            "p1",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(early, ServiceError::InvalidPhase(_)));

        let mut answer_ids = Vec::new();
        for player in ["p2", "p3", "p4"] {
            let response = submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
            answer_ids.push(response.answer.id);
        }

        // A non-target who answered may vote without closing the round.
        let side_vote = submit_vote(
            &h.state,
            "p3",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: answer_ids[0],
            },
        )
        .await
        .unwrap();
        assert_eq!(side_vote.phase, RoundPhase::Vote);

        let again = submit_vote(
            &h.state,
            "p3",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: answer_ids[1],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(again, ServiceError::AlreadyVoted));

        let unknown = submit_vote(
            &h.state,
            "p1",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(unknown, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_target_must_answer_before_voting() {
        let h = harness(4).await;
        let game = h.start(2).await;
        let game = h.retarget(game, "p1").await;
        let question_id = game.current_question_id.unwrap();

        // p4 never answers; the host pushes voting open through the state machine.
        let mut ids = Vec::new();
        for player in ["p2", "p3"] {
            let response = submit_answer(&h.state, player, game.id, answer_req(question_id, player))
                .await
                .unwrap();
            ids.push(response.answer.id);
        }
        advance_to_vote(&h.state, &h.backend, game.id, question_id)
            .await
            .unwrap();

        let err = submit_vote(
            &h.state,
            "p4",
            game.id,
            SubmitVoteRequest {
                question_id,
                answer_id: ids[0],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::MustAnswerFirst));
    }

    #[tokio::test]
    async fn answer_transition_defers_when_phase_lock_contended() {
        let (h, game_id, question_id) = four_player_round(2).await;
        for player in ["p2", "p3"] {
            submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
        }

        let held = LockGuard::acquire(
            &h.backend.locks,
            LockKey::phase_transition(game_id),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        let last = submit_answer(&h.state, "p4", game_id, answer_req(question_id, "p4"))
            .await
            .unwrap();
        assert_eq!(last.phase, RoundPhase::Question);
        assert_eq!(h.game(game_id).await.phase, RoundPhase::Question);
        held.release().await;

        let healed = force_check(&h.state, "p2", game_id, ForceCheckRequest::default())
            .await
            .unwrap();
        assert!(healed.transitioned);
        assert_eq!(healed.phase, RoundPhase::Vote);

        let idle = force_check(&h.state, "p2", game_id, ForceCheckRequest::default())
            .await
            .unwrap();
        assert!(!idle.transitioned);
        assert_eq!(idle.phase, RoundPhase::Vote);
    }

    #[tokio::test]
    async fn deferred_transition_reports_the_stored_phase() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let mut game = h.game(game_id).await;
        game.phase = RoundPhase::Answer;
        let expected = game.version;
        h.store.update_game(game, expected).await.unwrap();
        for player in ["p2", "p3"] {
            submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
        }

        let held = LockGuard::acquire(
            &h.backend.locks,
            LockKey::phase_transition(game_id),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        let last = submit_answer(&h.state, "p4", game_id, answer_req(question_id, "p4"))
            .await
            .unwrap();
        held.release().await;

        assert_eq!(last.phase, RoundPhase::Answer);
        assert_eq!(h.game(game_id).await.phase, RoundPhase::Answer);
    }

    #[tokio::test]
    async fn force_check_scores_missed_target_vote() {
        let (h, game_id, question_id) = four_player_round(2).await;
        let mut ids = Vec::new();
        for player in ["p2", "p3", "p4"] {
            let response = submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
            ids.push(response.answer.id);
        }
        // Vote row written without the transition, as if the scorer crashed.
        h.store
            .insert_vote(VoteEntity {
                id: Uuid::new_v4(),
                question_id,
                game_id,
                voter_id: "p1".into(),
                answer_id: ids[2],
                created_at: SystemTime::now(),
            })
            .await
            .unwrap();

        let outcome = force_check(
            &h.state,
            "p3",
            game_id,
            ForceCheckRequest {
                question_id: Some(question_id),
            },
        )
        .await
        .unwrap();
        assert!(outcome.transitioned);
        assert_eq!(outcome.phase, RoundPhase::Results);
        assert_eq!(h.game(game_id).await.scores["p4"], 1);
    }

    #[tokio::test]
    async fn force_check_ignores_stale_question() {
        let (h, game_id, _) = four_player_round(2).await;
        let outcome = force_check(
            &h.state,
            "p2",
            game_id,
            ForceCheckRequest {
                question_id: Some(Uuid::new_v4()),
            },
        )
        .await
        .unwrap();
        assert!(!outcome.transitioned);
        assert_eq!(outcome.phase, RoundPhase::Question);

        let err = force_check(&h.state, "stranger", game_id, ForceCheckRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn last_round_completes_and_further_advance_fails() {
        let (h, game_id, question_id) = four_player_round(1).await;
        let mut ids = Vec::new();
        for player in ["p2", "p3", "p4"] {
            let response = submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
            ids.push(response.answer.id);
        }
        submit_vote(
            &h.state,
            "p1",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: ids[1],
            },
        )
        .await
        .unwrap();
        let mut game_rx = h.subscribe(ChannelId::Game(game_id));

        let snapshot = advance_round(&h.state, "p1", game_id).await.unwrap();
        assert_eq!(snapshot.game.status, GameStatus::Completed);
        assert!(snapshot.game.completed_at.is_some());

        let events = drain(&mut game_rx);
        assert_eq!(names(&events), vec!["game_end"]);
        let payload: serde_json::Value = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(payload["final_scores"]["p3"], 1);

        let err = advance_round(&h.state, "p1", game_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPhase(_)));

        // Stats are written by a background task.
        let mut recorded = None;
        for _ in 0..50 {
            recorded = h.store.find_player_stats("p3".into()).await.unwrap();
            if recorded.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let recorded = recorded.expect("stats recorded for winner");
        assert_eq!(recorded.wins, 1);
        assert_eq!(recorded.xp, 60);
    }

    #[tokio::test]
    async fn full_round_cycle_moves_to_next_question() {
        let (h, game_id, question_id) = four_player_round(3).await;
        let mut ids = Vec::new();
        for player in ["p2", "p3", "p4"] {
            let response = submit_answer(&h.state, player, game_id, answer_req(question_id, player))
                .await
                .unwrap();
            ids.push(response.answer.id);
        }
        submit_vote(
            &h.state,
            "p1",
            game_id,
            SubmitVoteRequest {
                question_id,
                answer_id: ids[0],
            },
        )
        .await
        .unwrap();

        let snapshot = advance_round(&h.state, "p1", game_id).await.unwrap();
        assert_eq!(snapshot.game.current_round, 2);
        assert_eq!(snapshot.game.phase, RoundPhase::Question);
        assert_ne!(snapshot.game.target_player_id, "p1");
        assert_eq!(snapshot.scores["p2"], 1);

        let next_question = snapshot.question.unwrap();
        assert_ne!(next_question.id, question_id);
        assert_eq!(next_question.round, 2);
        assert!(snapshot.answers.is_empty());
    }
}
