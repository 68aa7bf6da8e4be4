//! Log context shared by the gameplay entry points.
//!
//! Each public game operation runs inside a `game_request` span carrying the
//! game, question, actor and phase, so every event it emits (including the
//! final backend failure) can be tied back to the round it touched.

use std::future::Future;

use tracing::{Instrument, Span, error, field, info_span};
use uuid::Uuid;

use crate::{error::ServiceError, state::state_machine::RoundPhase};

/// Span for one service call. Unknown ids are filled in later with the
/// `record_*` helpers.
pub fn request_span(
    operation: &'static str,
    game_id: Option<Uuid>,
    question_id: Option<Uuid>,
    actor: &str,
) -> Span {
    let span = info_span!(
        "game_request",
        operation,
        actor,
        game_id = field::Empty,
        question_id = field::Empty,
        phase = field::Empty
    );
    if let Some(id) = game_id {
        span.record("game_id", field::display(id));
    }
    if let Some(id) = question_id {
        span.record("question_id", field::display(id));
    }
    span
}

pub fn record_game(game_id: Uuid) {
    Span::current().record("game_id", field::display(game_id));
}

pub fn record_question(question_id: Uuid) {
    Span::current().record("question_id", field::display(question_id));
}

/// Phase observed when the game was loaded.
pub fn record_phase(phase: RoundPhase) {
    Span::current().record("phase", field::debug(phase));
}

/// Run `work` inside `span`. Backend failures are logged with the span's
/// context before being handed back unchanged.
pub async fn traced<T, F>(span: Span, work: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    let outcome = work.instrument(span.clone()).await;
    if let Err(err) = &outcome {
        if err.is_backend_failure() {
            span.in_scope(|| {
                error!(code = err.code(), error = %err, "game operation failed on backend")
            });
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use futures::{FutureExt, future::BoxFuture};
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::{
        dto::game::SubmitVoteRequest,
        lock::{LockError, LockResult, LockService, LockToken},
        services::{round_service::tests::harness, submission_service::submit_vote},
        state::Backend,
    };

    /// Log sink shared with a test subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Lock backend that is always down.
    struct DownLocks;

    impl LockService for DownLocks {
        fn try_acquire(
            &self,
            key: &str,
            _ttl: Duration,
        ) -> BoxFuture<'static, LockResult<Option<LockToken>>> {
            let err = LockError::backend(key, io::Error::other("connection refused"));
            async move { Err(err) }.boxed()
        }

        fn release(&self, _key: &str, _token: LockToken) -> BoxFuture<'static, LockResult<()>> {
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test]
    async fn backend_failure_is_logged_with_round_context() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let game_id = Uuid::new_v4();
        let span = request_span("submit_vote", Some(game_id), None, "p2");

        let outcome: Result<(), ServiceError> = traced(span, async {
            record_phase(RoundPhase::Vote);
            Err(ServiceError::Internal("tally mismatch".into()))
        })
        .await;

        assert!(matches!(outcome, Err(ServiceError::Internal(_))));
        let output = logs.contents();
        assert!(output.contains("game operation failed on backend"), "{output}");
        assert!(output.contains(&format!("game_id={game_id}")), "{output}");
        assert!(output.contains("actor=\"p2\""), "{output}");
        assert!(output.contains("phase=Vote"), "{output}");
        assert!(output.contains("operation=\"submit_vote\""), "{output}");
    }

    #[tokio::test]
    async fn client_errors_are_not_logged_as_failures() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let span = request_span("submit_answer", Some(Uuid::new_v4()), None, "p1");

        let outcome: Result<(), ServiceError> =
            traced(span, async { Err(ServiceError::AlreadyAnswered) }).await;

        assert!(matches!(outcome, Err(ServiceError::AlreadyAnswered)));
        assert!(!logs.contents().contains("failed on backend"));
    }

    #[tokio::test]
    async fn lock_outage_on_vote_names_game_question_and_actor() {
        let h = harness(3).await;
        let game = h.start(1).await;
        let question_id = game.current_question_id.unwrap();
        h.state
            .install_backend(Backend::new(h.store.clone(), Arc::new(DownLocks)))
            .await;

        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let err = submit_vote(
            &h.state,
            "p3",
            game.id,
            SubmitVoteRequest {
                question_id,
                answer_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::LockUnavailable(_)));
        let output = logs.contents();
        assert!(output.contains(&format!("game_id={}", game.id)), "{output}");
        assert!(output.contains(&format!("question_id={question_id}")), "{output}");
        assert!(output.contains("actor=\"p3\""), "{output}");
        assert!(output.contains("code=\"unavailable\""), "{output}");
    }
}
