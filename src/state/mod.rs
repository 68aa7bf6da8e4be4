pub mod bus;
pub mod reconcile;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::game_store::GameStore,
    error::ServiceError,
    lock::LockService,
    services::{
        player_stats::{PlayerStats, StorePlayerStats},
        question_source::{BankQuestionSource, QuestionSource},
    },
};

pub use self::bus::{ChannelId, NotificationBus};

pub type SharedState = Arc<AppState>;

/// Storage-backed collaborators, installed together once a backend is reachable.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn GameStore>,
    pub locks: Arc<dyn LockService>,
    pub stats: Arc<dyn PlayerStats>,
}

impl Backend {
    /// Bundle a store and lock service; player stats are kept in the same store.
    pub fn new(store: Arc<dyn GameStore>, locks: Arc<dyn LockService>) -> Self {
        let stats = Arc::new(StorePlayerStats::new(Arc::clone(&store)));
        Self {
            store,
            locks,
            stats,
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn PlayerStats>) -> Self {
        self.stats = stats;
        self
    }
}

/// Central application state shared by every request handler.
pub struct AppState {
    backend: RwLock<Option<Backend>>,
    bus: NotificationBus,
    config: AppConfig,
    questions: Arc<dyn QuestionSource>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let questions = Arc::new(BankQuestionSource::new(config.question_bank.clone()));
        Self::with_question_source(config, questions)
    }

    /// Same as [`AppState::new`] with a custom question source.
    pub fn with_question_source(
        config: AppConfig,
        questions: Arc<dyn QuestionSource>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            backend: RwLock::new(None),
            bus: NotificationBus::new(config.channel_capacity),
            config,
            questions,
            degraded: degraded_tx,
        })
    }

    /// Current backend, or [`ServiceError::Degraded`] while none is installed.
    pub async fn backend(&self) -> Result<Backend, ServiceError> {
        let guard = self.backend.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a backend and leave degraded mode.
    pub async fn install_backend(&self, backend: Backend) {
        {
            let mut guard = self.backend.write().await;
            *guard = Some(backend);
        }
        self.update_degraded(false);
    }

    /// Remove the current backend and enter degraded mode.
    pub async fn clear_backend(&self) {
        {
            let mut guard = self.backend.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Flip the degraded flag, notifying watchers only when it changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn questions(&self) -> &Arc<dyn QuestionSource> {
        &self.questions
    }
}
