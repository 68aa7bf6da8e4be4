use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the service is running with a reachable storage backend.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.backend().await {
        Ok(backend) => {
            if let Err(err) = backend.store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        lock::MemoryLockService,
        state::{AppState, Backend},
    };

    #[tokio::test]
    async fn reports_degraded_until_backend_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .install_backend(Backend::new(
                Arc::new(MemoryGameStore::new()),
                Arc::new(MemoryLockService::new()),
            ))
            .await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
