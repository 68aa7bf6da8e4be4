/// OpenAPI documentation generation.
pub mod documentation;
/// Named notification events published on the bus.
pub mod events;
/// Health check service.
pub mod health_service;
/// Player win/XP/level aggregates.
pub mod player_stats;
/// Question templates per theme.
pub mod question_source;
/// Room roster projection.
pub mod roster_service;
/// Tracing span shared by the gameplay operations.
pub mod request_context;
/// Round lifecycle: start, advance and phase transitions.
pub mod round_service;
/// Personalised game snapshots.
pub mod snapshot_service;
/// Server-Sent Events streaming.
pub mod sse_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
/// Answer and vote submission plus threshold checks.
pub mod submission_service;
