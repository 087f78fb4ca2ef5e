/// Client of the external wait-time and partner advisory service.
pub mod advisory;
/// Cabinet capacity and admission planning reads.
pub mod capacity;
/// OpenAPI documentation generation.
pub mod documentation;
/// Guests brought along by registered players.
pub mod guest_service;
/// Health check service.
pub mod health_service;
/// Game start, finish and queue advancement.
pub mod lifecycle_service;
/// Queue admission and departure.
pub mod queue_service;
/// Server-Sent Events streaming of live views.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Live query streams over the entity store.
pub mod subscription;
/// Player profiles, presence and logout.
pub mod user_service;
/// Background finishing of overdue games.
pub mod watchdog;
