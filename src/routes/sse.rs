use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    error::AppError,
    routes::branch_path,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/branches/{branch}/waiting",
    tag = "sse",
    params(("branch" = String, Path, description = "Branch code")),
    responses(
        (
            status = 200,
            description = "Waiting list snapshots",
            content_type = "text/event-stream",
            body = String
        ),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Stream the waiting list of a branch, one full snapshot per change.
pub async fn waiting_stream(
    State(state): State<SharedState>,
    Path(branch): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let branch = branch_path(branch)?;
    let store = state.require_store().await?;
    info!(branch_id = %branch, "new waiting list SSE connection");
    let events = sse_service::waiting_list_events(store, branch.clone());
    Ok(sse_service::to_sse_stream(events, StreamKind::WaitingList, branch))
}

#[utoipa::path(
    get,
    path = "/sse/branches/{branch}/queue",
    tag = "sse",
    params(("branch" = String, Path, description = "Branch code")),
    responses(
        (
            status = 200,
            description = "Queue snapshots",
            content_type = "text/event-stream",
            body = String
        ),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Stream the queued and playing sessions of a branch.
pub async fn queue_stream(
    State(state): State<SharedState>,
    Path(branch): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let branch = branch_path(branch)?;
    let store = state.require_store().await?;
    info!(branch_id = %branch, "new queue SSE connection");
    let events = sse_service::queue_events(store, branch.clone());
    Ok(sse_service::to_sse_stream(events, StreamKind::Queue, branch))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/branches/{branch}/waiting", get(waiting_stream))
        .route("/sse/branches/{branch}/queue", get(queue_stream))
}
