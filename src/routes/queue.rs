use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::queue::{
        ActionResponse, AdmissionResponse, AdvanceResponse, DepartureResponse, JoinQueueRequest,
        PlayersRequest,
    },
    error::AppError,
    routes::branch_path,
    services::{lifecycle_service, queue_service},
    state::SharedState,
};

/// Queue admission and game lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users/{id}/queue", post(join_queue))
        .route("/users/{id}/queue/{session_id}", delete(leave_queue))
        .route("/sessions/{id}/start", post(start_game))
        .route("/sessions/{id}/finish", post(finish_game))
        .route("/branches/{branch}/advance", post(advance_queue))
}

/// Join the queue of a branch, solo or as half of a sync pair.
#[utoipa::path(
    post,
    path = "/users/{id}/queue",
    tag = "queue",
    params(("id" = Uuid, Path, description = "Waiting identity joining the queue")),
    request_body = JoinQueueRequest,
    responses(
        (status = 200, description = "Admitted", body = AdmissionResponse),
        (status = 409, description = "User is not waiting or retries ran out")
    )
)]
pub async fn join_queue(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinQueueRequest>>,
) -> Result<Json<AdmissionResponse>, AppError> {
    let admission =
        queue_service::join_queue(&state, id, &payload.branch_id, payload.mode).await?;
    Ok(Json(admission.into()))
}

/// Leave a session, taking along every guest the leaver brought into it.
#[utoipa::path(
    delete,
    path = "/users/{id}/queue/{session_id}",
    tag = "queue",
    params(
        ("id" = Uuid, Path, description = "Identity leaving"),
        ("session_id" = Uuid, Path, description = "Session to leave")
    ),
    responses(
        (status = 200, description = "Left the session", body = DepartureResponse),
        (status = 404, description = "Unknown session or user"),
        (status = 409, description = "User is not part of the session")
    )
)]
pub async fn leave_queue(
    State(state): State<SharedState>,
    Path((id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DepartureResponse>, AppError> {
    Ok(Json(queue_service::leave_queue(&state, id, session_id).await?.into()))
}

/// Put a session on a cabinet without checking capacity.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session to start")),
    request_body = PlayersRequest,
    responses(
        (status = 200, description = "Game started", body = ActionResponse),
        (status = 404, description = "Unknown session or player")
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<PlayersRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    lifecycle_service::start_game(&state, id, &payload.player_ids).await?;
    Ok(Json(ActionResponse {
        message: "game started".into(),
    }))
}

/// Complete a session; repeating the call is harmless.
#[utoipa::path(
    post,
    path = "/sessions/{id}/finish",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session to finish")),
    request_body = PlayersRequest,
    responses(
        (status = 200, description = "Game finished", body = ActionResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn finish_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<PlayersRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    lifecycle_service::finish_game(&state, id, &payload.player_ids).await?;
    Ok(Json(ActionResponse {
        message: "game finished".into(),
    }))
}

/// Start the head of a branch queue when a cabinet is free.
#[utoipa::path(
    post,
    path = "/branches/{branch}/advance",
    tag = "sessions",
    params(("branch" = String, Path, description = "Branch code")),
    responses((status = 200, description = "Queue advanced when possible", body = AdvanceResponse))
)]
pub async fn advance_queue(
    State(state): State<SharedState>,
    Path(branch): Path<String>,
) -> Result<Json<AdvanceResponse>, AppError> {
    let branch = branch_path(branch)?;
    let started = lifecycle_service::advance_queue(&state, &branch).await?;
    Ok(Json(AdvanceResponse {
        started: started.map(Into::into),
    }))
}
