use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        queue::{GuestAdmissionResponse, GuestRequest},
        user::UserResponse,
    },
    error::AppError,
    services::guest_service,
    state::SharedState,
};

/// Endpoints for guests brought along by a registered player.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users/{id}/guests", post(add_guest_to_waiting_list))
        .route("/users/{id}/guests/pair", post(pair_host_with_guest))
        .route("/users/{id}/guests/solo", post(add_guest_solo))
        .route("/guests/{id}", delete(remove_guest))
}

/// Put a new guest on the waiting list, within the per-host limit.
#[utoipa::path(
    post,
    path = "/users/{id}/guests",
    tag = "guests",
    params(("id" = Uuid, Path, description = "Host identity")),
    request_body = GuestRequest,
    responses(
        (status = 201, description = "Guest waiting", body = UserResponse),
        (status = 409, description = "Guest limit reached")
    )
)]
pub async fn add_guest_to_waiting_list(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<GuestRequest>>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let guest = guest_service::add_guest_to_waiting_list(
        &state,
        id,
        &payload.branch_id,
        &payload.guest_name,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(guest.into())))
}

/// Queue the host together with a new guest as a sync pair.
#[utoipa::path(
    post,
    path = "/users/{id}/guests/pair",
    tag = "guests",
    params(("id" = Uuid, Path, description = "Host identity")),
    request_body = GuestRequest,
    responses(
        (status = 201, description = "Pair queued", body = GuestAdmissionResponse),
        (status = 409, description = "Host is already seated")
    )
)]
pub async fn pair_host_with_guest(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<GuestRequest>>,
) -> Result<(StatusCode, Json<GuestAdmissionResponse>), AppError> {
    let admission =
        guest_service::pair_host_with_guest(&state, id, &payload.branch_id, &payload.guest_name)
            .await?;
    Ok((StatusCode::CREATED, Json(admission.into())))
}

/// Create a guest and admit it alone.
#[utoipa::path(
    post,
    path = "/users/{id}/guests/solo",
    tag = "guests",
    params(("id" = Uuid, Path, description = "Host identity")),
    request_body = GuestRequest,
    responses((status = 201, description = "Guest admitted", body = GuestAdmissionResponse))
)]
pub async fn add_guest_solo(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<GuestRequest>>,
) -> Result<(StatusCode, Json<GuestAdmissionResponse>), AppError> {
    let admission =
        guest_service::add_guest_solo(&state, id, &payload.branch_id, &payload.guest_name).await?;
    Ok((StatusCode::CREATED, Json(admission.into())))
}

/// Delete a guest that is not seated in a session.
#[utoipa::path(
    delete,
    path = "/guests/{id}",
    tag = "guests",
    params(("id" = Uuid, Path, description = "Guest to delete")),
    responses(
        (status = 204, description = "Guest deleted"),
        (status = 400, description = "Not a guest"),
        (status = 409, description = "Guest is seated in a session")
    )
)]
pub async fn remove_guest(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    guest_service::remove_guest(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
