use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::user::{BranchRequest, LogoutResponse, RegisterUserRequest, UserResponse},
    error::AppError,
    services::user_service,
    state::SharedState,
};

/// Player profile and presence endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/{id}", get(get_user))
        .route(
            "/users/{id}/waiting-list",
            post(join_waiting_list).delete(leave_waiting_list),
        )
        .route("/users/{id}/branch", put(switch_branch))
        .route("/users/{id}/logout", post(logout))
}

/// Register a player profile; it starts offline at the default branch.
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "User registered", body = UserResponse),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn register_user(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RegisterUserRequest>>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user =
        user_service::register_user(&state, &payload.username, payload.rank, payload.play_style)
            .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Read a player or guest identity.
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "Identity to read")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_service::get_user(&state, id).await?.into()))
}

/// Join the waiting list of a branch.
#[utoipa::path(
    post,
    path = "/users/{id}/waiting-list",
    tag = "users",
    params(("id" = Uuid, Path, description = "Identity joining")),
    request_body = BranchRequest,
    responses(
        (status = 200, description = "User is waiting", body = UserResponse),
        (status = 409, description = "User is seated in a session")
    )
)]
pub async fn join_waiting_list(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<BranchRequest>>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::join_waiting_list(&state, id, &payload.branch_id).await?;
    Ok(Json(user.into()))
}

/// Leave the waiting list and go offline.
#[utoipa::path(
    delete,
    path = "/users/{id}/waiting-list",
    tag = "users",
    params(("id" = Uuid, Path, description = "Identity leaving")),
    responses(
        (status = 200, description = "User is offline", body = UserResponse),
        (status = 409, description = "User is seated in a session")
    )
)]
pub async fn leave_waiting_list(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_service::leave_waiting_list(&state, id).await?.into()))
}

/// Switch the branch a player is browsing.
#[utoipa::path(
    put,
    path = "/users/{id}/branch",
    tag = "users",
    params(("id" = Uuid, Path, description = "Identity switching branch")),
    request_body = BranchRequest,
    responses(
        (status = 200, description = "Branch switched", body = UserResponse),
        (status = 409, description = "Guests cannot switch branch")
    )
)]
pub async fn switch_branch(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<BranchRequest>>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::switch_branch(&state, id, &payload.branch_id).await?;
    Ok(Json(user.into()))
}

/// Log out: leave the queue, remove every guest and go offline.
#[utoipa::path(
    post,
    path = "/users/{id}/logout",
    tag = "users",
    params(("id" = Uuid, Path, description = "Identity logging out")),
    responses((status = 200, description = "Logged out", body = LogoutResponse))
)]
pub async fn logout(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LogoutResponse>, AppError> {
    Ok(Json(user_service::logout(&state, id).await?.into()))
}
