use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::advisory::{PartnerQuery, PartnerSuggestions, WaitEstimate, WaitEstimateQuery},
    error::AppError,
    routes::branch_path,
    services::user_service,
    state::SharedState,
};

/// Wait-time and partner advice, proxied to the advisory service.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/branches/{branch}/wait-estimate", get(wait_estimate))
        .route("/users/{id}/partners", get(partner_suggestions))
}

/// Estimated wait at a branch; a canned estimate is served when the advisor is down.
#[utoipa::path(
    get,
    path = "/branches/{branch}/wait-estimate",
    tag = "advisory",
    params(("branch" = String, Path, description = "Branch code"), WaitEstimateQuery),
    responses((status = 200, description = "Wait estimate", body = WaitEstimate))
)]
pub async fn wait_estimate(
    State(state): State<SharedState>,
    Path(branch): Path<String>,
    Query(query): Query<WaitEstimateQuery>,
) -> Result<Json<WaitEstimate>, AppError> {
    let branch = branch_path(branch)?;
    Ok(Json(
        state.advisory().wait_estimate(&branch, query.user_id).await,
    ))
}

/// Partner suggestions for a player; canned suggestions are served when the advisor is down.
#[utoipa::path(
    get,
    path = "/users/{id}/partners",
    tag = "advisory",
    params(("id" = Uuid, Path, description = "Player asking"), PartnerQuery),
    responses(
        (status = 200, description = "Partner suggestions", body = PartnerSuggestions),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn partner_suggestions(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PartnerQuery>,
) -> Result<Json<PartnerSuggestions>, AppError> {
    let branch = match query.branch_id {
        Some(branch) => branch_path(branch)?,
        None => user_service::get_user(&state, id).await?.branch_id,
    };
    Ok(Json(state.advisory().partner_suggestions(id, &branch).await))
}
