use axum::Router;

use crate::{dto::validation::validate_branch_code, error::AppError, state::SharedState};

/// Wait estimate and partner suggestion endpoints.
pub mod advisory;
/// Swagger UI and OpenAPI document.
pub mod docs;
/// Guest endpoints.
pub mod guests;
/// Health check.
pub mod health;
/// Queue and game lifecycle endpoints.
pub mod queue;
/// Live views over server-sent events.
pub mod sse;
/// Identity and waiting list endpoints.
pub mod users;

/// Validate a branch code taken from the request path.
pub(crate) fn branch_path(branch: String) -> Result<String, AppError> {
    validate_branch_code(&branch).map_err(|err| {
        AppError::BadRequest(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| format!("invalid branch code `{branch}`")),
        )
    })?;
    Ok(branch)
}

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(users::router())
        .merge(queue::router())
        .merge(guests::router())
        .merge(advisory::router())
        .merge(sse::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
