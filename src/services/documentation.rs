use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for MaiQueue Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::users::register_user,
        crate::routes::users::get_user,
        crate::routes::users::join_waiting_list,
        crate::routes::users::leave_waiting_list,
        crate::routes::users::switch_branch,
        crate::routes::users::logout,
        crate::routes::queue::join_queue,
        crate::routes::queue::leave_queue,
        crate::routes::queue::start_game,
        crate::routes::queue::finish_game,
        crate::routes::queue::advance_queue,
        crate::routes::guests::add_guest_to_waiting_list,
        crate::routes::guests::pair_host_with_guest,
        crate::routes::guests::add_guest_solo,
        crate::routes::guests::remove_guest,
        crate::routes::advisory::wait_estimate,
        crate::routes::advisory::partner_suggestions,
        crate::routes::sse::waiting_stream,
        crate::routes::sse::queue_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::user::RegisterUserRequest,
            crate::dto::user::BranchRequest,
            crate::dto::user::UserResponse,
            crate::dto::user::LogoutResponse,
            crate::dto::queue::JoinQueueRequest,
            crate::dto::queue::GuestRequest,
            crate::dto::queue::PlayersRequest,
            crate::dto::queue::SessionResponse,
            crate::dto::queue::AdmissionResponse,
            crate::dto::queue::DepartureResponse,
            crate::dto::queue::GuestAdmissionResponse,
            crate::dto::queue::AdvanceResponse,
            crate::dto::queue::ActionResponse,
            crate::dto::advisory::WaitEstimate,
            crate::dto::advisory::PartnerSuggestions,
            crate::dto::advisory::PartnerMatch,
            crate::dto::sse::WaitingListSnapshot,
            crate::dto::sse::QueueSnapshot,
            crate::dto::sse::SnapshotError,
            crate::dao::models::UserStatus,
            crate::dao::models::PlayStyle,
            crate::dao::models::SessionType,
            crate::dao::models::SessionStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "users", description = "Player profiles and waiting list presence"),
        (name = "queue", description = "Queue admission"),
        (name = "sessions", description = "Game lifecycle"),
        (name = "guests", description = "Guests brought along by players"),
        (name = "advisory", description = "Wait-time and partner advice"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/users/{id}/queue/{session_id}",
            "/branches/{branch}/advance",
            "/sse/branches/{branch}/queue",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
