use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{PlayStyle, UserIdentity, UserStatus},
    dto::{
        format_system_time,
        validation::{validate_branch_code, validate_display_name},
    },
    services::user_service::LogoutSummary,
};

/// Payload used to register a new player profile.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RegisterUserRequest {
    #[validate(length(min = 1, max = 32), custom(function = "validate_display_name"))]
    pub username: String,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub play_style: PlayStyle,
}

/// Payload naming the branch an operation applies to.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BranchRequest {
    #[validate(custom(function = "validate_branch_code"))]
    pub branch_id: String,
}

/// Public projection of a player or guest identity.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub status: UserStatus,
    pub branch_id: String,
    pub current_queue_id: Option<Uuid>,
    pub is_guest: bool,
    pub added_by: Option<Uuid>,
    pub rank: u32,
    pub play_style: PlayStyle,
    pub created_at: String,
}

impl From<UserIdentity> for UserResponse {
    fn from(user: UserIdentity) -> Self {
        Self {
            id: user.id,
            username: user.username,
            status: user.status,
            branch_id: user.branch_id,
            current_queue_id: user.current_queue_id,
            is_guest: user.is_guest,
            added_by: user.added_by,
            rank: user.rank,
            play_style: user.play_style,
            created_at: format_system_time(user.created_at),
        }
    }
}

/// Cleanup performed by a logout.
#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub sessions_left: Vec<Uuid>,
    pub guests_removed: Vec<Uuid>,
}

impl From<LogoutSummary> for LogoutResponse {
    fn from(summary: LogoutSummary) -> Self {
        Self {
            sessions_left: summary.sessions_left,
            guests_removed: summary.guests_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_defaults_and_validation() {
        let request: RegisterUserRequest =
            serde_json::from_str(r#"{ "username": "ada", "play_style": "14k Spammer" }"#).unwrap();
        assert_eq!(request.rank, 0);
        assert_eq!(request.play_style, PlayStyle::Spammer);
        assert!(request.validate().is_ok());

        let blank: RegisterUserRequest = serde_json::from_str(r#"{ "username": "  " }"#).unwrap();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn branch_request_rejects_display_names() {
        let request = BranchRequest {
            branch_id: "SM Seaside City".into(),
        };
        assert!(request.validate().is_err());
    }
}
