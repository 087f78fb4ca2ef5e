use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{Session, SessionStatus, SessionType, UserStatus},
    dto::{
        format_system_time,
        user::UserResponse,
        validation::{validate_branch_code, validate_display_name},
    },
    services::{
        guest_service::GuestAdmission,
        queue_service::{Admission, Departure},
    },
};

/// Payload used to join the queue of a branch.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinQueueRequest {
    #[validate(custom(function = "validate_branch_code"))]
    pub branch_id: String,
    pub mode: SessionType,
}

/// Payload used to bring a guest along.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GuestRequest {
    #[validate(custom(function = "validate_branch_code"))]
    pub branch_id: String,
    #[validate(length(min = 1, max = 32), custom(function = "validate_display_name"))]
    pub guest_name: String,
}

/// Players a lifecycle operation applies to.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PlayersRequest {
    #[validate(length(min = 1, max = 2))]
    pub player_ids: Vec<Uuid>,
}

/// Public projection of a session; players, names and count are index aligned.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub branch_id: String,
    #[serde(rename = "type")]
    pub kind: SessionType,
    pub status: SessionStatus,
    pub players: Vec<Uuid>,
    pub player_names: Vec<String>,
    pub player_count: usize,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            players: session.player_ids(),
            player_names: session.player_names(),
            player_count: session.player_count(),
            branch_id: session.branch_id,
            kind: session.kind,
            status: session.status,
            created_at: format_system_time(session.created_at),
            started_at: session.started_at.map(format_system_time),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// Where a joiner ended up.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdmissionResponse {
    pub session: SessionResponse,
    pub status: UserStatus,
}

impl From<Admission> for AdmissionResponse {
    fn from(admission: Admission) -> Self {
        Self {
            session: admission.session.into(),
            status: admission.status,
        }
    }
}

/// Identities sent back to the waiting pool by a departure.
#[derive(Debug, Serialize, ToSchema)]
pub struct DepartureResponse {
    pub removed: Vec<Uuid>,
    pub session_deleted: bool,
}

impl From<Departure> for DepartureResponse {
    fn from(departure: Departure) -> Self {
        Self {
            removed: departure.removed,
            session_deleted: departure.session_deleted,
        }
    }
}

/// A guest created together with its seat.
#[derive(Debug, Serialize, ToSchema)]
pub struct GuestAdmissionResponse {
    pub guest: UserResponse,
    pub session: SessionResponse,
    pub status: UserStatus,
}

impl From<GuestAdmission> for GuestAdmissionResponse {
    fn from(admission: GuestAdmission) -> Self {
        Self {
            guest: admission.guest.into(),
            session: admission.session.into(),
            status: admission.status,
        }
    }
}

/// Result of trying to advance a branch queue.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceResponse {
    /// Session put on a cabinet, absent when nothing could start.
    pub started: Option<SessionResponse>,
}

/// Generic acknowledgement for lifecycle operations.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Seat;

    #[test]
    fn session_response_flattens_seats() {
        let first = Seat {
            user_id: Uuid::new_v4(),
            name: "a".into(),
        };
        let mut session = Session::open("jamal".into(), SessionType::Sync, first.clone());
        session.seats.push(Seat {
            user_id: Uuid::new_v4(),
            name: "b".into(),
        });

        let response = SessionResponse::from(session);
        assert_eq!(response.player_count, 2);
        assert_eq!(response.players[0], first.user_id);
        assert_eq!(response.player_names, ["a", "b"]);
        assert_eq!(response.started_at, None);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "sync");
        assert_eq!(json["status"], "queued");
    }

    #[test]
    fn players_request_needs_one_or_two_ids() {
        let empty = PlayersRequest { player_ids: vec![] };
        assert!(empty.validate().is_err());
        let pair = PlayersRequest {
            player_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        assert!(pair.validate().is_ok());
    }
}
