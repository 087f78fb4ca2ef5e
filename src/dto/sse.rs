use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::{queue::SessionResponse, user::UserResponse};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already serialised payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Full waiting list of a branch, sent on connect and after every change.
pub struct WaitingListSnapshot {
    pub branch_id: String,
    pub users: Vec<UserResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Queued and playing sessions of a branch, oldest first.
pub struct QueueSnapshot {
    pub branch_id: String,
    pub sessions: Vec<SessionResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when a snapshot could not be read from the store.
pub struct SnapshotError {
    pub message: String,
}
