use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Body of `POST {advisory}/predict-wait`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEstimateRequest {
    pub branch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

/// Body of `POST {advisory}/find-partner`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRequest {
    pub user_id: Uuid,
    pub branch_id: String,
}

/// Estimated wait at a branch as reported by the advisory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WaitEstimate {
    pub estimated_minutes: f64,
    /// Model or fallback that produced the estimate.
    pub method: String,
    pub active_machines: u32,
    pub queue_length: u32,
}

impl WaitEstimate {
    /// Canned estimate served while the advisory service is unreachable.
    pub fn fallback() -> Self {
        Self {
            estimated_minutes: 12.5,
            method: "offline_fallback_mode".into(),
            active_machines: 1,
            queue_length: 3,
        }
    }
}

/// One suggested partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PartnerMatch {
    pub uid: String,
    pub username: String,
    pub rank: u32,
    /// Play style label, e.g. `Casual` or `14k Spammer`.
    #[serde(rename = "playStyle")]
    pub play_style: String,
    /// Lower is a better match.
    pub compatibility_score: f64,
}

/// Partner suggestions for a player at a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PartnerSuggestions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub matches: Vec<PartnerMatch>,
}

impl PartnerSuggestions {
    /// Canned suggestions served while the advisory service is unreachable.
    pub fn fallback() -> Self {
        Self {
            requester: Some("You".into()),
            method: Some("offline_mock_data".into()),
            matches: vec![
                PartnerMatch {
                    uid: "mock_1".into(),
                    username: "Sarah_Casual".into(),
                    rank: 1200,
                    play_style: "Casual".into(),
                    compatibility_score: 0.2,
                },
                PartnerMatch {
                    uid: "mock_2".into(),
                    username: "Pro_Gamer_X".into(),
                    rank: 14000,
                    play_style: "14k Spammer".into(),
                    compatibility_score: 1.8,
                },
            ],
        }
    }
}

/// Error body returned by the advisory service with a non-2xx status.
#[derive(Debug, Deserialize)]
pub struct AdvisoryErrorBody {
    pub error: String,
}

/// Query string of the wait estimate route.
#[derive(Debug, Deserialize, IntoParams)]
pub struct WaitEstimateQuery {
    /// Player asking, forwarded to the advisory service when present.
    pub user_id: Option<Uuid>,
}

/// Query string of the partner suggestion route.
#[derive(Debug, Deserialize, IntoParams)]
pub struct PartnerQuery {
    /// Branch to look for partners at; defaults to the player's current branch.
    pub branch_id: Option<String>,
}
