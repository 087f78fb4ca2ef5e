//! Client of the external wait-time and partner advisory service.
//!
//! Every call is best effort: failures are logged and replaced by canned answers so callers
//! never see an error.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    config::AdvisorySettings,
    dto::advisory::{
        AdvisoryErrorBody, PartnerRequest, PartnerSuggestions, WaitEstimate, WaitEstimateRequest,
    },
};

/// Why an advisory call did not produce an answer.
#[derive(Debug, Error)]
pub enum AdvisoryError {
    /// The request never got an HTTP answer.
    /// Endpoint path.
    #[error("advisory request to {path} failed")]
    Request {
        path: &'static str,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },
    /// The service answered with a non-success status.
    /// Endpoint path.
    #[error("advisory service rejected {path} with {status}: {message}")]
    Rejected {
        /// Status returned.
        path: &'static str,
        /// Error message from the body, or the raw body.
        status: StatusCode,
        message: String,
    },
    /// The success body did not match the expected shape.
    /// Endpoint path.
    #[error("advisory response of {path} could not be decoded")]
    Decode {
        path: &'static str,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client bound to the configured advisory base URL.
#[derive(Debug, Clone)]
pub struct AdvisoryClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl AdvisoryClient {
    /// Client for the configured base URL and timeout.
    pub fn new(settings: &AdvisorySettings) -> Self {
        Self {
            http: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            timeout: settings.timeout,
        }
    }

    async fn post<B, T>(&self, path: &'static str, body: &B) -> Result<T, AdvisoryError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|source| AdvisoryError::Request { path, source })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<AdvisoryErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("unknown").to_owned(),
            };
            return Err(AdvisoryError::Rejected {
                path,
                status,
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|source| AdvisoryError::Decode { path, source })
    }

    /// Ask for a wait estimate, surfacing failures.
    pub async fn try_wait_estimate(
        &self,
        branch_id: &str,
        user_id: Option<Uuid>,
    ) -> Result<WaitEstimate, AdvisoryError> {
        let body = WaitEstimateRequest {
            branch_id: branch_id.to_owned(),
            user_id,
        };
        self.post("/predict-wait", &body).await
    }

    /// Ask for partner suggestions, surfacing failures.
    pub async fn try_partner_suggestions(
        &self,
        user_id: Uuid,
        branch_id: &str,
    ) -> Result<PartnerSuggestions, AdvisoryError> {
        let body = PartnerRequest {
            user_id,
            branch_id: branch_id.to_owned(),
        };
        self.post("/find-partner", &body).await
    }

    /// Estimated wait at `branch_id`, or [`WaitEstimate::fallback`] when the service fails.
    pub async fn wait_estimate(&self, branch_id: &str, user_id: Option<Uuid>) -> WaitEstimate {
        match self.try_wait_estimate(branch_id, user_id).await {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(branch_id, error = %err, "wait estimate unavailable; serving fallback");
                WaitEstimate::fallback()
            }
        }
    }

    /// Partner suggestions for `user_id`, or [`PartnerSuggestions::fallback`] when the service
    /// fails.
    pub async fn partner_suggestions(&self, user_id: Uuid, branch_id: &str) -> PartnerSuggestions {
        match self.try_partner_suggestions(user_id, branch_id).await {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(
                    %user_id,
                    branch_id,
                    error = %err,
                    "partner suggestions unavailable; serving fallback"
                );
                PartnerSuggestions::fallback()
            }
        }
    }
}
