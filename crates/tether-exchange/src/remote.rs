//! Outbound calls to partner instances.
//!
//! One attempt per call, bounded by the client timeout. There is no retry
//! and no backoff here; a failed call is reported to the caller, who decides
//! what the failure means for local state.

use crate::types::{
    normalize_endpoint, DecisionNotice, RegistrationBody, RegistrationReceipt, StreamStatusNotice,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Partner path that registers a new connection request.
pub const REGISTER_PATH: &str = "/connections/requests";
/// Partner path that receives an accept/reject decision.
pub const DECISION_PATH: &str = "/connections/incoming-requests/accept";
/// Partner path that receives a stream status change.
pub const STREAM_UPDATE_PATH: &str = "/connections/streams/update";

/// Longest error body we keep from a partner response.
const MAX_ERROR_BODY: usize = 512;

/// Why a call to a partner did not succeed.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// HTTP client for the exchange protocol. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
}

impl RemoteClient {
    /// Builds a client whose every call is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RemoteError::Client)?;
        Ok(Self { http })
    }

    /// Sends a new connection request to the provider and returns the
    /// provider's receipt.
    ///
    /// The receipt's `providerEndpoint` is the provider's own public URL,
    /// which may differ from `endpoint` (an alias, another port spelling).
    pub async fn deliver(
        &self,
        endpoint: &str,
        body: &RegistrationBody,
    ) -> Result<RegistrationReceipt, RemoteError> {
        let url = exchange_url(endpoint, REGISTER_PATH);
        let response = self.post(&url, body).await?;
        let mut receipt: RegistrationReceipt =
            response
                .json()
                .await
                .map_err(|e| RemoteError::InvalidResponse {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

        if receipt.request.id.trim().is_empty() {
            return Err(RemoteError::InvalidResponse {
                url,
                reason: "receipt has no request id".to_string(),
            });
        }
        if !is_verification_code(&receipt.request.verification_code) {
            return Err(RemoteError::InvalidResponse {
                url,
                reason: "receipt has a malformed verification code".to_string(),
            });
        }
        receipt.request.provider_endpoint =
            normalize_endpoint("providerEndpoint", &receipt.request.provider_endpoint).map_err(
                |e| RemoteError::InvalidResponse {
                    url: url.clone(),
                    reason: e.to_string(),
                },
            )?;
        Ok(receipt)
    }

    /// Tells the submitter that its request was accepted or rejected.
    pub async fn notify_decision(
        &self,
        endpoint: &str,
        notice: &DecisionNotice,
    ) -> Result<(), RemoteError> {
        let url = exchange_url(endpoint, DECISION_PATH);
        self.post(&url, notice).await.map(|_| ())
    }

    /// Tells the partner about a status change on one of our streams.
    pub async fn notify_stream_status(
        &self,
        endpoint: &str,
        notice: &StreamStatusNotice,
    ) -> Result<(), RemoteError> {
        let url = exchange_url(endpoint, STREAM_UPDATE_PATH);
        self.post(&url, notice).await.map(|_| ())
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, RemoteError> {
        tracing::debug!(%url, "calling partner instance");

        let response = self.http.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout {
                    url: url.to_string(),
                }
            } else {
                RemoteError::Transport {
                    url: url.to_string(),
                    source: e,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

/// Joins an exchange path onto a partner base URL.
pub fn exchange_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

fn is_verification_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}
