//! Records and wire payloads of the exchange protocol.
//!
//! Every body that crosses an instance boundary has its own struct here and
//! is normalized (see the `normalized` methods) before it reaches the state
//! machine. Nothing downstream handles untyped JSON.

use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tether_types::{RequestDirection, RequestStatus, StreamDirection, StreamStatus};
use url::Url;

/// How this deployment presents itself to partners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    /// Base URL partners use to reach our exchange endpoints.
    pub public_url: String,
    /// Stable id, persisted in the database.
    pub instance_id: String,
}

impl InstanceIdentity {
    /// Canonicalizes `public_url` so it matches the stream keys partners
    /// derive from it.
    pub fn new(public_url: &str, instance_id: String) -> Result<Self, ExchangeError> {
        Ok(Self {
            public_url: normalize_endpoint("publicUrl", public_url)?,
            instance_id,
        })
    }
}

/// Identifiers of the partner deployment, filled in once a handshake is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRef {
    /// The organization the relationship was requested for.
    pub external_account_id: String,
    /// The handshake id, shared by both instances.
    pub external_id: String,
    /// The partner's instance id.
    pub instance_id: String,
}

/// One side of a handshake as recorded on this instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub id: String,
    pub direction: RequestDirection,
    /// Base URL of the instance that submitted the request.
    pub consumer_endpoint: String,
    /// Base URL of the instance that received the request.
    pub provider_endpoint: String,
    pub namespace: String,
    pub organization: String,
    /// De-duplicated, sorted format names.
    pub formats: Vec<String>,
    /// Six-digit out-of-band code minted by the receiving instance.
    pub verification_code: String,
    pub acceptance_token: String,
    pub status: RequestStatus,
    /// RFC 3339, set at insert.
    pub creation_date: String,
    /// Instance id the partner announced during registration.
    #[serde(default)]
    pub partner_instance_id: Option<String>,
    /// Present only once the record is `accepted`.
    #[serde(default)]
    pub connection: Option<ConnectionRef>,
}

impl ConnectionRequest {
    /// Base URL of the other party, from this instance's point of view.
    pub fn partner_endpoint(&self) -> &str {
        match self.direction {
            RequestDirection::Incoming => &self.consumer_endpoint,
            RequestDirection::Submitted => &self.provider_endpoint,
        }
    }

    /// Cross-reference to store when this record is accepted.
    pub fn connection_ref(&self) -> ConnectionRef {
        ConnectionRef {
            external_account_id: self.organization.clone(),
            external_id: self.id.clone(),
            instance_id: self.partner_instance_id.clone().unwrap_or_default(),
        }
    }
}

/// Administrator input for `create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub provider_endpoint: String,
    pub organization: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub formats: Vec<String>,
}

impl CreateConnectionRequest {
    /// Trims fields and de-duplicates formats, rejecting anything that
    /// cannot be sent to a partner.
    pub fn normalized(self) -> Result<Self, ExchangeError> {
        Ok(Self {
            provider_endpoint: normalize_endpoint("providerEndpoint", &self.provider_endpoint)?,
            organization: require_non_blank("organization", &self.organization)?,
            namespace: self.namespace.trim().to_string(),
            formats: normalize_formats(&self.formats)?,
        })
    }
}

/// Body of `POST /connections/requests`, sent by the submitting instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationBody {
    pub consumer_endpoint: String,
    pub consumer_instance_id: String,
    pub provider_endpoint: String,
    pub organization: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub formats: Vec<String>,
}

impl RegistrationBody {
    pub fn normalized(self) -> Result<Self, ExchangeError> {
        Ok(Self {
            consumer_endpoint: normalize_endpoint("consumerEndpoint", &self.consumer_endpoint)?,
            consumer_instance_id: require_non_blank(
                "consumerInstanceId",
                &self.consumer_instance_id,
            )?,
            provider_endpoint: normalize_endpoint("providerEndpoint", &self.provider_endpoint)?,
            organization: require_non_blank("organization", &self.organization)?,
            namespace: self.namespace.trim().to_string(),
            formats: normalize_formats(&self.formats)?,
        })
    }
}

/// Response of `POST /connections/requests`: the receiver's incoming record
/// plus its instance id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    #[serde(flatten)]
    pub request: ConnectionRequest,
    pub instance_id: String,
}

/// Body of `POST /connections/incoming-requests/accept`.
///
/// Carries only the decision. The receiver looks up its own record by `id`;
/// codes and tokens never travel on this call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DecisionNotice {
    pub id: String,
    /// The submitter's endpoint as recorded in the request.
    pub endpoint: String,
    pub accepted: bool,
}

/// Composite key of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamKey {
    /// Base URL of the partner instance.
    pub endpoint: String,
    pub namespace: String,
    pub format: String,
    pub direction: StreamDirection,
}

impl StreamKey {
    pub(crate) fn lock_key(&self) -> String {
        format!(
            "stream:{}|{}|{}|{}",
            self.endpoint, self.namespace, self.format, self.direction
        )
    }
}

/// A stream descriptor as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    #[serde(flatten)]
    pub key: StreamKey,
    pub status: StreamStatus,
    /// The partner holds its side paused. Kept even while we are paused
    /// ourselves, so a local resume cannot reopen the stream.
    #[serde(default)]
    pub remote_paused: bool,
    /// The accepted request that created this stream.
    pub request_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// All streams negotiated with one partner endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerConnection {
    pub endpoint: String,
    pub input: Vec<Stream>,
    pub output: Vec<Stream>,
}

/// Stream part of a status announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StreamDescriptor {
    pub format: String,
    pub namespace: String,
    pub status: StreamStatus,
}

/// Body of `POST /connections/streams/update`.
///
/// `endpoint` and `stream_type` are from the sender's point of view: the
/// sender's `output` is the receiver's `input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StreamStatusNotice {
    pub endpoint: String,
    pub stream_type: StreamDirection,
    pub stream: StreamDescriptor,
}

fn require_non_blank(field: &str, value: &str) -> Result<String, ExchangeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ExchangeError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Accepts absolute http(s) URLs and returns their canonical form: scheme and
/// host lowercased, default port dropped, no trailing slash.
pub(crate) fn normalize_endpoint(field: &str, value: &str) -> Result<String, ExchangeError> {
    let trimmed = require_non_blank(field, value)?;
    let parsed = Url::parse(&trimmed).map_err(|e| {
        ExchangeError::Validation(format!("{} is not a valid URL: {}", field, e))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ExchangeError::Validation(format!(
            "{} must be an http or https URL",
            field
        )));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn normalize_formats(formats: &[String]) -> Result<Vec<String>, ExchangeError> {
    let mut set = BTreeSet::new();
    for format in formats {
        let format = format.trim();
        if format.is_empty() {
            return Err(ExchangeError::Validation(
                "format names must not be blank".to_string(),
            ));
        }
        set.insert(format.to_string());
    }
    if set.is_empty() {
        return Err(ExchangeError::Validation(
            "at least one format is required".to_string(),
        ));
    }
    Ok(set.into_iter().collect())
}
