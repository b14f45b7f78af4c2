//! The connection request handshake.
//!
//! A handshake produces one record on each instance. The submitter calls
//! [`HandshakeCoordinator::create`], which registers the request with the
//! provider ([`HandshakeCoordinator::register_incoming`] on the other side)
//! and only then stores its own `submitted` record. The provider's
//! administrator calls [`HandshakeCoordinator::decide`]; the decision is
//! pushed back to the submitter
//! ([`HandshakeCoordinator::apply_remote_decision`] on the other side) and,
//! when accepted, both sides materialize their streams.

use crate::db::with_conn;
use crate::error::ExchangeError;
use crate::locks::KeyedLocks;
use crate::remote::RemoteClient;
use crate::requests::{get_request, insert_request, list_requests, transition_status};
use crate::streams::create_streams;
use crate::types::{
    normalize_endpoint, ConnectionRequest, CreateConnectionRequest, DecisionNotice,
    InstanceIdentity, RegistrationBody, RegistrationReceipt,
};
use rand::Rng;
use tether_db::DbPool;
use tether_types::{RequestDirection, RequestStatus};
use uuid::Uuid;

/// Drives connection requests through their lifecycle.
#[derive(Clone)]
pub struct HandshakeCoordinator {
    pool: DbPool,
    remote: RemoteClient,
    identity: InstanceIdentity,
    locks: KeyedLocks,
}

impl HandshakeCoordinator {
    pub fn new(pool: DbPool, remote: RemoteClient, identity: InstanceIdentity) -> Self {
        Self {
            pool,
            remote,
            identity,
            locks: KeyedLocks::new(),
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// Submits a connection request to a provider.
    ///
    /// The `submitted` record is written only after the provider has
    /// registered the request, so a failed delivery leaves nothing behind.
    /// It records the provider under the public URL the provider reports in
    /// its receipt, not the URL the administrator typed; stream notices from
    /// the provider carry that URL.
    pub async fn create(
        &self,
        payload: CreateConnectionRequest,
    ) -> Result<ConnectionRequest, ExchangeError> {
        let payload = payload.normalized()?;

        let body = RegistrationBody {
            consumer_endpoint: self.identity.public_url.clone(),
            consumer_instance_id: self.identity.instance_id.clone(),
            provider_endpoint: payload.provider_endpoint,
            organization: payload.organization,
            namespace: payload.namespace,
            formats: payload.formats,
        };

        let receipt = match self.remote.deliver(&body.provider_endpoint, &body).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(
                    provider = %body.provider_endpoint,
                    error = %e,
                    "connection request was not delivered"
                );
                return Err(e.into());
            }
        };

        if receipt.request.provider_endpoint != body.provider_endpoint {
            tracing::debug!(
                requested = %body.provider_endpoint,
                reported = %receipt.request.provider_endpoint,
                "provider reported a different public url"
            );
        }

        let record = ConnectionRequest {
            id: receipt.request.id,
            direction: RequestDirection::Submitted,
            consumer_endpoint: body.consumer_endpoint,
            provider_endpoint: receipt.request.provider_endpoint,
            namespace: body.namespace,
            organization: body.organization,
            formats: body.formats,
            verification_code: receipt.request.verification_code,
            acceptance_token: receipt.request.acceptance_token,
            status: RequestStatus::Created,
            creation_date: now(),
            partner_instance_id: Some(receipt.instance_id),
            connection: None,
        };

        let stored = record.clone();
        with_conn(&self.pool, move |conn| Ok(insert_request(conn, &stored)?)).await?;

        tracing::info!(
            request_id = %record.id,
            provider = %record.provider_endpoint,
            formats = record.formats.len(),
            "connection request submitted"
        );
        Ok(record)
    }

    /// Records a request sent to us by a consumer and mints its
    /// verification code and acceptance token.
    ///
    /// Whatever URL the consumer used to reach us, the record carries our own
    /// public URL as the provider endpoint.
    pub async fn register_incoming(
        &self,
        body: RegistrationBody,
    ) -> Result<RegistrationReceipt, ExchangeError> {
        let body = body.normalized()?;

        let record = ConnectionRequest {
            id: Uuid::new_v4().to_string(),
            direction: RequestDirection::Incoming,
            consumer_endpoint: body.consumer_endpoint,
            provider_endpoint: self.identity.public_url.clone(),
            namespace: body.namespace,
            organization: body.organization,
            formats: body.formats,
            verification_code: generate_verification_code(),
            acceptance_token: Uuid::new_v4().simple().to_string(),
            status: RequestStatus::Created,
            creation_date: now(),
            partner_instance_id: Some(body.consumer_instance_id),
            connection: None,
        };

        let stored = record.clone();
        with_conn(&self.pool, move |conn| Ok(insert_request(conn, &stored)?)).await?;

        tracing::info!(
            request_id = %record.id,
            consumer = %record.consumer_endpoint,
            organization = %record.organization,
            "incoming connection request registered"
        );

        Ok(RegistrationReceipt {
            request: record,
            instance_id: self.identity.instance_id.clone(),
        })
    }

    /// Accepts or rejects an incoming request and tells the submitter.
    ///
    /// The record moves to `accepted_pending`/`rejected_pending` before the
    /// remote call and stays there if the call fails. Calling again with the
    /// same decision retries delivery; any other starting status is a
    /// precondition failure and no remote call is made.
    pub async fn decide(&self, id: &str, accepted: bool) -> Result<ConnectionRequest, ExchangeError> {
        let _guard = self
            .locks
            .acquire(&request_lock_key(RequestDirection::Incoming, id))
            .await;

        let record = self.get(RequestDirection::Incoming, id).await?;
        let marker = RequestStatus::pending_for(accepted);

        match record.status {
            RequestStatus::Created => {
                let request_id = record.id.clone();
                let moved = with_conn(&self.pool, move |conn| {
                    Ok(transition_status(
                        conn,
                        RequestDirection::Incoming,
                        &request_id,
                        RequestStatus::Created,
                        marker,
                        None,
                    )?)
                })
                .await?;
                if !moved {
                    return Err(ExchangeError::Precondition(format!(
                        "connection request {} changed status while being decided",
                        id
                    )));
                }
            }
            status if status == marker => {
                tracing::info!(request_id = %id, %status, "retrying decision delivery");
            }
            status => {
                return Err(ExchangeError::Precondition(format!(
                    "connection request {} is {}; only a created request can be {}",
                    id,
                    status,
                    if accepted { "accepted" } else { "rejected" }
                )));
            }
        }

        let notice = DecisionNotice {
            id: record.id.clone(),
            endpoint: record.consumer_endpoint.clone(),
            accepted,
        };
        if let Err(e) = self
            .remote
            .notify_decision(&record.consumer_endpoint, &notice)
            .await
        {
            tracing::warn!(
                request_id = %id,
                consumer = %record.consumer_endpoint,
                status = %marker,
                error = %e,
                "decision was not delivered, request left pending"
            );
            return Err(e.into());
        }

        let decided = self.finalize(record, marker, accepted).await?;
        tracing::info!(
            request_id = %decided.id,
            status = %decided.status,
            "incoming connection request decided"
        );
        Ok(decided)
    }

    /// Applies the provider's decision to our `submitted` record.
    ///
    /// Replaying a decision that was already applied returns the record
    /// unchanged, so the provider can safely retry after a lost response.
    pub async fn apply_remote_decision(
        &self,
        notice: DecisionNotice,
    ) -> Result<ConnectionRequest, ExchangeError> {
        let _guard = self
            .locks
            .acquire(&request_lock_key(RequestDirection::Submitted, &notice.id))
            .await;

        let record = self
            .get(RequestDirection::Submitted, &notice.id)
            .await?;
        let sender = normalize_endpoint("endpoint", &notice.endpoint).ok();
        if sender.as_deref() != Some(record.consumer_endpoint.as_str()) {
            return Err(ExchangeError::NotFound(format!(
                "no submitted connection request {} for endpoint {}",
                notice.id, notice.endpoint
            )));
        }

        let target = RequestStatus::terminal_for(notice.accepted);
        match record.status {
            RequestStatus::Created => {
                let decided = self.finalize(record, RequestStatus::Created, notice.accepted).await?;
                tracing::info!(
                    request_id = %decided.id,
                    status = %decided.status,
                    provider = %decided.provider_endpoint,
                    "provider decided on submitted connection request"
                );
                Ok(decided)
            }
            status if status == target => {
                tracing::debug!(request_id = %record.id, %status, "decision replayed");
                Ok(record)
            }
            status => Err(ExchangeError::Precondition(format!(
                "connection request {} is already {}",
                record.id, status
            ))),
        }
    }

    /// Fetches one record.
    pub async fn get(
        &self,
        direction: RequestDirection,
        id: &str,
    ) -> Result<ConnectionRequest, ExchangeError> {
        let id = id.to_string();
        with_conn(&self.pool, move |conn| {
            get_request(conn, direction, &id)?.ok_or_else(|| {
                ExchangeError::NotFound(format!("no {} connection request {}", direction, id))
            })
        })
        .await
    }

    /// Lists all records for one direction, newest first.
    pub async fn list(
        &self,
        direction: RequestDirection,
    ) -> Result<Vec<ConnectionRequest>, ExchangeError> {
        with_conn(&self.pool, move |conn| Ok(list_requests(conn, direction)?)).await
    }

    /// Moves `record` from `from` to its terminal status and, on acceptance,
    /// creates its streams in the same transaction.
    async fn finalize(
        &self,
        record: ConnectionRequest,
        from: RequestStatus,
        accepted: bool,
    ) -> Result<ConnectionRequest, ExchangeError> {
        let to = RequestStatus::terminal_for(accepted);
        with_conn(&self.pool, move |conn| {
            let reference = accepted.then(|| record.connection_ref());

            let tx = conn.unchecked_transaction()?;
            let moved = transition_status(
                &tx,
                record.direction,
                &record.id,
                from,
                to,
                reference.as_ref(),
            )?;
            if !moved {
                return Err(ExchangeError::Precondition(format!(
                    "connection request {} is no longer {}",
                    record.id, from
                )));
            }
            if accepted {
                let created = create_streams(
                    &tx,
                    record.partner_endpoint(),
                    &record.namespace,
                    &record.formats,
                    &record.id,
                )?;
                tracing::debug!(request_id = %record.id, streams = created, "streams created");
            }
            tx.commit()?;

            get_request(conn, record.direction, &record.id)?.ok_or_else(|| {
                ExchangeError::NotFound(format!("connection request {} vanished", record.id))
            })
        })
        .await
    }
}

fn request_lock_key(direction: RequestDirection, id: &str) -> String {
    format!("request:{}:{}", direction, id)
}

fn generate_verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
