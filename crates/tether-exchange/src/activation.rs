//! Pause and resume of negotiated streams.
//!
//! A local status change is announced to the partner before it is written,
//! so both sides agree on what happened or neither side changes. The
//! partner records our pause as `paused_external` on its mirror stream and
//! refuses to resume it on its own.
//!
//! A stream also remembers whether the partner holds it paused
//! (`remote_paused`) while we have it paused ourselves. Resuming such a
//! stream lands on `paused_external`, not `active`.

use crate::db::with_conn;
use crate::error::ExchangeError;
use crate::locks::KeyedLocks;
use crate::remote::RemoteClient;
use crate::streams::{get_stream, list_connections, list_streams, set_stream_status};
use crate::types::{
    normalize_endpoint, InstanceIdentity, PartnerConnection, Stream, StreamDescriptor, StreamKey,
    StreamStatusNotice,
};
use tether_db::DbPool;
use tether_types::StreamStatus;

#[derive(Clone)]
pub struct StreamActivationManager {
    pool: DbPool,
    remote: RemoteClient,
    identity: InstanceIdentity,
    locks: KeyedLocks,
}

impl StreamActivationManager {
    pub fn new(pool: DbPool, remote: RemoteClient, identity: InstanceIdentity) -> Self {
        Self {
            pool,
            remote,
            identity,
            locks: KeyedLocks::new(),
        }
    }

    /// Pauses or resumes one of our streams.
    ///
    /// Setting the current status again is a no-op that does not contact
    /// the partner. A stream paused by the partner cannot be changed here.
    /// Resuming while the partner still holds its side paused announces the
    /// resume and leaves the stream `paused_external`.
    pub async fn set_status(
        &self,
        key: StreamKey,
        status: StreamStatus,
    ) -> Result<Stream, ExchangeError> {
        if status == StreamStatus::PausedExternal {
            return Err(ExchangeError::Validation(
                "paused_external is set by the partner, not locally".to_string(),
            ));
        }
        let key = normalize_key(key)?;
        let _guard = self.locks.acquire(&key.lock_key()).await;

        let current = self.get_stream(key.clone()).await?;
        if current.status == status {
            return Ok(current);
        }
        if current.status == StreamStatus::PausedExternal {
            return Err(ExchangeError::Precondition(format!(
                "stream {} {} to {} was paused by the partner",
                key.format, key.direction, key.endpoint
            )));
        }

        let notice = StreamStatusNotice {
            endpoint: self.identity.public_url.clone(),
            stream_type: key.direction,
            stream: StreamDescriptor {
                format: key.format.clone(),
                namespace: key.namespace.clone(),
                status,
            },
        };
        if let Err(e) = self.remote.notify_stream_status(&key.endpoint, &notice).await {
            tracing::warn!(
                endpoint = %key.endpoint,
                format = %key.format,
                direction = %key.direction,
                %status,
                error = %e,
                "stream status change was not delivered, local status unchanged"
            );
            return Err(e.into());
        }

        let landed = if status == StreamStatus::Active && current.remote_paused {
            StreamStatus::PausedExternal
        } else {
            status
        };
        let updated = self
            .swap(key, current.status, landed, current.remote_paused)
            .await?;
        tracing::info!(
            endpoint = %updated.key.endpoint,
            format = %updated.key.format,
            direction = %updated.key.direction,
            status = %updated.status,
            remote_paused = updated.remote_paused,
            "stream status changed"
        );
        Ok(updated)
    }

    /// Mirrors a partner's status change onto our side of the stream.
    pub async fn apply_remote_status(
        &self,
        notice: StreamStatusNotice,
    ) -> Result<Stream, ExchangeError> {
        if notice.stream.status == StreamStatus::PausedExternal {
            return Err(ExchangeError::Validation(
                "a partner can only announce active or paused".to_string(),
            ));
        }
        let key = normalize_key(StreamKey {
            endpoint: notice.endpoint,
            namespace: notice.stream.namespace,
            format: notice.stream.format,
            direction: notice.stream_type.opposite(),
        })?;
        let _guard = self.locks.acquire(&key.lock_key()).await;

        let current = self.get_stream(key.clone()).await?;
        let remote_paused = notice.stream.status == StreamStatus::Paused;
        let next = match (current.status, remote_paused) {
            (StreamStatus::Active, true) => StreamStatus::PausedExternal,
            (StreamStatus::PausedExternal, false) => StreamStatus::Active,
            // Our own pause stands either way; only the flag moves.
            (local, _) => local,
        };
        if next == current.status && remote_paused == current.remote_paused {
            tracing::debug!(
                endpoint = %key.endpoint,
                format = %key.format,
                local = %current.status,
                remote = %notice.stream.status,
                "partner status change does not affect local stream"
            );
            return Ok(current);
        }

        let updated = self.swap(key, current.status, next, remote_paused).await?;
        tracing::info!(
            endpoint = %updated.key.endpoint,
            format = %updated.key.format,
            direction = %updated.key.direction,
            status = %updated.status,
            remote_paused = updated.remote_paused,
            "partner changed stream status"
        );
        Ok(updated)
    }

    pub async fn get_stream(&self, key: StreamKey) -> Result<Stream, ExchangeError> {
        with_conn(&self.pool, move |conn| {
            get_stream(conn, &key)?.ok_or_else(|| {
                ExchangeError::NotFound(format!(
                    "no {} stream for format {:?} in namespace {:?} with {}",
                    key.direction, key.format, key.namespace, key.endpoint
                ))
            })
        })
        .await
    }

    /// Lists streams, optionally for a single partner endpoint.
    pub async fn list_streams(&self, endpoint: Option<String>) -> Result<Vec<Stream>, ExchangeError> {
        let endpoint = endpoint
            .map(|e| normalize_endpoint("endpoint", &e))
            .transpose()?;
        with_conn(&self.pool, move |conn| Ok(list_streams(conn, endpoint.as_deref())?))
        .await
    }

    pub async fn list_connections(&self) -> Result<Vec<PartnerConnection>, ExchangeError> {
        with_conn(&self.pool, |conn| Ok(list_connections(conn)?)).await
    }

    /// Whether data may flow on `key`: the stream exists and is `active`.
    pub async fn allows_traffic(&self, key: StreamKey) -> Result<bool, ExchangeError> {
        let key = normalize_key(key)?;
        with_conn(&self.pool, move |conn| {
            Ok(get_stream(conn, &key)?.is_some_and(|s| s.status == StreamStatus::Active))
        })
        .await
    }

    async fn swap(
        &self,
        key: StreamKey,
        from: StreamStatus,
        to: StreamStatus,
        remote_paused: bool,
    ) -> Result<Stream, ExchangeError> {
        with_conn(&self.pool, move |conn| {
            if !set_stream_status(conn, &key, from, to, remote_paused)? {
                return Err(ExchangeError::Precondition(format!(
                    "stream {} {} to {} is no longer {}",
                    key.format, key.direction, key.endpoint, from
                )));
            }
            get_stream(conn, &key)?.ok_or_else(|| {
                ExchangeError::NotFound(format!("stream {} to {} vanished", key.format, key.endpoint))
            })
        })
        .await
    }
}

fn normalize_key(key: StreamKey) -> Result<StreamKey, ExchangeError> {
    if key.format.trim().is_empty() {
        return Err(ExchangeError::Validation("format is required".to_string()));
    }
    Ok(StreamKey {
        endpoint: normalize_endpoint("endpoint", &key.endpoint)?,
        namespace: key.namespace.trim().to_string(),
        format: key.format.trim().to_string(),
        direction: key.direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::STREAM_UPDATE_PATH;
    use crate::streams::create_streams;
    use crate::test_support::{client, file_pool, identity, unreachable_endpoint, RecordingPartner};
    use axum::http::StatusCode;
    use tether_types::StreamDirection;

    fn key(endpoint: &str, direction: StreamDirection) -> StreamKey {
        StreamKey {
            endpoint: endpoint.to_string(),
            namespace: "courses".to_string(),
            format: "xAPI".to_string(),
            direction,
        }
    }

    fn seeded(endpoint: &str) -> (tempfile::NamedTempFile, StreamActivationManager) {
        let (file, pool) = file_pool();
        {
            let conn = pool.get().unwrap();
            create_streams(&conn, endpoint, "courses", &["xAPI".to_string()], "r1").unwrap();
        }
        let manager = StreamActivationManager::new(pool, client(), identity("http://self.example"));
        (file, manager)
    }

    fn notice(status: StreamStatus) -> StreamStatusNotice {
        StreamStatusNotice {
            endpoint: "http://partner.example".to_string(),
            stream_type: StreamDirection::Output,
            stream: StreamDescriptor {
                format: "xAPI".to_string(),
                namespace: "courses".to_string(),
                status,
            },
        }
    }

    #[tokio::test]
    async fn pause_notifies_partner_then_writes() {
        let partner = RecordingPartner::start(StatusCode::OK).await;
        let (_file, manager) = seeded(&partner.base_url);
        let output = key(&partner.base_url, StreamDirection::Output);

        let paused = manager
            .set_status(output.clone(), StreamStatus::Paused)
            .await
            .unwrap();
        assert_eq!(paused.status, StreamStatus::Paused);
        assert!(!manager.allows_traffic(output.clone()).await.unwrap());

        let calls = partner.calls();
        assert_eq!(calls.len(), 1);
        let (path, body) = &calls[0];
        assert_eq!(path, STREAM_UPDATE_PATH);
        assert_eq!(body["endpoint"], "http://self.example");
        assert_eq!(body["streamType"], "output");
        assert_eq!(body["stream"]["format"], "xAPI");
        assert_eq!(body["stream"]["namespace"], "courses");
        assert_eq!(body["stream"]["status"], "paused");

        let resumed = manager.set_status(output.clone(), StreamStatus::Active).await.unwrap();
        assert_eq!(resumed.status, StreamStatus::Active);
        assert!(manager.allows_traffic(output).await.unwrap());
        assert_eq!(partner.calls().len(), 2);
    }

    #[tokio::test]
    async fn same_status_is_a_no_op() {
        let partner = RecordingPartner::start(StatusCode::OK).await;
        let (_file, manager) = seeded(&partner.base_url);

        let stream = manager
            .set_status(key(&partner.base_url, StreamDirection::Input), StreamStatus::Active)
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::Active);
        assert!(partner.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_notification_leaves_status_unchanged() {
        let partner = RecordingPartner::start(StatusCode::INTERNAL_SERVER_ERROR).await;
        let (_file, manager) = seeded(&partner.base_url);
        let output = key(&partner.base_url, StreamDirection::Output);

        let err = manager
            .set_status(output.clone(), StreamStatus::Paused)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::RemoteDelivery(_)), "got {err:?}");
        assert_eq!(
            manager.get_stream(output).await.unwrap().status,
            StreamStatus::Active
        );
    }

    #[tokio::test]
    async fn unreachable_partner_leaves_status_unchanged() {
        let down = unreachable_endpoint().await;
        let (_file, manager) = seeded(&down);
        let input = key(&down, StreamDirection::Input);

        assert!(manager.set_status(input.clone(), StreamStatus::Paused).await.is_err());
        assert!(manager.allows_traffic(input).await.unwrap());
    }

    #[tokio::test]
    async fn local_paused_external_is_rejected() {
        let (_file, manager) = seeded("http://partner.example");
        let err = manager
            .set_status(
                key("http://partner.example", StreamDirection::Input),
                StreamStatus::PausedExternal,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let (_file, manager) = seeded("http://partner.example");
        let mut missing = key("http://partner.example", StreamDirection::Input);
        missing.format = "caliper".to_string();

        let err = manager
            .set_status(missing.clone(), StreamStatus::Paused)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound(_)));
        assert!(!manager.allows_traffic(missing).await.unwrap());
    }

    #[tokio::test]
    async fn remote_pause_marks_mirror_stream_paused_external() {
        let (_file, manager) = seeded("http://partner.example");
        let input = key("http://partner.example", StreamDirection::Input);

        let stream = manager
            .apply_remote_status(notice(StreamStatus::Paused))
            .await
            .unwrap();
        assert_eq!(stream.key, input);
        assert_eq!(stream.status, StreamStatus::PausedExternal);
        assert!(!manager.allows_traffic(input.clone()).await.unwrap());

        // The output side is untouched.
        let output = key("http://partner.example", StreamDirection::Output);
        assert!(manager.allows_traffic(output).await.unwrap());

        // Only the partner can lift its own pause.
        let err = manager
            .set_status(input.clone(), StreamStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Precondition(_)));

        let stream = manager
            .apply_remote_status(notice(StreamStatus::Active))
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::Active);
        assert!(manager.allows_traffic(input).await.unwrap());
    }

    #[tokio::test]
    async fn remote_resume_does_not_override_local_pause() {
        let partner = RecordingPartner::start(StatusCode::OK).await;
        let (_file, manager) = seeded(&partner.base_url);
        let input = key(&partner.base_url, StreamDirection::Input);
        manager.set_status(input.clone(), StreamStatus::Paused).await.unwrap();

        for status in [StreamStatus::Active, StreamStatus::Paused] {
            let stream = manager
                .apply_remote_status(StreamStatusNotice {
                    endpoint: partner.base_url.clone(),
                    ..notice(status)
                })
                .await
                .unwrap();
            assert_eq!(stream.status, StreamStatus::Paused);
        }
    }

    #[tokio::test]
    async fn remote_pause_during_local_pause_blocks_local_resume() {
        let partner = RecordingPartner::start(StatusCode::OK).await;
        let (_file, manager) = seeded(&partner.base_url);
        let input = key(&partner.base_url, StreamDirection::Input);
        let from_partner = |status| StreamStatusNotice {
            endpoint: partner.base_url.clone(),
            ..notice(status)
        };

        manager.set_status(input.clone(), StreamStatus::Paused).await.unwrap();

        let stream = manager
            .apply_remote_status(from_partner(StreamStatus::Paused))
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::Paused);
        assert!(stream.remote_paused);

        // Our resume is announced, but the partner's pause still holds.
        let stream = manager
            .set_status(input.clone(), StreamStatus::Active)
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::PausedExternal);
        assert!(!manager.allows_traffic(input.clone()).await.unwrap());
        let calls = partner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1["stream"]["status"], "active");

        let err = manager
            .set_status(input.clone(), StreamStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Precondition(_)));

        let stream = manager
            .apply_remote_status(from_partner(StreamStatus::Active))
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::Active);
        assert!(!stream.remote_paused);
        assert!(manager.allows_traffic(input).await.unwrap());
    }

    #[tokio::test]
    async fn remote_resume_during_local_pause_clears_flag_only() {
        let partner = RecordingPartner::start(StatusCode::OK).await;
        let (_file, manager) = seeded(&partner.base_url);
        let input = key(&partner.base_url, StreamDirection::Input);

        // Partner pauses first, then lifts it while we are paused too.
        manager
            .apply_remote_status(StreamStatusNotice {
                endpoint: partner.base_url.clone(),
                ..notice(StreamStatus::Paused)
            })
            .await
            .unwrap();
        let stream = manager
            .apply_remote_status(StreamStatusNotice {
                endpoint: partner.base_url.clone(),
                ..notice(StreamStatus::Active)
            })
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::Active);

        manager.set_status(input.clone(), StreamStatus::Paused).await.unwrap();
        manager
            .apply_remote_status(StreamStatusNotice {
                endpoint: partner.base_url.clone(),
                ..notice(StreamStatus::Paused)
            })
            .await
            .unwrap();
        let stream = manager
            .apply_remote_status(StreamStatusNotice {
                endpoint: partner.base_url.clone(),
                ..notice(StreamStatus::Active)
            })
            .await
            .unwrap();
        assert_eq!(stream.status, StreamStatus::Paused);
        assert!(!stream.remote_paused);

        let stream = manager.set_status(input.clone(), StreamStatus::Active).await.unwrap();
        assert_eq!(stream.status, StreamStatus::Active);
        assert!(manager.allows_traffic(input).await.unwrap());
    }

    #[tokio::test]
    async fn remote_notice_validation() {
        let (_file, manager) = seeded("http://partner.example");

        let err = manager
            .apply_remote_status(notice(StreamStatus::PausedExternal))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Validation(_)));

        let err = manager
            .apply_remote_status(StreamStatusNotice {
                endpoint: "http://stranger.example".to_string(),
                ..notice(StreamStatus::Paused)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound(_)));
    }

    #[tokio::test]
    async fn connections_group_both_directions() {
        let (_file, manager) = seeded("http://partner.example");
        let connections = manager.list_connections().await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].input.len(), 1);
        assert_eq!(connections[0].output.len(), 1);

        let streams = manager
            .list_streams(Some("http://partner.example/".to_string()))
            .await
            .unwrap();
        assert_eq!(streams.len(), 2);
        assert!(manager
            .list_streams(Some("http://other.example".to_string()))
            .await
            .unwrap()
            .is_empty());
    }
}
