//! Administrator API: submit and decide connection requests, inspect and
//! toggle streams.

use crate::{api::ApiError, AppState};
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_exchange::{
    ConnectionRequest, CreateConnectionRequest, PartnerConnection, Stream, StreamKey,
};
use tether_types::{RequestDirection, StreamDirection, StreamStatus};

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    /// `incoming` or `submitted`; both when absent.
    pub direction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListStreamsQuery {
    pub endpoint: Option<String>,
}

/// Body of `PUT /api/streams/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStreamStatusBody {
    pub endpoint: String,
    #[serde(default)]
    pub namespace: String,
    pub format: String,
    pub direction: StreamDirection,
    pub status: StreamStatus,
}

#[derive(Debug, Deserialize)]
pub struct GateQuery {
    pub endpoint: String,
    #[serde(default)]
    pub namespace: String,
    pub format: String,
    pub direction: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GateResponse {
    pub open: bool,
}

fn parse_direction(raw: &str) -> Result<RequestDirection, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

/// Handler for `POST /api/connection-requests`.
pub async fn create_connection_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionRequest>), ApiError> {
    let record = state.handshake.create(payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Handler for `GET /api/connection-requests`.
pub async fn list_connection_requests_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<ConnectionRequest>>, ApiError> {
    let records = match query.direction.as_deref() {
        Some(raw) => state.handshake.list(parse_direction(raw)?).await?,
        None => {
            let mut all = state.handshake.list(RequestDirection::Incoming).await?;
            all.extend(state.handshake.list(RequestDirection::Submitted).await?);
            all.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
            all
        }
    };
    Ok(Json(records))
}

/// Handler for `GET /api/connection-requests/{direction}/{id}`.
pub async fn get_connection_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((direction, id)): Path<(String, String)>,
) -> Result<Json<ConnectionRequest>, ApiError> {
    let direction = parse_direction(&direction)?;
    Ok(Json(state.handshake.get(direction, &id).await?))
}

/// Handler for `POST /api/connection-requests/incoming/{id}/decision`.
pub async fn decide_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<ConnectionRequest>, ApiError> {
    Ok(Json(state.handshake.decide(&id, body.accepted).await?))
}

/// Handler for `GET /api/connections`.
pub async fn list_connections_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<PartnerConnection>>, ApiError> {
    Ok(Json(state.streams.list_connections().await?))
}

/// Handler for `GET /api/streams`.
pub async fn list_streams_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListStreamsQuery>,
) -> Result<Json<Vec<Stream>>, ApiError> {
    Ok(Json(state.streams.list_streams(query.endpoint).await?))
}

/// Handler for `PUT /api/streams/status`.
pub async fn set_stream_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SetStreamStatusBody>,
) -> Result<Json<Stream>, ApiError> {
    let key = StreamKey {
        endpoint: body.endpoint,
        namespace: body.namespace,
        format: body.format,
        direction: body.direction,
    };
    Ok(Json(state.streams.set_status(key, body.status).await?))
}

/// Handler for `GET /api/streams/gate`, queried by the ingestion pipeline
/// before it forwards data on a stream.
pub async fn stream_gate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<GateQuery>,
) -> Result<Json<GateResponse>, ApiError> {
    let direction: StreamDirection = query.direction.parse().map_err(ApiError::BadRequest)?;
    let key = StreamKey {
        endpoint: query.endpoint,
        namespace: query.namespace,
        format: query.format,
        direction,
    };
    let open = state.streams.allows_traffic(key).await?;
    Ok(Json(GateResponse { open }))
}
