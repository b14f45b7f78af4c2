//! Endpoints called by partner instances.

use crate::{api::ApiError, AppState};
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tether_exchange::{DecisionNotice, RegistrationBody, RegistrationReceipt, StreamStatusNotice};

/// Handler for `POST /connections/requests`.
pub async fn register_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<RegistrationBody>,
) -> Result<(StatusCode, Json<RegistrationReceipt>), ApiError> {
    let receipt = state.handshake.register_incoming(body).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Handler for `POST /connections/incoming-requests/accept`.
///
/// Despite the path, this receives both acceptances and rejections.
pub async fn decision_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(notice): Json<DecisionNotice>,
) -> Result<Json<Value>, ApiError> {
    state.handshake.apply_remote_decision(notice).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Handler for `POST /connections/streams/update`.
pub async fn stream_update_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(notice): Json<StreamStatusNotice>,
) -> Result<Json<Value>, ApiError> {
    state.streams.apply_remote_status(notice).await?;
    Ok(Json(json!({ "status": "ok" })))
}
