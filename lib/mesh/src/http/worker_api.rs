// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker-facing endpoints: `POST /register` and `POST /heartbeat`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use super::service::MeshState;
use crate::error::MeshError;
use crate::protocols::{HeartbeatRequest, RegisterRequest};

pub fn router(state: Arc<MeshState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .with_state(state)
}

async fn register(
    State(state): State<Arc<MeshState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, MeshError> {
    let Json(request) = body.map_err(|_| MeshError::BadRequest("invalid body".into()))?;
    if request.worker_id.is_empty() {
        return Err(MeshError::BadRequest("worker_id is required".into()));
    }
    state.registry.register(request);
    Ok(Json(json!({"status": "registered"})))
}

/// Heartbeats from strangers get 404 with the re-register command in the
/// body; worker agents treat that as an order to run registration again.
async fn heartbeat(
    State(state): State<Arc<MeshState>>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<StatusCode, MeshError> {
    let Json(request) = body.map_err(|_| MeshError::BadRequest("invalid body".into()))?;
    state.registry.heartbeat(request)?;
    Ok(StatusCode::OK)
}
