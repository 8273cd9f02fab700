// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `POST /pipeline`: multi-step composition.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use super::service::MeshState;
use crate::error::MeshError;
use crate::protocols::PipelineRequest;

pub fn router(state: Arc<MeshState>) -> Router {
    Router::new()
        .route("/pipeline", post(submit_pipeline))
        .with_state(state)
}

/// A pipeline always answers with a full [`PipelineResult`] enumerating
/// completed and failed steps; a step failure downgrades the status to
/// 500 but keeps the body.
async fn submit_pipeline(
    State(state): State<Arc<MeshState>>,
    body: Result<Json<PipelineRequest>, JsonRejection>,
) -> Result<Response, MeshError> {
    let Json(request) =
        body.map_err(|_| MeshError::BadRequest("invalid request body".into()))?;

    let result = state.pipelines.execute(request).await?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(result)).into_response())
}
