// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client task endpoints: unary `POST /task` and streaming
//! `POST /task/stream`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::{Stream, StreamExt};

use super::service::MeshState;
use crate::error::MeshError;
use crate::protocols::{TaskRequest, TaskResult};

pub fn router(state: Arc<MeshState>) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/task/stream", post(submit_task_stream))
        .with_state(state)
}

fn decode(body: Result<Json<TaskRequest>, JsonRejection>) -> Result<TaskRequest, MeshError> {
    let Json(request) = body.map_err(|_| MeshError::BadRequest("invalid request body".into()))?;
    if request.prompt.is_empty() {
        return Err(MeshError::BadRequest("prompt is required".into()));
    }
    Ok(request)
}

/// Collects the full response and returns it as JSON. Transport and worker
/// failures are absorbed by failover; the client sees either a result or
/// 503 once every candidate is exhausted.
async fn submit_task(
    State(state): State<Arc<MeshState>>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Json<TaskResult>, MeshError> {
    let request = decode(body)?;
    let result = state.router.execute(request).await?;
    Ok(Json(result))
}

/// Streams chunks back as server-sent events, one JSON [`TaskChunk`] per
/// event, flushed as they arrive. A mid-stream worker failure truncates
/// the stream without a terminal `done` chunk; clients detect this via
/// the connection close.
async fn submit_task_stream(
    State(state): State<Arc<MeshState>>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, MeshError> {
    let request = decode(body)?;
    let (_worker, chunks) = state.router.execute_stream(request).await?;

    let events = chunks.filter_map(|item| async move {
        match item {
            Ok(chunk) => {
                let payload = serde_json::to_string(&chunk).ok()?;
                Some(Ok(Event::default().data(payload)))
            }
            // Ends the SSE stream; the client observes the missing
            // `done = true` terminal chunk.
            Err(_) => None,
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
