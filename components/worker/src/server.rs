// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The agent's HTTP surface, called by the coordinator:
//! `POST /execute`, `POST /execute/stream`, `GET /health`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mesh_core::protocols::{TaskChunk, TaskRequest, TaskResult};

use crate::capabilities::resolve_model;
use crate::AgentState;

pub async fn serve(state: Arc<AgentState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let address = format!("0.0.0.0:{}", state.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {address}: {e}"))?;
    tracing::info!(%address, "agent listening");

    let app = Router::new()
        .route("/execute", post(execute))
        .route("/execute/stream", post(execute_stream))
        .route("/health", get(health))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("agent stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Tracks one in-flight task for the heartbeat's load report.
struct TaskCounter(Arc<AgentState>);

impl TaskCounter {
    fn start(state: &Arc<AgentState>) -> Self {
        state.active_tasks.fetch_add(1, Ordering::Relaxed);
        Self(state.clone())
    }
}

impl Drop for TaskCounter {
    fn drop(&mut self) {
        self.0.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Run the prompt against the local backend and answer with a full
/// [`TaskResult`]. Backend failures are reported in-band with
/// `success = false`; the coordinator decides whether to fail over.
async fn execute(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<TaskRequest>,
) -> Json<TaskResult> {
    tracing::info!(worker = %state.worker_id, task = %request.task_id, "executing task");
    let started = Instant::now();
    let _counter = TaskCounter::start(&state);

    let model = resolve_model(
        request.model_hint.as_deref(),
        request.task_type,
        &state.capabilities,
        &state.models,
    )
    .to_string();

    match state.backend.generate(&model, &request.prompt).await {
        Ok(content) => Json(TaskResult {
            task_id: request.task_id,
            content,
            model_used: model,
            task_type: request.task_type,
            latency_ms: started.elapsed().as_millis() as i64,
            success: true,
            ..Default::default()
        }),
        Err(err) => Json(TaskResult {
            task_id: request.task_id,
            success: false,
            error: Some(err.to_string()),
            ..Default::default()
        }),
    }
}

/// Stream tokens back as newline-delimited JSON [`TaskChunk`]s.
async fn execute_stream(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<TaskRequest>,
) -> Response {
    tracing::info!(worker = %state.worker_id, task = %request.task_id, "streaming task");
    let counter = TaskCounter::start(&state);

    let model = resolve_model(
        request.model_hint.as_deref(),
        request.task_type,
        &state.capabilities,
        &state.models,
    )
    .to_string();

    let tokens = match state.backend.generate_stream(&model, &request.prompt).await {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::warn!(worker = %state.worker_id, %err, "backend stream failed to start");
            return (StatusCode::BAD_GATEWAY, err.to_string()).into_response();
        }
    };

    let task_id = request.task_id.clone();
    let body = async_stream::stream! {
        // Held until the stream is dropped so the load report stays true.
        let _counter = counter;
        let mut tokens = tokens;
        while let Some(item) = tokens.next().await {
            match item {
                Ok((token, done)) => {
                    let chunk = TaskChunk {
                        task_id: task_id.clone(),
                        token,
                        done,
                        ..Default::default()
                    };
                    let Ok(mut line) = serde_json::to_vec(&chunk) else {
                        continue;
                    };
                    line.push(b'\n');
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(line));
                    if done {
                        break;
                    }
                }
                Err(err) => {
                    // Mid-stream loss: close without a terminal chunk.
                    tracing::warn!(%err, "backend stream broke");
                    break;
                }
            }
        }
    };

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}
