// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Load-aware worker selection with explicit failover.
//!
//! Selection itself lives in the registry ([`WorkerRegistry::find_best`]);
//! this module owns the retry loop around it: dispatch, suspect-mark on
//! failure, exclude, reselect. The loop is iterative with a mutable
//! exclusion set, so stack depth never depends on mesh size.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::MeshError;
use crate::events::EventHub;
use crate::forwarder::{ChunkStream, ForwardError, Forwarder};
use crate::protocols::{TaskChunk, TaskRequest, TaskResult, WorkerInfo};
use crate::registry::WorkerRegistry;

pub struct TaskRouter {
    registry: Arc<WorkerRegistry>,
    forwarder: Arc<dyn Forwarder>,
    hub: Arc<EventHub>,
    task_timeout: Duration,
}

/// Holds one unit of load on a worker for the duration of a dispatch.
/// Dropping releases it, so cancellation and early returns cannot leak
/// `active_tasks`.
struct LoadGuard {
    registry: Arc<WorkerRegistry>,
    worker_id: String,
}

impl LoadGuard {
    fn acquire(registry: Arc<WorkerRegistry>, worker_id: &str) -> Self {
        registry.increment_load(worker_id);
        Self {
            registry,
            worker_id: worker_id.to_string(),
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.registry.decrement_load(&self.worker_id);
    }
}

impl TaskRouter {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        forwarder: Arc<dyn Forwarder>,
        hub: Arc<EventHub>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            forwarder,
            hub,
            task_timeout,
        }
    }

    /// Execute a unary task, failing over across workers until one
    /// succeeds or no candidate remains.
    ///
    /// On success the result is stamped with the routed worker, the task
    /// type, and the total latency across all attempts.
    pub async fn execute(&self, mut request: TaskRequest) -> Result<TaskResult, MeshError> {
        if request.task_id.is_empty() {
            request.task_id = Uuid::new_v4().to_string();
        }

        let started = Instant::now();
        let mut excluded: HashSet<String> = HashSet::new();

        loop {
            let Some(worker) =
                self.registry
                    .find_best(request.task_type, request.model_hint.as_deref(), &excluded)
            else {
                tracing::warn!(
                    task = %request.task_id,
                    task_type = %request.task_type,
                    tried = excluded.len(),
                    "no worker available"
                );
                return Err(MeshError::NoWorker {
                    task_type: request.task_type,
                    model_hint: request.model_hint.clone(),
                    tried: excluded.len(),
                });
            };

            tracing::info!(
                task = %request.task_id,
                task_type = %request.task_type,
                worker = %worker.worker_id,
                attempt = excluded.len() + 1,
                "dispatching task"
            );
            if excluded.is_empty() {
                self.hub.emit_task_routed(
                    &request.task_id,
                    request.task_type,
                    &worker.worker_id,
                    &request.prompt,
                );
            }

            match self.attempt(&worker, &request).await {
                Ok(mut result) => {
                    result.task_id = request.task_id.clone();
                    result.routed_to = worker.worker_id.clone();
                    result.task_type = request.task_type;
                    result.latency_ms = started.elapsed().as_millis() as i64;
                    result.success = true;
                    result.error = None;
                    self.hub.emit_task_done(&result);
                    return Ok(result);
                }
                Err(err) => {
                    tracing::warn!(
                        task = %request.task_id,
                        worker = %worker.worker_id,
                        %err,
                        "attempt failed, trying failover"
                    );
                    self.registry.mark_suspect(&worker.worker_id);
                    excluded.insert(worker.worker_id);
                }
            }
        }
    }

    /// One dispatch to one worker, holding its load for the duration.
    /// Timeouts count as transport errors; a worker-reported failure is an
    /// error here so the caller fails over.
    async fn attempt(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<TaskResult, MeshError> {
        let _load = LoadGuard::acquire(self.registry.clone(), &worker.worker_id);

        let outcome = tokio::time::timeout(
            self.task_timeout,
            self.forwarder.forward(worker, request),
        )
        .await;

        let result = match outcome {
            Err(_) => {
                return Err(MeshError::Transport(format!(
                    "task deadline exceeded after {:?}",
                    self.task_timeout
                )))
            }
            Ok(Err(ForwardError::Transport(msg))) => return Err(MeshError::Transport(msg)),
            Ok(Err(ForwardError::Decode(msg))) => return Err(MeshError::Decode(msg)),
            Ok(Ok(result)) => result,
        };

        if !result.success {
            return Err(MeshError::WorkerFailure(
                result
                    .error
                    .unwrap_or_else(|| "worker returned success=false".to_string()),
            ));
        }
        Ok(result)
    }

    /// Streaming path: select once, no failover. Once bytes have reached
    /// the client a retry would splice two generations together, so
    /// transport loss mid-stream simply ends the stream without a
    /// terminal `done` chunk.
    ///
    /// The returned stream carries the worker's load for its entire
    /// lifetime and enriches every chunk with the routed worker; the
    /// terminal chunk gets the total latency.
    pub async fn execute_stream(
        &self,
        mut request: TaskRequest,
    ) -> Result<(WorkerInfo, ChunkStream), MeshError> {
        if request.task_id.is_empty() {
            request.task_id = Uuid::new_v4().to_string();
        }

        let worker = self
            .registry
            .find_best(request.task_type, request.model_hint.as_deref(), &HashSet::new())
            .ok_or(MeshError::NoWorker {
                task_type: request.task_type,
                model_hint: request.model_hint.clone(),
                tried: 0,
            })?;

        tracing::info!(
            task = %request.task_id,
            task_type = %request.task_type,
            worker = %worker.worker_id,
            "dispatching stream task"
        );
        self.hub.emit_task_routed(
            &request.task_id,
            request.task_type,
            &worker.worker_id,
            &request.prompt,
        );

        let started = Instant::now();
        let load = LoadGuard::acquire(self.registry.clone(), &worker.worker_id);

        let upstream = match self.forwarder.forward_stream(&worker, &request).await {
            Ok(stream) => stream,
            Err(ForwardError::Transport(msg)) => return Err(MeshError::Transport(msg)),
            Err(ForwardError::Decode(msg)) => return Err(MeshError::Decode(msg)),
        };

        let worker_id = worker.worker_id.clone();
        let task_id = request.task_id.clone();
        let enriched: ChunkStream = Box::pin(async_stream::stream! {
            // Moved in so the load is held until the stream is dropped.
            let _load = load;
            let mut upstream = upstream;
            while let Some(item) = futures::StreamExt::next(&mut upstream).await {
                match item {
                    Ok(mut chunk) => {
                        chunk.task_id = task_id.clone();
                        chunk.routed_to = worker_id.clone();
                        if chunk.done {
                            chunk.latency_ms = Some(started.elapsed().as_millis() as i64);
                        }
                        let done = chunk.done;
                        yield Ok::<TaskChunk, ForwardError>(chunk);
                        if done {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(task = %task_id, worker = %worker_id, %err, "stream failed");
                        yield Err(err);
                        break;
                    }
                }
            }
        });

        Ok((worker, enriched))
    }
}
