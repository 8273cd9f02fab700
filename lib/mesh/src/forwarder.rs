// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Boundary I/O to a worker agent.
//!
//! The [`Forwarder`] trait is the seam between routing logic and the
//! network: production uses [`HttpForwarder`] over a shared reqwest
//! client, tests script in-memory workers. Network failures and malformed
//! responses are surfaced as distinct kinds because both feed the failover
//! loop but mean different things when debugging a worker.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::protocols::{TaskChunk, TaskRequest, TaskResult, WorkerInfo};

#[derive(Debug, Error)]
pub enum ForwardError {
    /// Connect/read/write/timeout failure. Retryable via failover.
    #[error("worker unreachable: {0}")]
    Transport(String),

    /// The worker answered, but not with a decodable result. Fatal for
    /// this attempt, still retryable via failover.
    #[error("malformed worker response: {0}")]
    Decode(String),
}

/// Chunks streamed back from a worker's `/execute/stream`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<TaskChunk, ForwardError>> + Send>>;

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// POST the task to the worker's `/execute` and decode the result.
    async fn forward(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<TaskResult, ForwardError>;

    /// POST to `/execute/stream` and surface the newline-delimited chunk
    /// stream. The stream ends after the `done = true` chunk or on
    /// transport loss.
    async fn forward_stream(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<ChunkStream, ForwardError>;
}

/// Production forwarder over HTTP/JSON. Always dials the worker's declared
/// `{host, agent_port}` recorded at registration.
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// `task_timeout` is the per-task ceiling; it covers the whole
    /// request, including a streaming body.
    pub fn new(task_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(task_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<TaskResult, ForwardError> {
        let url = format!("{}/execute", worker.agent_url());
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ForwardError::Transport(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ForwardError::Transport(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::Transport(format!("{url}: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| ForwardError::Decode(e.to_string()))
    }

    async fn forward_stream(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<ChunkStream, ForwardError> {
        let url = format!("{}/execute/stream", worker.agent_url());
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ForwardError::Transport(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ForwardError::Transport(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buf = BytesMut::new();
            let mut finished = false;
            'read: while let Some(part) = body.next().await {
                let part = match part {
                    Ok(part) => part,
                    Err(err) => {
                        finished = true;
                        yield Err(ForwardError::Transport(err.to_string()));
                        break;
                    }
                };
                buf.extend_from_slice(&part);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    let line = &line[..line.len() - 1];
                    if line.is_empty() {
                        continue;
                    }
                    // Malformed lines are skipped, matching the worker
                    // wire contract of one JSON chunk per line.
                    let Ok(chunk) = serde_json::from_slice::<TaskChunk>(line) else {
                        continue;
                    };
                    let done = chunk.done;
                    yield Ok(chunk);
                    if done {
                        finished = true;
                        break 'read;
                    }
                }
            }
            // Whatever is left either parses as a final unterminated line
            // or is dropped.
            if !finished && !buf.is_empty() {
                if let Ok(chunk) = serde_json::from_slice::<TaskChunk>(&buf) {
                    yield Ok(chunk);
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The NDJSON framing logic is exercised end-to-end in the integration
    // suite against a real stub worker; here we only pin down the error
    // classification.
    #[test]
    fn decode_and_transport_are_distinct() {
        let t = ForwardError::Transport("connection refused".into());
        let d = ForwardError::Decode("expected value".into());
        assert!(t.to_string().contains("unreachable"));
        assert!(d.to_string().contains("malformed"));
    }
}
