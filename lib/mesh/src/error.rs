// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mesh error taxonomy.
//!
//! Transport, decode, and worker failures are consumed inside the router's
//! failover loop and never reach clients directly; the remaining kinds map
//! onto HTTP statuses in one place via [`IntoResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::protocols::TaskType;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Malformed or incomplete client input.
    #[error("{0}")]
    BadRequest(String),

    /// Every routing tier came up empty after exclusions.
    #[error("no worker available for type={task_type} model={model_hint:?} (tried {tried})")]
    NoWorker {
        task_type: TaskType,
        model_hint: Option<String>,
        /// Workers excluded by the failover loop before giving up.
        tried: usize,
    },

    /// Connect/read/write/timeout failure talking to a worker. Retryable.
    #[error("worker unreachable: {0}")]
    Transport(String),

    /// The worker answered with something that is not a valid result.
    /// Fatal for the attempt, still retryable via failover.
    #[error("malformed worker response: {0}")]
    Decode(String),

    /// The worker executed the task and reported `success = false`.
    #[error("worker reported failure: {0}")]
    WorkerFailure(String),

    /// The client went away; terminates silently.
    #[error("request cancelled")]
    Cancelled,

    /// Heartbeat from a worker the registry has never seen.
    #[error("unknown node, please re-register")]
    UnknownWorker,
}

impl MeshError {
    /// Whether the failover loop may try another worker after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshError::Transport(_) | MeshError::Decode(_) | MeshError::WorkerFailure(_)
        )
    }
}

impl IntoResponse for MeshError {
    fn into_response(self) -> Response {
        let status = match &self {
            MeshError::BadRequest(_) => StatusCode::BAD_REQUEST,
            MeshError::NoWorker { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MeshError::UnknownWorker => StatusCode::NOT_FOUND,
            // The client is gone; the status is never observed.
            MeshError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            MeshError::Transport(_) | MeshError::Decode(_) | MeshError::WorkerFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (MeshError::BadRequest("prompt is required".into()), 400),
            (
                MeshError::NoWorker {
                    task_type: TaskType::Code,
                    model_hint: None,
                    tried: 2,
                },
                503,
            ),
            (MeshError::UnknownWorker, 404),
            (MeshError::Transport("connection refused".into()), 500),
        ];
        for (err, expected) in cases {
            let resp = err.into_response();
            assert_eq!(resp.status().as_u16(), expected);
        }
    }

    #[test]
    fn retryable_kinds() {
        assert!(MeshError::Transport("x".into()).is_retryable());
        assert!(MeshError::Decode("x".into()).is_retryable());
        assert!(MeshError::WorkerFailure("x".into()).is_retryable());
        assert!(!MeshError::Cancelled.is_retryable());
        assert!(!MeshError::BadRequest("x".into()).is_retryable());
    }
}
