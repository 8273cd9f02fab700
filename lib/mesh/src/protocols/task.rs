// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Task and worker-registration payloads.

use serde::{Deserialize, Serialize};

use super::{ModelCapability, TaskType, WorkerStatus};

/// What a client sends to `POST /task` (and what the coordinator forwards
/// to a worker's `/execute`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Generated server-side when absent.
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub prompt: String,
    /// Routing hint; absent means no type constraint.
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    /// Request a specific model by name. Beats the type hint in routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
}

/// Full response for non-streamed tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub content: String,
    /// Worker that actually served the request; stamped by the coordinator.
    #[serde(default)]
    pub routed_to: String,
    /// Which model ran this, as reported by the worker.
    #[serde(default)]
    pub model_used: String,
    /// Echoed back so the client knows how the task was routed.
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One streamed token, enriched by the coordinator on the way through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskChunk {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub routed_to: String,
    /// Total task latency; set only on the terminal chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

/// Sent by a worker agent to `POST /register` on startup (and again
/// whenever a heartbeat is rejected with 404).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: String,
    /// Hostname/IP the agent is reachable at. The coordinator always dials
    /// this declared address.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub agent_port: u16,
    /// Port of the generation backend the agent proxies to.
    #[serde(default)]
    pub backend_port: u16,
    /// Flat model-name list, kept for callers without a capability map.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<ModelCapability>,
    #[serde(default)]
    pub status: WorkerStatus,
}

/// Sent every few seconds from worker to coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default)]
    pub active_tasks: u32,
}

/// How the registry stores a connected worker. Snapshots of this row are
/// what `/status` and the dashboard see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub host: String,
    pub agent_port: u16,
    pub backend_port: u16,
    pub models: Vec<String>,
    pub capabilities: Vec<ModelCapability>,
    pub status: WorkerStatus,
    pub active_tasks: u32,
    pub last_heartbeat_ms: i64,
    pub registered_at_ms: i64,
}

impl WorkerInfo {
    /// Base URL of the worker's agent endpoint.
    pub fn agent_url(&self) -> String {
        format!("http://{}:{}", self.host, self.agent_port)
    }
}
