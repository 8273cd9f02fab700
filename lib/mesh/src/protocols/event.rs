// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mesh events pushed to dashboard subscribers. Events are advisory: they
//! may race slightly ahead of or behind the registry state a later snapshot
//! query would observe.

use serde::{Deserialize, Serialize};

use super::{
    epoch_ms, ModelCapability, PipelineResult, TaskResult, TaskType, WorkerInfo, WorkerStatus,
};

/// Maximum prompt length carried in a `task_routed` event.
const PROMPT_PREVIEW_CHARS: usize = 120;

/// Maximum content length carried in a `task_done` event.
const CONTENT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskRouted,
    TaskDone,
    NodeRegistered,
    NodeStatus,
    PipelineStarted,
    PipelineDone,
    Stats,
}

/// One event on the dashboard push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp_ms: i64,
    pub data: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Task(TaskEvent),
    Node(NodeEvent),
    Pipeline(PipelineEvent),
    Stats(StatsEvent),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub routed_to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_used: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeEvent {
    pub worker_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub agent_port: u16,
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default)]
    pub active_tasks: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<ModelCapability>,
}

fn is_zero_port(port: &u16) -> bool {
    *port == 0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub pipeline_id: String,
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rolling coordinator counters for the dashboard stat tiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsEvent {
    pub total_tasks: u64,
    pub total_pipelines: u64,
    pub avg_latency_ms: f64,
    pub uptime_s: u64,
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

impl MeshEvent {
    fn now(kind: EventKind, data: EventPayload) -> Self {
        Self {
            kind,
            timestamp_ms: epoch_ms(),
            data,
        }
    }

    pub fn task_routed(task_id: &str, task_type: TaskType, routed_to: &str, prompt: &str) -> Self {
        Self::now(
            EventKind::TaskRouted,
            EventPayload::Task(TaskEvent {
                task_id: task_id.to_string(),
                task_type,
                routed_to: routed_to.to_string(),
                prompt: truncate_chars(prompt, PROMPT_PREVIEW_CHARS),
                ..Default::default()
            }),
        )
    }

    pub fn task_done(result: &TaskResult) -> Self {
        Self::now(
            EventKind::TaskDone,
            EventPayload::Task(TaskEvent {
                task_id: result.task_id.clone(),
                task_type: result.task_type,
                routed_to: result.routed_to.clone(),
                model_used: result.model_used.clone(),
                content: truncate_chars(&result.content, CONTENT_PREVIEW_CHARS),
                latency_ms: Some(result.latency_ms),
                success: Some(result.success),
                error: result.error.clone(),
                ..Default::default()
            }),
        )
    }

    pub fn node_registered(worker: &WorkerInfo) -> Self {
        Self::now(
            EventKind::NodeRegistered,
            EventPayload::Node(NodeEvent {
                worker_id: worker.worker_id.clone(),
                host: worker.host.clone(),
                agent_port: worker.agent_port,
                status: worker.status,
                active_tasks: worker.active_tasks,
                models: worker.models.clone(),
                capabilities: worker.capabilities.clone(),
            }),
        )
    }

    pub fn node_status(worker_id: &str, status: WorkerStatus, active_tasks: u32) -> Self {
        Self::now(
            EventKind::NodeStatus,
            EventPayload::Node(NodeEvent {
                worker_id: worker_id.to_string(),
                status,
                active_tasks,
                ..Default::default()
            }),
        )
    }

    pub fn pipeline_started(pipeline_id: &str, total_steps: usize) -> Self {
        Self::now(
            EventKind::PipelineStarted,
            EventPayload::Pipeline(PipelineEvent {
                pipeline_id: pipeline_id.to_string(),
                total_steps,
                ..Default::default()
            }),
        )
    }

    pub fn pipeline_done(result: &PipelineResult) -> Self {
        Self::now(
            EventKind::PipelineDone,
            EventPayload::Pipeline(PipelineEvent {
                pipeline_id: result.pipeline_id.clone(),
                total_steps: result.total_steps,
                latency_ms: Some(result.latency_ms),
                success: Some(result.success),
                error: result.error.clone(),
            }),
        )
    }

    pub fn stats(stats: StatsEvent) -> Self {
        Self::now(EventKind::Stats, EventPayload::Stats(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_shape() {
        let evt = MeshEvent::task_routed("t1", TaskType::Code, "worker-a", "write a parser");
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "task_routed");
        assert_eq!(json["data"]["task_id"], "t1");
        assert_eq!(json["data"]["routed_to"], "worker-a");
        assert!(json["timestamp_ms"].as_i64().unwrap() > 0);
    }

    #[test]
    fn prompt_preview_is_truncated() {
        let long = "x".repeat(500);
        let evt = MeshEvent::task_routed("t1", TaskType::Any, "w", &long);
        let EventPayload::Task(task) = &evt.data else {
            panic!("expected task payload");
        };
        assert_eq!(task.prompt.chars().count(), PROMPT_PREVIEW_CHARS + 1);
        assert!(task.prompt.ends_with('…'));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(300);
        let out = truncate_chars(&s, CONTENT_PREVIEW_CHARS);
        assert_eq!(out.chars().count(), CONTENT_PREVIEW_CHARS + 1);
    }
}
