// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire types shared by the coordinator, the worker agents, and dashboard
//! subscribers. Everything here is plain serde JSON; field names are the
//! mesh wire contract and must not change casually.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod event;
mod pipeline;
mod task;

pub use event::{
    EventKind, EventPayload, MeshEvent, NodeEvent, PipelineEvent, StatsEvent, TaskEvent,
};
pub use pipeline::{PipelineRequest, PipelineResult, PipelineStep, PipelineStepResult};
pub use task::{
    HeartbeatRequest, RegisterRequest, TaskChunk, TaskRequest, TaskResult, WorkerInfo,
};

/// What kind of work a task requires. Routing treats [`TaskType::Any`]
/// (the unset value, serialized as the empty string) as "no type constraint".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Text,
    Code,
    Vision,
    Summarize,
    Embed,
    #[default]
    #[serde(rename = "", alias = "any")]
    Any,
}

impl TaskType {
    /// Every concrete type plus the wildcard, in the order the debug
    /// routing endpoint reports them.
    pub const ALL: [TaskType; 6] = [
        TaskType::Text,
        TaskType::Code,
        TaskType::Vision,
        TaskType::Summarize,
        TaskType::Embed,
        TaskType::Any,
    ];
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Text => write!(f, "text"),
            TaskType::Code => write!(f, "code"),
            TaskType::Vision => write!(f, "vision"),
            TaskType::Summarize => write!(f, "summarize"),
            TaskType::Embed => write!(f, "embed"),
            TaskType::Any => write!(f, "any"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(TaskType::Text),
            "code" => Ok(TaskType::Code),
            "vision" => Ok(TaskType::Vision),
            "summarize" => Ok(TaskType::Summarize),
            "embed" => Ok(TaskType::Embed),
            "" | "any" => Ok(TaskType::Any),
            other => Err(anyhow::anyhow!("unknown task type: '{other}'")),
        }
    }
}

/// Liveness/load state of a worker as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
    /// Sticky suspect state set after a task failure; cleared by the next
    /// heartbeat that reports idle or busy.
    Overloaded,
    /// No heartbeat inside the liveness window. The row is retained so the
    /// dashboard can still observe the worker.
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Overloaded => write!(f, "overloaded"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// One model a worker serves and the task types it handles.
///
/// ```json
/// {"name": "codellama", "types": ["code"]}
/// {"name": "mistral",   "types": ["text", "summarize"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapability {
    pub name: String,
    pub types: Vec<TaskType>,
}

/// First declared model on a worker that handles the requested task type.
///
/// For [`TaskType::Any`] the first declared model wins; returns `None` when
/// nothing matches.
pub fn best_model_for_type(caps: &[ModelCapability], task_type: TaskType) -> Option<&str> {
    if task_type == TaskType::Any {
        return caps.first().map(|c| c.name.as_str());
    }
    caps.iter()
        .find(|c| c.types.contains(&task_type))
        .map(|c| c.name.as_str())
}

/// Whether the worker has any model that handles task type `t`.
pub fn can_handle(caps: &[ModelCapability], task_type: TaskType) -> bool {
    best_model_for_type(caps, task_type).is_some()
}

/// Current time as milliseconds since the unix epoch, the clock every
/// heartbeat and event timestamp uses.
pub fn epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Vec<ModelCapability> {
        vec![
            ModelCapability {
                name: "mistral".to_string(),
                types: vec![TaskType::Text, TaskType::Summarize],
            },
            ModelCapability {
                name: "codellama".to_string(),
                types: vec![TaskType::Code],
            },
        ]
    }

    #[test]
    fn task_type_wire_format() {
        assert_eq!(serde_json::to_string(&TaskType::Code).unwrap(), "\"code\"");
        assert_eq!(serde_json::to_string(&TaskType::Any).unwrap(), "\"\"");
        assert_eq!(
            serde_json::from_str::<TaskType>("\"any\"").unwrap(),
            TaskType::Any
        );
        assert_eq!(
            serde_json::from_str::<TaskType>("\"\"").unwrap(),
            TaskType::Any
        );
    }

    #[test]
    fn best_model_prefers_declaration_order() {
        let caps = caps();
        assert_eq!(best_model_for_type(&caps, TaskType::Text), Some("mistral"));
        assert_eq!(
            best_model_for_type(&caps, TaskType::Code),
            Some("codellama")
        );
        assert_eq!(best_model_for_type(&caps, TaskType::Any), Some("mistral"));
        assert_eq!(best_model_for_type(&caps, TaskType::Vision), None);
    }

    #[test]
    fn can_handle_matches_declared_types() {
        let caps = caps();
        assert!(can_handle(&caps, TaskType::Summarize));
        assert!(!can_handle(&caps, TaskType::Embed));
        assert!(!can_handle(&[], TaskType::Any));
    }
}
