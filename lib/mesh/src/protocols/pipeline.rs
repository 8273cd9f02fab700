// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-step pipeline payloads. A pipeline chains tasks across workers:
//! each step's output threads into the next step's prompt template.

use serde::{Deserialize, Serialize};

use super::TaskType;

/// One step of a pipeline. The template may contain the literal
/// placeholders `{{prev_output}}`, `{{initial_input}}` and `{{step_index}}`;
/// an empty template means "use the previous output verbatim".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Routing hint for this step.
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    /// Force a specific model for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    #[serde(default)]
    pub prompt_template: String,
}

/// What a client sends to `POST /pipeline`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Generated server-side when absent.
    #[serde(default)]
    pub pipeline_id: String,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    /// Seed text for the first step.
    #[serde(default)]
    pub initial_input: String,
}

/// Outcome of a single pipeline step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStepResult {
    pub step_index: usize,
    pub task_id: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub routed_to: String,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub latency_ms: i64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full response of `POST /pipeline`. Always enumerates the steps that ran,
/// including the one that failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline_id: String,
    pub steps: Vec<PipelineStepResult>,
    #[serde(default)]
    pub final_output: String,
    pub total_steps: usize,
    pub latency_ms: i64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
