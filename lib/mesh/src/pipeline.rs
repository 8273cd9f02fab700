// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline executor: chains tasks across workers.
//!
//! A pipeline is a sequence of steps where each step's output feeds the
//! next step's prompt. Templates are expanded by literal substring
//! replacement over a fixed set of placeholders (no escaping, no
//! recursion, no expression language), and each step rides the normal
//! unary failover path.
//!
//! Example: vision → summarize → code
//!   step 0 (vision):    describe an image    → worker with llava
//!   step 1 (summarize): condense it          → worker with mistral
//!   step 2 (code):      generate code for it → worker with codellama

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::MeshError;
use crate::events::EventHub;
use crate::protocols::{
    PipelineRequest, PipelineResult, PipelineStepResult, TaskRequest,
};
use crate::router::TaskRouter;

pub struct PipelineExecutor {
    router: Arc<TaskRouter>,
    hub: Arc<EventHub>,
    /// Per-task ceiling; the pipeline deadline is one of these per step.
    task_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(router: Arc<TaskRouter>, hub: Arc<EventHub>, task_timeout: Duration) -> Self {
        Self {
            router,
            hub,
            task_timeout,
        }
    }

    /// Run every step in order, threading outputs forward. The first
    /// failing step terminates the pipeline; the result still enumerates
    /// everything that ran. Validation problems surface as
    /// [`MeshError::BadRequest`] before any step is dispatched.
    pub async fn execute(&self, mut req: PipelineRequest) -> Result<PipelineResult, MeshError> {
        if req.steps.is_empty() {
            return Err(MeshError::BadRequest(
                "pipeline must have at least one step".to_string(),
            ));
        }
        if req.initial_input.is_empty() {
            return Err(MeshError::BadRequest("initial_input is required".to_string()));
        }
        if req.pipeline_id.is_empty() {
            req.pipeline_id = Uuid::new_v4().to_string();
        }

        let total_steps = req.steps.len();
        let started = Instant::now();
        let deadline = started + self.task_timeout * total_steps as u32;
        tracing::info!(pipeline = %req.pipeline_id, steps = total_steps, "pipeline started");
        self.hub.emit_pipeline_started(&req.pipeline_id, total_steps);

        let mut steps = Vec::with_capacity(total_steps);
        let mut prev_output = req.initial_input.clone();

        for (index, step) in req.steps.iter().enumerate() {
            let task_id = format!("{}_step_{}", req.pipeline_id, index);
            let step_started = Instant::now();

            let step_error = if Instant::now() >= deadline {
                Some(MeshError::Transport(format!(
                    "pipeline deadline exceeded after {} steps",
                    index
                )))
            } else {
                None
            };

            let outcome = match step_error {
                Some(err) => Err(err),
                None => {
                    let prompt = expand_template(
                        &step.prompt_template,
                        &prev_output,
                        &req.initial_input,
                        index,
                    );
                    tracing::info!(
                        pipeline = %req.pipeline_id,
                        step = index + 1,
                        total = total_steps,
                        task_type = %step.task_type,
                        "pipeline step dispatch"
                    );
                    self.router
                        .execute(TaskRequest {
                            task_id: task_id.clone(),
                            prompt,
                            task_type: step.task_type,
                            model_hint: step.model_hint.clone(),
                        })
                        .await
                }
            };

            match outcome {
                Ok(task_result) => {
                    prev_output = task_result.content.clone();
                    tracing::info!(
                        pipeline = %req.pipeline_id,
                        step = index + 1,
                        worker = %task_result.routed_to,
                        latency_ms = task_result.latency_ms,
                        "pipeline step done"
                    );
                    steps.push(PipelineStepResult {
                        step_index: index,
                        task_id,
                        task_type: step.task_type,
                        routed_to: task_result.routed_to,
                        model_used: task_result.model_used,
                        content: task_result.content,
                        latency_ms: task_result.latency_ms,
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        pipeline = %req.pipeline_id,
                        step = index + 1,
                        %err,
                        "pipeline step failed, aborting"
                    );
                    steps.push(PipelineStepResult {
                        step_index: index,
                        task_id,
                        task_type: step.task_type,
                        latency_ms: step_started.elapsed().as_millis() as i64,
                        success: false,
                        error: Some(err.to_string()),
                        ..Default::default()
                    });
                    let result = PipelineResult {
                        pipeline_id: req.pipeline_id.clone(),
                        steps,
                        final_output: String::new(),
                        total_steps,
                        latency_ms: started.elapsed().as_millis() as i64,
                        success: false,
                        error: Some(format!("step {} failed: {err}", index + 1)),
                    };
                    self.hub.emit_pipeline_done(&result);
                    return Ok(result);
                }
            }
        }

        let result = PipelineResult {
            pipeline_id: req.pipeline_id.clone(),
            steps,
            final_output: prev_output,
            total_steps,
            latency_ms: started.elapsed().as_millis() as i64,
            success: true,
            error: None,
        };
        tracing::info!(
            pipeline = %req.pipeline_id,
            steps = total_steps,
            latency_ms = result.latency_ms,
            "pipeline completed"
        );
        self.hub.emit_pipeline_done(&result);
        Ok(result)
    }
}

/// Replace `{{prev_output}}`, `{{initial_input}}` and `{{step_index}}` by
/// literal substring substitution. An empty template means the previous
/// step's output is the prompt, verbatim.
pub fn expand_template(
    template: &str,
    prev_output: &str,
    initial_input: &str,
    step_index: usize,
) -> String {
    if template.is_empty() {
        return prev_output.to_string();
    }

    let index = step_index.to_string();
    let bindings = [
        ("{{prev_output}}", prev_output),
        ("{{initial_input}}", initial_input),
        ("{{step_index}}", index.as_str()),
    ];

    // Single left-to-right pass: substituted text is never re-scanned, so
    // a placeholder smuggled in through a binding stays literal.
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while !rest.is_empty() {
        let next = bindings
            .iter()
            .filter_map(|(pat, val)| rest.find(pat).map(|pos| (pos, *pat, *val)))
            .min_by_key(|(pos, _, _)| *pos);
        match next {
            Some((pos, pat, val)) => {
                out.push_str(&rest[..pos]);
                out.push_str(val);
                rest = &rest[pos + pat.len()..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}
