// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Capability-map parsing and local model resolution.

use mesh_core::protocols::{best_model_for_type, ModelCapability, TaskType};

/// Parse the `--capabilities` flag.
///
/// Format: `mistral:text,summarize;codellama:code`. Each entry is
/// `model:type[,type…]`. `|` is accepted as an alternative entry
/// separator since `;` gets swallowed by some shells. Unparseable entries
/// and unknown type names are skipped.
///
/// An empty flag falls back to declaring every model text- and
/// summarize-capable.
pub fn parse_capabilities(flag: &str, models: &[String]) -> Vec<ModelCapability> {
    if flag.trim().is_empty() {
        return models
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|m| ModelCapability {
                name: m.to_string(),
                types: vec![TaskType::Text, TaskType::Summarize],
            })
            .collect();
    }

    let separator = if !flag.contains(';') && flag.contains('|') {
        '|'
    } else {
        ';'
    };

    let mut caps = Vec::new();
    for entry in flag.split(separator) {
        let Some((model, types)) = entry.trim().split_once(':') else {
            continue;
        };
        let model = model.trim();
        if model.is_empty() {
            continue;
        }
        let types: Vec<TaskType> = types
            .split(',')
            .filter_map(|t| t.trim().parse().ok())
            .collect();
        if types.is_empty() {
            continue;
        }
        caps.push(ModelCapability {
            name: model.to_string(),
            types,
        });
    }
    caps
}

/// Pick the local model for a task: explicit hint, else the first model
/// whose capabilities cover the task type, else the first declared model.
pub fn resolve_model<'a>(
    hint: Option<&'a str>,
    task_type: TaskType,
    caps: &'a [ModelCapability],
    models: &'a [String],
) -> &'a str {
    if let Some(hint) = hint {
        if !hint.is_empty() {
            return hint;
        }
    }
    if task_type != TaskType::Any {
        if let Some(model) = best_model_for_type(caps, task_type) {
            return model;
        }
    }
    models.first().map(String::as_str).unwrap_or("mistral")
}
