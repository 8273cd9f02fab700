// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Status and debug surface: `/health`, `/status`, `/debug/routing`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::service::MeshState;
use crate::protocols::{best_model_for_type, epoch_ms, TaskType};

pub fn router(state: Arc<MeshState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/debug/routing", get(debug_routing))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn status(State(state): State<Arc<MeshState>>) -> Json<serde_json::Value> {
    let nodes = state.registry.snapshot();
    Json(json!({
        "nodes": nodes,
        "node_count": nodes.len(),
        "server_time": epoch_ms(),
    }))
}

/// Dry-run: how the next task of each type would be routed right now.
async fn debug_routing(State(state): State<Arc<MeshState>>) -> Json<serde_json::Value> {
    let mut routing = HashMap::new();
    for task_type in TaskType::ALL {
        let entry = match state.registry.find_best(task_type, None, &HashSet::new()) {
            Some(worker) => {
                let model = best_model_for_type(&worker.capabilities, task_type)
                    .unwrap_or("?")
                    .to_string();
                format!("{} (model: {model})", worker.worker_id)
            }
            None => "no node available".to_string(),
        };
        routing.insert(task_type.to_string(), entry);
    }

    Json(json!({
        "routing": routing,
        "nodes": state.registry.snapshot(),
    }))
}
