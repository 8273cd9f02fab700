// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end ingress tests: a real coordinator on a loopback port, stub
//! workers implementing the agent wire contract, reqwest as the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mesh_core::protocols::{
    ModelCapability, RegisterRequest, TaskChunk, TaskRequest, TaskResult, TaskType, WorkerStatus,
};
use mesh_core::{CoordinatorConfig, HttpService, MeshState};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Coordinator {
    url: String,
    state: Arc<MeshState>,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_coordinator(mut config: CoordinatorConfig) -> Coordinator {
    config.host = "127.0.0.1".to_string();
    let state = MeshState::new(config).unwrap();
    state.spawn_background_loops();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = state.shutdown.clone();
    let service = HttpService::new(state.clone());
    tokio::spawn(service.serve_on(listener, shutdown.clone()));

    Coordinator {
        url: format!("http://{addr}"),
        state,
        shutdown,
        client: reqwest::Client::new(),
    }
}

/// Stub worker implementing the agent contract: echoes prompts back and
/// reports whichever model the request pinned (or its default).
#[derive(Clone)]
struct StubWorker {
    name: &'static str,
    default_model: &'static str,
}

async fn stub_execute(
    State(stub): State<StubWorker>,
    Json(request): Json<TaskRequest>,
) -> Json<TaskResult> {
    let model = request
        .model_hint
        .clone()
        .unwrap_or_else(|| stub.default_model.to_string());
    Json(TaskResult {
        task_id: request.task_id.clone(),
        content: format!("{}:{}", stub.name, request.prompt),
        model_used: model,
        task_type: request.task_type,
        latency_ms: 1,
        success: true,
        ..Default::default()
    })
}

async fn stub_execute_stream(
    State(stub): State<StubWorker>,
    Json(request): Json<TaskRequest>,
) -> ([(axum::http::header::HeaderName, &'static str); 1], String) {
    let mut body = String::new();
    for token in [stub.name, ":", "ok"] {
        let chunk = TaskChunk {
            task_id: request.task_id.clone(),
            token: token.to_string(),
            ..Default::default()
        };
        body.push_str(&serde_json::to_string(&chunk).unwrap());
        body.push('\n');
    }
    let done = TaskChunk {
        task_id: request.task_id.clone(),
        done: true,
        ..Default::default()
    };
    body.push_str(&serde_json::to_string(&done).unwrap());
    body.push('\n');
    ([(axum::http::header::CONTENT_TYPE, "application/x-ndjson")], body)
}

async fn start_stub_worker(name: &'static str, default_model: &'static str) -> SocketAddr {
    let app = Router::new()
        .route("/execute", post(stub_execute))
        .route("/execute/stream", post(stub_execute_stream))
        .with_state(StubWorker {
            name,
            default_model,
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A port that refuses connections: bind a listener, note the port, drop it.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn capability(model: &str, types: &[TaskType]) -> ModelCapability {
    ModelCapability {
        name: model.to_string(),
        types: types.to_vec(),
    }
}

impl Coordinator {
    async fn register(&self, worker_id: &str, agent_port: u16, caps: Vec<ModelCapability>) {
        let response = self
            .client
            .post(format!("{}/register", self.url))
            .json(&RegisterRequest {
                worker_id: worker_id.to_string(),
                host: "127.0.0.1".to_string(),
                agent_port,
                capabilities: caps,
                ..Default::default()
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    async fn submit(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/task", self.url))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capability_routing_picks_the_code_worker() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let a = start_stub_worker("a", "mistral").await;
    let b = start_stub_worker("b", "mistral").await;
    mesh.register(
        "a",
        a.port(),
        vec![capability("mistral", &[TaskType::Text, TaskType::Summarize])],
    )
    .await;
    mesh.register(
        "b",
        b.port(),
        vec![capability("mistral", &[TaskType::Code, TaskType::Text])],
    )
    .await;

    let response = mesh
        .submit(serde_json::json!({"type": "code", "prompt": "x"}))
        .await;
    assert_eq!(response.status(), 200);
    let result: TaskResult = response.json().await.unwrap();
    assert_eq!(result.routed_to, "b");
    assert!(result.success);
    assert_eq!(result.task_type, TaskType::Code);
}

#[tokio::test]
async fn failover_exhaustion_yields_503_then_recovers_via_new_worker() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;

    // The only code-capable worker refuses connections.
    let dead = dead_port().await;
    mesh.register("dead", dead, vec![capability("codellama", &[TaskType::Code])])
        .await;

    let response = mesh
        .submit(serde_json::json!({"type": "code", "prompt": "x"}))
        .await;
    assert_eq!(response.status(), 503);

    // The failed attempt left it suspect.
    let row = &mesh.state.registry.snapshot()[0];
    assert_eq!(row.status, WorkerStatus::Overloaded);

    // A live code worker joins; the same request now lands there.
    let b = start_stub_worker("b", "codellama").await;
    mesh.register("b", b.port(), vec![capability("codellama", &[TaskType::Code])])
        .await;
    let response = mesh
        .submit(serde_json::json!({"type": "code", "prompt": "x"}))
        .await;
    assert_eq!(response.status(), 200);
    let result: TaskResult = response.json().await.unwrap();
    assert_eq!(result.routed_to, "b");
}

#[tokio::test]
async fn failover_retries_onto_a_live_peer() {
    // Tight timeout so the dead dial fails fast.
    let config = CoordinatorConfig {
        task_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let mesh = start_coordinator(config).await;

    let dead = dead_port().await;
    let live = start_stub_worker("live", "mistral").await;
    // Same tier: the dead worker can win the first selection, the live
    // one must absorb the retry.
    mesh.register("a-dead", dead, vec![capability("mistral", &[TaskType::Text])])
        .await;
    mesh.register(
        "b-live",
        live.port(),
        vec![capability("mistral", &[TaskType::Text])],
    )
    .await;

    let response = mesh
        .submit(serde_json::json!({"type": "text", "prompt": "hello"}))
        .await;
    assert_eq!(response.status(), 200);
    let result: TaskResult = response.json().await.unwrap();
    assert_eq!(result.routed_to, "b-live");

    // No load leaked anywhere along the way.
    for row in mesh.state.registry.snapshot() {
        assert_eq!(row.active_tasks, 0);
    }
}

#[tokio::test]
async fn model_hint_beats_type_match() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let a = start_stub_worker("a", "mistral").await;
    let b = start_stub_worker("b", "codellama").await;
    mesh.register("a", a.port(), vec![capability("mistral", &[TaskType::Text])])
        .await;
    mesh.register("b", b.port(), vec![capability("codellama", &[TaskType::Code])])
        .await;

    let response = mesh
        .submit(serde_json::json!({
            "type": "text",
            "prompt": "x",
            "model_hint": "codellama"
        }))
        .await;
    assert_eq!(response.status(), 200);
    let result: TaskResult = response.json().await.unwrap();
    assert_eq!(result.routed_to, "b");
    assert_eq!(result.model_used, "codellama");
}

#[tokio::test]
async fn streaming_chunks_carry_routing_and_final_latency() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let a = start_stub_worker("a", "mistral").await;
    mesh.register("a", a.port(), vec![capability("mistral", &[TaskType::Text])])
        .await;

    let response = mesh
        .client
        .post(format!("{}/task/stream", mesh.url))
        .json(&serde_json::json!({"type": "text", "prompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = response.text().await.unwrap();
    let chunks: Vec<TaskChunk> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.routed_to == "a"));
    let last = chunks.last().unwrap();
    assert!(last.done);
    assert!(last.latency_ms.is_some());
    assert!(chunks[0].latency_ms.is_none());
}

#[tokio::test]
async fn stream_selection_failure_is_503() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let response = mesh
        .client
        .post(format!("{}/task/stream", mesh.url))
        .json(&serde_json::json!({"prompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn pipeline_threads_outputs_between_workers() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let a = start_stub_worker("a", "mistral").await;
    let b = start_stub_worker("b", "mistral").await;
    mesh.register("a", a.port(), vec![capability("mistral", &[TaskType::Text])])
        .await;
    mesh.register(
        "b",
        b.port(),
        vec![capability("mistral", &[TaskType::Summarize])],
    )
    .await;

    let response = mesh
        .client
        .post(format!("{}/pipeline", mesh.url))
        .json(&serde_json::json!({
            "initial_input": "hello",
            "steps": [
                {"type": "text", "prompt_template": "{{initial_input}}"},
                {"type": "summarize", "prompt_template": "Repeat: {{prev_output}}"}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let result: mesh_core::protocols::PipelineResult = response.json().await.unwrap();
    assert!(result.success);
    assert_eq!(result.total_steps, 2);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].routed_to, "a");
    assert_eq!(result.steps[0].content, "a:hello");
    assert_eq!(result.steps[1].routed_to, "b");
    assert_eq!(result.steps[1].content, "b:Repeat: a:hello");
    assert_eq!(result.final_output, "b:Repeat: a:hello");
    assert!(result.steps[1].task_id.ends_with("_step_1"));
}

#[tokio::test]
async fn pipeline_step_failure_returns_500_with_partial_result() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let a = start_stub_worker("a", "mistral").await;
    mesh.register("a", a.port(), vec![capability("mistral", &[TaskType::Text])])
        .await;

    // Second step requires a vision-capable worker; none exists.
    let response = mesh
        .client
        .post(format!("{}/pipeline", mesh.url))
        .json(&serde_json::json!({
            "initial_input": "hello",
            "steps": [
                {"type": "text"},
                {"type": "vision"}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let result: mesh_core::protocols::PipelineResult = response.json().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.total_steps, 2);
    assert_eq!(result.steps.len(), 2);
    assert!(result.steps[0].success);
    assert!(!result.steps[1].success);
    assert_eq!(result.final_output, "");
    assert!(result.error.as_deref().unwrap().starts_with("step 2 failed"));
}

#[tokio::test]
async fn heartbeat_eviction_flips_silent_workers_offline() {
    let config = CoordinatorConfig {
        liveness_window_ms: 300,
        evict_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let mesh = start_coordinator(config).await;
    let a = start_stub_worker("a", "mistral").await;
    mesh.register("a", a.port(), vec![capability("mistral", &[TaskType::Text])])
        .await;

    // Alive right after registration.
    let status: serde_json::Value = mesh
        .client
        .get(format!("{}/status", mesh.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["node_count"], 1);
    assert_eq!(status["nodes"][0]["status"], "idle");

    // No heartbeats: the sweep flips it offline but keeps the row.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let status: serde_json::Value = mesh
        .client
        .get(format!("{}/status", mesh.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["node_count"], 1);
    assert_eq!(status["nodes"][0]["status"], "offline");

    // And routing no longer sees a candidate.
    let response = mesh
        .submit(serde_json::json!({"type": "text", "prompt": "x"}))
        .await;
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn heartbeat_from_stranger_is_ordered_to_reregister() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let response = mesh
        .client
        .post(format!("{}/heartbeat", mesh.url))
        .json(&serde_json::json!({"worker_id": "ghost", "status": "idle", "active_tasks": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert!(response.text().await.unwrap().contains("re-register"));
}

#[tokio::test]
async fn validation_rejects_bad_bodies() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;

    // Empty prompt.
    let response = mesh.submit(serde_json::json!({"prompt": ""})).await;
    assert_eq!(response.status(), 400);

    // Not JSON at all.
    let response = mesh
        .client
        .post(format!("{}/task", mesh.url))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Pipeline with no steps.
    let response = mesh
        .client
        .post(format!("{}/pipeline", mesh.url))
        .json(&serde_json::json!({"steps": [], "initial_input": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Pipeline without initial input.
    let response = mesh
        .client
        .post(format!("{}/pipeline", mesh.url))
        .json(&serde_json::json!({"steps": [{"type": "text"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Registration without a worker id.
    let response = mesh
        .client
        .post(format!("{}/register", mesh.url))
        .json(&serde_json::json!({"agent_port": 9001}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn debug_routing_reports_per_type_selection() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;
    let a = start_stub_worker("a", "mistral").await;
    mesh.register(
        "a",
        a.port(),
        vec![capability("mistral", &[TaskType::Text, TaskType::Summarize])],
    )
    .await;

    let body: serde_json::Value = mesh
        .client
        .get(format!("{}/debug/routing", mesh.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["routing"]["text"], "a (model: mistral)");
    assert_eq!(body["routing"]["code"], "no node available");
    assert_eq!(body["routing"]["any"], "a (model: mistral)");
    assert_eq!(body["nodes"][0]["worker_id"], "a");
}

#[tokio::test]
async fn dashboard_redirect_and_page() {
    let mesh = start_coordinator(CoordinatorConfig::default()).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client
        .get(format!("{}/dashboard", mesh.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(response.headers()["location"], "/dashboard/");

    let response = client
        .get(format!("{}/dashboard/", mesh.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("echo-mesh"));
}
