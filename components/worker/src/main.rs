// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The worker agent runs next to each generation backend. It registers
//! with the coordinator on startup, heartbeats every few seconds, and
//! executes the tasks the coordinator forwards to it.

mod backend;
mod capabilities;
mod server;

use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mesh_core::discovery;
use mesh_core::logging;
use mesh_core::protocols::{HeartbeatRequest, ModelCapability, RegisterRequest, WorkerStatus};
use tokio_util::sync::CancellationToken;

use backend::GenerationBackend;

/// How often the agent reports in.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Backoff between registration attempts while the coordinator is down.
const REGISTER_RETRY: Duration = Duration::from_secs(3);

/// `active_tasks` at or above this is reported as `busy`.
const BUSY_THRESHOLD: i64 = 5;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unique worker id (default: {hostname}-{port})
    #[arg(long)]
    id: Option<String>,

    /// Port this agent listens on
    #[arg(long, default_value = "9001")]
    port: u16,

    /// Hostname/IP this agent is reachable at (default: auto-detect)
    #[arg(long)]
    host: Option<String>,

    /// Generation backend hostname (for Docker: the service name)
    #[arg(long, default_value = "localhost")]
    backend_host: String,

    /// Generation backend port
    #[arg(long, default_value = "11434")]
    backend_port: u16,

    /// Per-generation ceiling in seconds
    #[arg(long, default_value = "180")]
    backend_timeout_secs: u64,

    /// Comma-separated model names
    #[arg(long, default_value = "mistral")]
    models: String,

    /// Model capabilities, e.g. "mistral:text,summarize;codellama:code"
    #[arg(long, default_value = "")]
    capabilities: String,

    /// Coordinator URL ('auto' = discovery chain)
    #[arg(long, default_value = "auto")]
    coordinator: String,
}

/// Shared agent state: identity, declared models, backend client, and the
/// live task counter the heartbeat loop reports.
pub struct AgentState {
    pub worker_id: String,
    pub host: String,
    pub port: u16,
    pub backend_port: u16,
    pub coordinator_url: String,
    pub models: Vec<String>,
    pub capabilities: Vec<ModelCapability>,
    pub backend: GenerationBackend,
    pub active_tasks: AtomicI64,
}

impl AgentState {
    fn reported_load(&self) -> (WorkerStatus, u32) {
        let active = self
            .active_tasks
            .load(std::sync::atomic::Ordering::Relaxed)
            .max(0);
        let status = if active >= BUSY_THRESHOLD {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        };
        (status, active as u32)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let models: Vec<String> = args
        .models
        .split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    let caps = capabilities::parse_capabilities(&args.capabilities, &models);
    for cap in &caps {
        tracing::info!(model = %cap.name, types = ?cap.types, "declared capability");
    }

    let host = args.host.unwrap_or_else(preferred_outbound_ip);
    let worker_id = args.id.unwrap_or_else(|| {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
        format!("{hostname}-{}", args.port)
    });
    let coordinator_url = discovery::resolve_coordinator_url(&args.coordinator);

    let state = Arc::new(AgentState {
        worker_id,
        host,
        port: args.port,
        backend_port: args.backend_port,
        coordinator_url,
        models,
        capabilities: caps,
        backend: GenerationBackend::new(
            &args.backend_host,
            args.backend_port,
            Duration::from_secs(args.backend_timeout_secs),
        )?,
        active_tasks: AtomicI64::new(0),
    });
    tracing::info!(
        worker = %state.worker_id,
        agent_port = state.port,
        backend_port = state.backend_port,
        coordinator = %state.coordinator_url,
        "agent starting"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal.cancel();
        }
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    // Register (retrying until the coordinator is up), then keep the
    // heartbeat loop running alongside the HTTP server.
    register_with_retry(&client, &state, &shutdown).await;
    tokio::spawn(heartbeat_loop(
        client.clone(),
        state.clone(),
        shutdown.clone(),
    ));

    server::serve(state, shutdown).await
}

fn register_request(state: &AgentState) -> RegisterRequest {
    RegisterRequest {
        worker_id: state.worker_id.clone(),
        host: state.host.clone(),
        agent_port: state.port,
        backend_port: state.backend_port,
        models: state.models.clone(),
        capabilities: state.capabilities.clone(),
        status: WorkerStatus::Idle,
    }
}

async fn register_with_retry(
    client: &reqwest::Client,
    state: &Arc<AgentState>,
    shutdown: &CancellationToken,
) {
    let url = format!("{}/register", state.coordinator_url);
    loop {
        let outcome = client
            .post(&url)
            .json(&register_request(state))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match outcome {
            Ok(_) => {
                tracing::info!(worker = %state.worker_id, "registered with coordinator");
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "coordinator not ready, retrying");
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(REGISTER_RETRY) => {}
        }
    }
}

/// Report load every few seconds. Any failure (a network blip, or the 404
/// a restarted coordinator answers with) triggers re-registration.
async fn heartbeat_loop(
    client: reqwest::Client,
    state: Arc<AgentState>,
    shutdown: CancellationToken,
) {
    let url = format!("{}/heartbeat", state.coordinator_url);
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let (status, active_tasks) = state.reported_load();
        let outcome = client
            .post(&url)
            .json(&HeartbeatRequest {
                worker_id: state.worker_id.clone(),
                status,
                active_tasks,
            })
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        if let Err(err) = outcome {
            tracing::warn!(%err, "heartbeat failed, re-registering");
            register_with_retry(&client, &state, &shutdown).await;
        }
    }
}

/// Best local address for cross-host reachability: the source address of
/// an outbound route. No packets are sent.
fn preferred_outbound_ip() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
