// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coordinator state and the assembled axum service.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::events::EventHub;
use crate::forwarder::HttpForwarder;
use crate::pipeline::PipelineExecutor;
use crate::registry::WorkerRegistry;
use crate::router::TaskRouter;

/// Everything a handler needs, owned once per process and passed
/// explicitly rather than reached through ambient globals.
pub struct MeshState {
    pub config: CoordinatorConfig,
    pub registry: Arc<WorkerRegistry>,
    pub hub: Arc<EventHub>,
    pub router: Arc<TaskRouter>,
    pub pipelines: Arc<PipelineExecutor>,
    /// Cancelling this stops the eviction sweep, the stats ticker, every
    /// subscriber pump, and the HTTP server itself.
    pub shutdown: CancellationToken,
}

impl MeshState {
    pub fn new(config: CoordinatorConfig) -> anyhow::Result<Arc<Self>> {
        let hub = Arc::new(EventHub::new(config.subscriber_queue));
        let registry = Arc::new(WorkerRegistry::new(
            hub.clone(),
            config.busy_threshold,
            config.liveness_window_ms,
        ));
        let forwarder = Arc::new(HttpForwarder::new(config.task_timeout)?);
        let router = Arc::new(TaskRouter::new(
            registry.clone(),
            forwarder,
            hub.clone(),
            config.task_timeout,
        ));
        let pipelines = Arc::new(PipelineExecutor::new(
            router.clone(),
            hub.clone(),
            config.task_timeout,
        ));

        Ok(Arc::new(Self {
            config,
            registry,
            hub,
            router,
            pipelines,
            shutdown: CancellationToken::new(),
        }))
    }

    /// Spawn the eviction sweep and the stats ticker. Both end when the
    /// shutdown token fires.
    pub fn spawn_background_loops(self: &Arc<Self>) {
        let state = self.clone();
        tokio::spawn(async move {
            state
                .registry
                .run_eviction(state.config.evict_interval, state.shutdown.clone())
                .await;
        });

        let state = self.clone();
        tokio::spawn(async move {
            state
                .hub
                .run_stats_ticker(state.config.stats_interval, state.shutdown.clone())
                .await;
        });
    }
}

/// The assembled ingress.
pub struct HttpService {
    state: Arc<MeshState>,
}

impl HttpService {
    pub fn new(state: Arc<MeshState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<MeshState> {
        self.state.clone()
    }

    /// One merged router over all ingress concerns.
    pub fn into_router(self) -> Router {
        Router::new()
            .merge(super::task::router(self.state.clone()))
            .merge(super::pipeline::router(self.state.clone()))
            .merge(super::worker_api::router(self.state.clone()))
            .merge(super::status::router(self.state.clone()))
            .merge(super::dashboard::router())
            .merge(super::ws::router(self.state.clone()))
    }

    /// Bind on the configured address and serve until the token fires.
    pub async fn serve(self, token: CancellationToken) -> anyhow::Result<()> {
        let address = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {address}: {e}"))?;
        self.serve_on(listener, token).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves).
    pub async fn serve_on(
        self,
        listener: TcpListener,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        let address = listener.local_addr()?;
        tracing::info!(%address, "coordinator listening");

        let app = self.into_router();
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;
        tracing::info!("coordinator stopped");
        Ok(())
    }
}
