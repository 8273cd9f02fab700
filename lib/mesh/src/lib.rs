// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! echo-mesh core: a task-routing mesh for local generative-model
//! workers.
//!
//! The coordinator accepts prompt-style requests over HTTP, picks the
//! best live worker by declared capabilities and current load, forwards
//! the work (unary or streaming), and chains multi-step pipelines,
//! with heartbeat-driven liveness, automatic failover, and a WebSocket
//! event feed for the dashboard.
//!
//! The crate's main seams:
//! - [`registry::WorkerRegistry`]: the worker table and tiered selection
//! - [`router::TaskRouter`]: the failover loop
//! - [`forwarder::Forwarder`]: boundary I/O to worker agents
//! - [`pipeline::PipelineExecutor`]: multi-step orchestration
//! - [`events::EventHub`]: fan-out to dashboard subscribers
//! - [`http::HttpService`]: the assembled ingress

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod protocols;
pub mod registry;
pub mod router;

pub use config::CoordinatorConfig;
pub use error::MeshError;
pub use http::{HttpService, MeshState};
