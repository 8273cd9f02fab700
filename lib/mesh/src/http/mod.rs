// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP/JSON ingress: client endpoints (`/task`, `/task/stream`,
//! `/pipeline`), worker endpoints (`/register`, `/heartbeat`), the status
//! and debug surface, the dashboard bundle, and the `/ws` event feed.

mod dashboard;
mod pipeline;
mod service;
mod status;
mod task;
mod worker_api;
mod ws;

pub use service::{HttpService, MeshState};
