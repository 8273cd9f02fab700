// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The coordinator is the brain of the mesh: it accepts tasks from
//! clients, routes them to the best live worker, and feeds the dashboard.

use clap::Parser;
use mesh_core::{discovery, logging, CoordinatorConfig, HttpService, MeshState};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host for the HTTP service
    #[arg(long)]
    host: Option<String>,

    /// Port number for the HTTP service
    #[arg(short, long)]
    port: Option<u16>,

    /// Per-task forward ceiling in seconds
    #[arg(long)]
    task_timeout_secs: Option<u64>,

    /// Advertise the coordinator on the local link via mDNS
    #[arg(long, default_value = "false")]
    enable_mdns: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = CoordinatorConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(secs) = args.task_timeout_secs {
        if secs == 0 {
            anyhow::bail!("task timeout must be greater than 0");
        }
        config.task_timeout = std::time::Duration::from_secs(secs);
    }
    config.enable_mdns = args.enable_mdns;

    let state = MeshState::new(config)?;
    state.spawn_background_loops();

    if state.config.enable_mdns {
        discovery::announce(&state.config.host, state.config.port);
    }

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    HttpService::new(state.clone())
        .serve(state.shutdown.clone())
        .await
}
