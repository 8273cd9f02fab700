// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide tracing setup.
//!
//! Filters come from the `MESH_LOG` environment variable (standard
//! `EnvFilter` syntax, default `info`). Output is human-readable by
//! default; set `MESH_LOG_JSONL=1` for line-delimited JSON.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to set the log filter.
const FILTER_ENV: &str = "MESH_LOG";

/// ENV that switches output to JSONL.
const JSONL_ENV: &str = "MESH_LOG_JSONL";

/// Default log level when `MESH_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Install the global subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let jsonl = std::env::var(JSONL_ENV).map(|v| v == "1").unwrap_or(false);
        if jsonl {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    });
}
