// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coordinator settings.
//!
//! Every knob has a compiled-in default, can be overridden by a `MESH_*`
//! environment variable, and is surfaced again as a CLI flag by the
//! coordinator binary (flags win over env).

use std::time::Duration;

/// ENV used to override the listen host.
const HOST_ENV: &str = "MESH_HOST";

/// ENV used to override the listen port.
const PORT_ENV: &str = "MESH_PORT";

/// ENV used to override the per-task forward ceiling, in seconds.
const TASK_TIMEOUT_ENV: &str = "MESH_TASK_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,

    /// Per-task forward ceiling. Local generation backends on CPU can be
    /// slow, hence the generous default.
    pub task_timeout: Duration,

    /// `active_tasks` at or above this marks a worker `busy`.
    pub busy_threshold: u32,

    /// A worker silent for this long is `offline`.
    pub liveness_window_ms: i64,

    /// How often the eviction sweep runs.
    pub evict_interval: Duration,

    /// How often a `stats` event is broadcast while subscribers exist.
    pub stats_interval: Duration,

    /// Bounded outbound queue per dashboard subscriber; overflow drops.
    pub subscriber_queue: usize,

    /// Keepalive probe interval on subscriber sockets.
    pub ws_ping_interval: Duration,

    /// Per-message write deadline on subscriber sockets.
    pub ws_write_deadline: Duration,

    /// Advertise the coordinator on the local link. The advertisement
    /// itself lives outside the core; see [`crate::discovery`].
    pub enable_mdns: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            task_timeout: Duration::from_secs(180),
            busy_threshold: 5,
            liveness_window_ms: 15_000,
            evict_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(3),
            subscriber_queue: 64,
            ws_ping_interval: Duration::from_secs(30),
            ws_write_deadline: Duration::from_secs(10),
            enable_mdns: false,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults with `MESH_*` environment overrides applied. Unparseable
    /// values fall back to the default rather than failing startup.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(host) = std::env::var(HOST_ENV) {
            if !host.is_empty() {
                cfg.host = host;
            }
        }
        if let Some(port) = env_parse::<u16>(PORT_ENV) {
            cfg.port = port;
        }
        if let Some(secs) = env_parse::<u64>(TASK_TIMEOUT_ENV) {
            cfg.task_timeout = Duration::from_secs(secs);
        }
        cfg
    }

    /// Upper bound for a whole pipeline: one task ceiling per step.
    pub fn pipeline_timeout(&self, steps: usize) -> Duration {
        self.task_timeout * steps.max(1) as u32
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_mesh_contract() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.busy_threshold, 5);
        assert_eq!(cfg.liveness_window_ms, 15_000);
        assert_eq!(cfg.evict_interval, Duration::from_secs(5));
        assert_eq!(cfg.task_timeout, Duration::from_secs(180));
        assert_eq!(cfg.subscriber_queue, 64);
    }

    #[test]
    fn pipeline_timeout_scales_with_steps() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.pipeline_timeout(3), cfg.task_timeout * 3);
        // A degenerate zero-step request still gets one task's worth.
        assert_eq!(cfg.pipeline_timeout(0), cfg.task_timeout);
    }
}
