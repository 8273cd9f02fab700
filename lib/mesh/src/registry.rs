// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker registry: the single source of truth for liveness, capabilities,
//! and load.
//!
//! One lock guards the table; reads proceed in parallel, mutations are
//! exclusive, and every external view is a deep copy. Liveness is lazy: a
//! row counts as offline the moment its heartbeat is older than the
//! liveness window, whether or not the eviction sweep has flipped its
//! status yet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::MeshError;
use crate::events::EventHub;
use crate::protocols::{
    can_handle, epoch_ms, HeartbeatRequest, RegisterRequest, TaskType, WorkerInfo, WorkerStatus,
};

pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
    hub: Arc<EventHub>,
    busy_threshold: u32,
    liveness_window_ms: i64,
}

impl WorkerRegistry {
    pub fn new(hub: Arc<EventHub>, busy_threshold: u32, liveness_window_ms: i64) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            hub,
            busy_threshold,
            liveness_window_ms,
        }
    }

    // ------------------------------------------------------------------
    // Registration & heartbeat
    // ------------------------------------------------------------------

    /// Upsert by `worker_id`. Re-registration replaces every field
    /// atomically, resets `active_tasks` to 0 and status to `idle`.
    pub fn register(&self, req: RegisterRequest) {
        let now = epoch_ms();
        let host = if req.host.is_empty() {
            "127.0.0.1".to_string()
        } else {
            req.host
        };
        // Derive the flat model list from the capability map when the
        // caller only sent one of the two.
        let models = if req.models.is_empty() {
            req.capabilities.iter().map(|c| c.name.clone()).collect()
        } else {
            req.models
        };

        let info = WorkerInfo {
            worker_id: req.worker_id.clone(),
            host,
            agent_port: req.agent_port,
            backend_port: req.backend_port,
            models,
            capabilities: req.capabilities,
            status: WorkerStatus::Idle,
            active_tasks: 0,
            last_heartbeat_ms: now,
            registered_at_ms: now,
        };

        tracing::info!(
            worker = %info.worker_id,
            host = %info.host,
            agent_port = info.agent_port,
            models = ?info.models,
            "worker registered"
        );
        for cap in &info.capabilities {
            tracing::info!(worker = %info.worker_id, model = %cap.name, types = ?cap.types, "capability");
        }

        self.hub.emit_node_registered(&info);
        self.workers.write().insert(info.worker_id.clone(), info);
    }

    /// Stamp the worker's last-seen time and reported load. Unknown ids
    /// surface [`MeshError::UnknownWorker`], which the ingress turns into
    /// the 404 re-register command.
    ///
    /// Reported `idle`/`busy` is clamped against the reported
    /// `active_tasks` so a worker cannot advertise itself idle while
    /// loaded; `overloaded` is accepted verbatim. Either way a successful
    /// heartbeat clears a suspect mark.
    pub fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), MeshError> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(&req.worker_id)
            .ok_or(MeshError::UnknownWorker)?;

        let status = match req.status {
            WorkerStatus::Overloaded => WorkerStatus::Overloaded,
            _ => self.status_for_load(req.active_tasks),
        };

        worker.last_heartbeat_ms = epoch_ms();
        let changed = worker.status != status || worker.active_tasks != req.active_tasks;
        worker.status = status;
        worker.active_tasks = req.active_tasks;

        if changed {
            let (id, active) = (worker.worker_id.clone(), worker.active_tasks);
            drop(workers);
            self.hub.emit_node_status(&id, status, active);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Load tracking
    // ------------------------------------------------------------------

    /// Bump `active_tasks` around a dispatch. Offline rows are left alone;
    /// a suspect mark is sticky until the next heartbeat, so the busy
    /// threshold only moves rows between `idle` and `busy`.
    pub fn increment_load(&self, worker_id: &str) {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(worker_id) {
            if worker.status == WorkerStatus::Offline {
                return;
            }
            worker.active_tasks += 1;
            self.apply_load_threshold(worker);
        }
    }

    /// Bounded at zero.
    pub fn decrement_load(&self, worker_id: &str) {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(worker_id) {
            if worker.status == WorkerStatus::Offline {
                return;
            }
            worker.active_tasks = worker.active_tasks.saturating_sub(1);
            self.apply_load_threshold(worker);
        }
    }

    /// Mark a worker `overloaded` after a task failure. Not persisted:
    /// the next heartbeat that reports idle or busy overrides it.
    pub fn mark_suspect(&self, worker_id: &str) {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.status = WorkerStatus::Overloaded;
            tracing::warn!(worker = %worker_id, "marked suspect after task failure");
        }
    }

    fn apply_load_threshold(&self, worker: &mut WorkerInfo) {
        match worker.status {
            WorkerStatus::Idle | WorkerStatus::Busy => {
                worker.status = self.status_for_load(worker.active_tasks);
            }
            WorkerStatus::Overloaded | WorkerStatus::Offline => {}
        }
    }

    fn status_for_load(&self, active_tasks: u32) -> WorkerStatus {
        if active_tasks >= self.busy_threshold {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Deep copy of every row, for `/status` and subscriber replay.
    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let mut rows: Vec<WorkerInfo> = self.workers.read().values().cloned().collect();
        rows.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        rows
    }

    // ------------------------------------------------------------------
    // Routing selection
    // ------------------------------------------------------------------

    /// Most suitable live worker for a task.
    ///
    /// Candidates must be alive, not `offline`/`overloaded`, and outside
    /// `exclude`. Each candidate lands in the highest tier it qualifies
    /// for:
    ///
    ///   tier 1: exact model-name match on `model_hint`
    ///   tier 2: a capability covers `task_type` (when a type was given)
    ///   tier 3: any live worker, for requests with no type constraint
    ///
    /// A typed request with no capability match anywhere fails rather
    /// than landing on an arbitrary worker.
    ///
    /// Within the winning tier the lowest `active_tasks` wins, ties broken
    /// by `worker_id` so a given snapshot selects deterministically.
    pub fn find_best(
        &self,
        task_type: TaskType,
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Option<WorkerInfo> {
        self.find_best_at(epoch_ms(), task_type, model_hint, exclude)
    }

    fn find_best_at(
        &self,
        now_ms: i64,
        task_type: TaskType,
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Option<WorkerInfo> {
        let workers = self.workers.read();

        let mut tiers: [Option<&WorkerInfo>; 3] = [None, None, None];
        for worker in workers.values() {
            if exclude.contains(&worker.worker_id)
                || !self.is_alive(worker, now_ms)
                || matches!(
                    worker.status,
                    WorkerStatus::Offline | WorkerStatus::Overloaded
                )
            {
                continue;
            }

            let tier = if model_hint
                .is_some_and(|hint| worker.models.iter().any(|m| m == hint))
            {
                0
            } else if task_type != TaskType::Any && can_handle(&worker.capabilities, task_type) {
                1
            } else if task_type == TaskType::Any {
                2
            } else {
                continue;
            };

            tiers[tier] = Some(match tiers[tier] {
                None => worker,
                Some(best) => pick_less_loaded(best, worker),
            });
        }

        let (tier, winner) = tiers
            .into_iter()
            .enumerate()
            .find_map(|(i, w)| w.map(|w| (i + 1, w)))?;
        tracing::debug!(
            worker = %winner.worker_id,
            tier,
            ?task_type,
            ?model_hint,
            "routing selection"
        );
        Some(winner.clone())
    }

    fn is_alive(&self, worker: &WorkerInfo, now_ms: i64) -> bool {
        now_ms - worker.last_heartbeat_ms < self.liveness_window_ms
    }

    // ------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------

    /// Flip rows silent past the liveness window to `offline`. Entries are
    /// retained so the dashboard can still observe them. Returns the ids
    /// evicted this sweep.
    pub fn evict_stale(&self) -> Vec<String> {
        self.evict_stale_at(epoch_ms())
    }

    fn evict_stale_at(&self, now_ms: i64) -> Vec<String> {
        let mut evicted = Vec::new();
        {
            let mut workers = self.workers.write();
            for worker in workers.values_mut() {
                if worker.status != WorkerStatus::Offline && !self.is_alive(worker, now_ms) {
                    worker.status = WorkerStatus::Offline;
                    evicted.push(worker.worker_id.clone());
                }
            }
        }
        for id in &evicted {
            tracing::warn!(worker = %id, "worker went offline: heartbeat overdue");
            self.hub.emit_node_status(id, WorkerStatus::Offline, 0);
        }
        evicted
    }

    /// Periodic eviction sweep; runs until the token is cancelled.
    pub async fn run_eviction(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("eviction loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.evict_stale();
                }
            }
        }
    }
}

/// Lower `active_tasks` wins; `worker_id` breaks ties deterministically.
fn pick_less_loaded<'a>(current: &'a WorkerInfo, candidate: &'a WorkerInfo) -> &'a WorkerInfo {
    if (candidate.active_tasks, candidate.worker_id.as_str())
        < (current.active_tasks, current.worker_id.as_str())
    {
        candidate
    } else {
        current
    }
}
