// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Event hub: non-blocking fan-out of [`MeshEvent`]s to dashboard
//! subscribers.
//!
//! Each subscriber owns a bounded queue and a dedicated writer (the
//! WebSocket write pump); the hub only enqueues. A full queue drops the
//! event for that subscriber alone, so a slow dashboard can never stall
//! the mesh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocols::{
    MeshEvent, PipelineResult, StatsEvent, TaskResult, TaskType, WorkerInfo, WorkerStatus,
};

/// Process-wide task/pipeline counters feeding the `stats` events.
#[derive(Debug)]
pub struct MeshStats {
    started: Instant,
    total_tasks: AtomicU64,
    total_pipelines: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

impl Default for MeshStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            total_tasks: AtomicU64::new(0),
            total_pipelines: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }
}

impl MeshStats {
    pub fn snapshot(&self) -> StatsEvent {
        let count = self.latency_count.load(Ordering::Relaxed);
        let sum = self.latency_sum_ms.load(Ordering::Relaxed);
        StatsEvent {
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            total_pipelines: self.total_pipelines.load(Ordering::Relaxed),
            avg_latency_ms: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
            uptime_s: self.started.elapsed().as_secs(),
        }
    }
}

/// A registered subscriber: the receiving half handed to the write pump.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<String>,
}

pub struct EventHub {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    stats: MeshStats,
}

impl EventHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity,
            stats: MeshStats::default(),
        }
    }

    pub fn stats(&self) -> &MeshStats {
        &self.stats
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Register a subscriber and replay the initial state into its queue:
    /// one synthesized `node_registered` per known worker, then a `stats`
    /// event. The caller passes the registry snapshot to keep the hub free
    /// of registry knowledge.
    pub fn subscribe(&self, known_workers: &[WorkerInfo]) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        for worker in known_workers {
            Self::enqueue(&tx, &MeshEvent::node_registered(worker));
        }
        Self::enqueue(&tx, &MeshEvent::stats(self.stats.snapshot()));

        self.subscribers.write().insert(id, tx);
        tracing::info!(
            subscriber = id,
            total = self.subscriber_count(),
            "dashboard subscriber connected"
        );
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.write().remove(&id).is_some() {
            tracing::info!(
                subscriber = id,
                remaining = self.subscriber_count(),
                "dashboard subscriber disconnected"
            );
        }
    }

    /// Serialize once, then non-blocking enqueue per subscriber. Queues
    /// that are full lose this event; closed queues are pruned.
    pub fn broadcast(&self, event: &MeshEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(%err, "failed to serialize mesh event");
                return;
            }
        };

        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (&id, tx) in subscribers.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(subscriber = id, "subscriber queue full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }

    fn enqueue(tx: &mpsc::Sender<String>, event: &MeshEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = tx.try_send(payload);
        }
    }

    // ------------------------------------------------------------------
    // Emitters, called from the router, registry, and pipeline executor.
    // ------------------------------------------------------------------

    pub fn emit_task_routed(
        &self,
        task_id: &str,
        task_type: TaskType,
        routed_to: &str,
        prompt: &str,
    ) {
        self.stats.total_tasks.fetch_add(1, Ordering::Relaxed);
        self.broadcast(&MeshEvent::task_routed(task_id, task_type, routed_to, prompt));
    }

    pub fn emit_task_done(&self, result: &TaskResult) {
        self.stats
            .latency_sum_ms
            .fetch_add(result.latency_ms.max(0) as u64, Ordering::Relaxed);
        self.stats.latency_count.fetch_add(1, Ordering::Relaxed);
        self.broadcast(&MeshEvent::task_done(result));
    }

    pub fn emit_node_registered(&self, worker: &WorkerInfo) {
        self.broadcast(&MeshEvent::node_registered(worker));
    }

    pub fn emit_node_status(&self, worker_id: &str, status: WorkerStatus, active_tasks: u32) {
        self.broadcast(&MeshEvent::node_status(worker_id, status, active_tasks));
    }

    pub fn emit_pipeline_started(&self, pipeline_id: &str, total_steps: usize) {
        self.stats.total_pipelines.fetch_add(1, Ordering::Relaxed);
        self.broadcast(&MeshEvent::pipeline_started(pipeline_id, total_steps));
    }

    pub fn emit_pipeline_done(&self, result: &PipelineResult) {
        self.broadcast(&MeshEvent::pipeline_done(result));
    }

    pub fn emit_stats(&self) {
        self.broadcast(&MeshEvent::stats(self.stats.snapshot()));
    }

    /// Periodic `stats` broadcast, active only while someone is listening.
    /// Runs until the token is cancelled.
    pub async fn run_stats_ticker(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("stats ticker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if self.subscriber_count() > 0 {
                        self.emit_stats();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{EventKind, ModelCapability};

    fn worker(id: &str) -> WorkerInfo {
        WorkerInfo {
            worker_id: id.to_string(),
            host: "127.0.0.1".to_string(),
            agent_port: 9001,
            backend_port: 11434,
            models: vec!["mistral".to_string()],
            capabilities: vec![ModelCapability {
                name: "mistral".to_string(),
                types: vec![TaskType::Text],
            }],
            status: WorkerStatus::Idle,
            active_tasks: 0,
            last_heartbeat_ms: 0,
            registered_at_ms: 0,
        }
    }

    fn parse(payload: &str) -> MeshEvent {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn subscribe_replays_initial_state() {
        let hub = EventHub::new(8);
        let workers = vec![worker("a"), worker("b")];
        let mut sub = hub.subscribe(&workers);

        let first = parse(&sub.rx.recv().await.unwrap());
        let second = parse(&sub.rx.recv().await.unwrap());
        let third = parse(&sub.rx.recv().await.unwrap());
        assert_eq!(first.kind, EventKind::NodeRegistered);
        assert_eq!(second.kind, EventKind::NodeRegistered);
        assert_eq!(third.kind, EventKind::Stats);
    }

    #[tokio::test]
    async fn full_queue_drops_only_for_that_subscriber() {
        let hub = EventHub::new(1);
        let mut slow = hub.subscribe(&[]);
        let _ = slow.rx.recv().await.unwrap(); // drain the stats replay

        // First broadcast fills slow's single slot; the second is dropped
        // for it. A subscriber joining afterwards is unaffected.
        hub.emit_stats();
        hub.emit_stats();
        let mut late = hub.subscribe(&[]);
        let _ = late.rx.recv().await.unwrap();

        let _ = slow.rx.recv().await.unwrap();
        assert!(slow.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_removes_queue() {
        let hub = EventHub::new(4);
        let sub = hub.subscribe(&[]);
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe(sub.id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn stats_average() {
        let hub = EventHub::new(4);
        assert_eq!(hub.stats().snapshot().avg_latency_ms, 0.0);

        let mut result = TaskResult {
            latency_ms: 100,
            ..Default::default()
        };
        hub.emit_task_done(&result);
        result.latency_ms = 300;
        hub.emit_task_done(&result);

        let snap = hub.stats().snapshot();
        assert_eq!(snap.avg_latency_ms, 200.0);
    }

    #[test]
    fn task_routed_increments_total() {
        let hub = EventHub::new(4);
        hub.emit_task_routed("t1", TaskType::Text, "a", "p");
        hub.emit_task_routed("t2", TaskType::Text, "a", "p");
        assert_eq!(hub.stats().snapshot().total_tasks, 2);
    }
}
