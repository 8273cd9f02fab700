// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `GET /ws`: the dashboard event feed.
//!
//! Each subscriber gets a bounded queue on the
//! [`EventHub`](crate::events::EventHub) and a
//! dedicated write pump here, so one slow socket can never stall the hub
//! or its peers. The write side pings every 30 s and applies a 10 s
//! deadline per message; the read side only drains frames to notice the
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::service::MeshState;

pub fn router(state: Arc<MeshState>) -> Router {
    Router::new().route("/ws", get(subscribe)).with_state(state)
}

async fn subscribe(State(state): State<Arc<MeshState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<MeshState>, socket: WebSocket) {
    // Replay of the current mesh state lands in the queue before the
    // subscriber is visible to broadcasts.
    let subscription = state.hub.subscribe(&state.registry.snapshot());
    let sub_id = subscription.id;

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(state.clone(), sink, subscription.rx));
    let mut reader = tokio::spawn(read_pump(stream));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
        _ = state.shutdown.cancelled() => {
            writer.abort();
            reader.abort();
        }
    }
    state.hub.unsubscribe(sub_id);
}

/// Drains queued events onto the socket, interleaved with keepalive
/// pings. Ends on the first write that fails or times out.
async fn write_pump(
    state: Arc<MeshState>,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval(state.config.ws_ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The interval fires immediately once; skip that so the first frame
    // the client sees is the state replay, not a ping.
    ping.tick().await;

    let deadline = state.config.ws_write_deadline;
    loop {
        let message = tokio::select! {
            event = rx.recv() => match event {
                Some(payload) => Message::Text(payload.into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };
        match tokio::time::timeout(deadline, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }
}

/// We expect nothing from the client, but must keep reading to process
/// pongs and to notice the connection going away.
async fn read_pump(mut stream: SplitStream<WebSocket>) {
    while let Some(Ok(_frame)) = stream.next().await {}
}
