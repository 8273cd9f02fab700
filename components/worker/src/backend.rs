// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client for the local text-generation backend.
//!
//! The backend is an external collaborator speaking the Ollama-style
//! `POST /api/generate` contract: a JSON request, and either one JSON
//! object (unary) or newline-delimited JSON chunks (streaming) of the
//! shape `{"response": "...", "done": false}`.

use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize, Default)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// One streamed token and whether generation has finished.
pub type Token = (String, bool);

pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<Token>> + Send>>;

pub struct GenerationBackend {
    client: reqwest::Client,
    base_url: String,
}

impl GenerationBackend {
    pub fn new(host: &str, port: u16, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building backend http client")?;
        Ok(Self {
            client,
            base_url: format!("http://{host}:{port}"),
        })
    }

    /// Full-response generation.
    pub async fn generate(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .with_context(|| format!("backend unreachable at {url}, is it running?"))?;

        let chunk: GenerateChunk = response
            .json()
            .await
            .context("failed to parse backend response")?;
        Ok(chunk.response)
    }

    /// Token-by-token generation. Ends after the `done` chunk or on
    /// stream loss; malformed lines are skipped.
    pub async fn generate_stream(&self, model: &str, prompt: &str) -> anyhow::Result<TokenStream> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: true,
            })
            .send()
            .await
            .with_context(|| format!("backend unreachable at {url}"))?;

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buf = BytesMut::new();
            'read: while let Some(part) = body.next().await {
                let part = match part {
                    Ok(part) => part,
                    Err(err) => {
                        yield Err(anyhow::anyhow!("backend stream failed: {err}"));
                        break;
                    }
                };
                buf.extend_from_slice(&part);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    let line = &line[..line.len() - 1];
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(chunk) = serde_json::from_slice::<GenerateChunk>(line) else {
                        continue;
                    };
                    let done = chunk.done;
                    yield Ok((chunk.response, done));
                    if done {
                        break 'read;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
