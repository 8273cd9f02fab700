// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The live dashboard, served as one embedded page at `/dashboard/`.

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

pub fn router() -> Router {
    Router::new()
        .route("/dashboard/", get(page))
        .route("/dashboard", get(redirect))
}

async fn page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn redirect() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/dashboard/")],
    )
}
