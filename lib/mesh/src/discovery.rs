// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Local-link discovery boundary.
//!
//! The coordinator advertises itself as `_echo-mesh._tcp` so workers can
//! find it without manual configuration. The advertisement transport
//! (mDNS) lives outside this crate; here we own the service name, the
//! config switch, and the worker-side fallback chain for resolving a
//! coordinator URL.

/// Service type advertised on the local link.
pub const MDNS_SERVICE: &str = "_echo-mesh._tcp";

/// ENV a worker consults when asked to discover the coordinator.
pub const COORDINATOR_URL_ENV: &str = "MESH_COORDINATOR_URL";

/// Conventional coordinator address when nothing else resolves.
pub const DEFAULT_COORDINATOR_URL: &str = "http://localhost:8080";

/// Resolve the coordinator URL a worker should talk to.
///
/// An explicit URL wins. `"auto"` (or empty) walks the discovery chain:
/// the `MESH_COORDINATOR_URL` environment variable, then the conventional
/// default. An external mDNS browser can interpose by exporting the env
/// var before the agent starts.
pub fn resolve_coordinator_url(configured: &str) -> String {
    if !configured.is_empty() && configured != "auto" {
        return configured.trim_end_matches('/').to_string();
    }
    if let Ok(url) = std::env::var(COORDINATOR_URL_ENV) {
        if !url.is_empty() {
            tracing::info!(%url, "coordinator resolved from environment");
            return url.trim_end_matches('/').to_string();
        }
    }
    tracing::info!(
        url = DEFAULT_COORDINATOR_URL,
        "no coordinator configured, using the conventional default"
    );
    DEFAULT_COORDINATOR_URL.to_string()
}

/// Log the advertisement the deployment layer should publish. The mesh
/// core intentionally does not speak mDNS itself.
pub fn announce(host: &str, port: u16) {
    tracing::info!(
        service = MDNS_SERVICE,
        %host,
        port,
        "advertise the coordinator on the local link for worker auto-discovery"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_url_wins_and_is_normalized() {
        assert_eq!(
            resolve_coordinator_url("http://10.0.0.5:8080/"),
            "http://10.0.0.5:8080"
        );
    }

    #[test]
    fn auto_falls_back_to_default() {
        // Run with the env var unset; serial test binaries make this safe.
        std::env::remove_var(COORDINATOR_URL_ENV);
        assert_eq!(resolve_coordinator_url("auto"), DEFAULT_COORDINATOR_URL);
    }
}
