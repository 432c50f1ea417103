// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Cache telemetry
//!
//! Prometheus counters tracking cache effectiveness per sub-cache, plus the
//! environment variables injected into attach info responses when client
//! metrics are enabled. The owning agent mounts or encodes the registry.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Environment variable enabling client-side metrics collection
pub const CLIENT_METRICS_ENABLED_ENV: &str = "MESHSTORE_CLIENT_METRICS_ENABLE";

/// Environment variable enabling client-side metrics retention
pub const CLIENT_METRICS_RETAIN_ENV: &str = "MESHSTORE_CLIENT_METRICS_RETAIN";

/// Sub-cache name label
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CacheLabels {
    pub cache: String,
}

impl CacheLabels {
    #[must_use]
    pub fn attach_info() -> Self {
        Self {
            cache: "attach_info".to_string(),
        }
    }

    #[must_use]
    pub fn fabric() -> Self {
        Self {
            cache: "fabric".to_string(),
        }
    }
}

/// Registry of cache effectiveness counters
#[derive(Clone)]
pub struct CacheMetrics {
    registry: Arc<Mutex<Registry>>,
    hits: Family<CacheLabels, Counter>,
    misses: Family<CacheLabels, Counter>,
    refreshes: Family<CacheLabels, Counter>,
    refresh_errors: Family<CacheLabels, Counter>,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let hits = Family::<CacheLabels, Counter>::default();
        registry.register(
            "infocache_hits",
            "Requests served from an already-cached entry",
            hits.clone(),
        );

        let misses = Family::<CacheLabels, Counter>::default();
        registry.register(
            "infocache_misses",
            "Requests that constructed a new cache entry",
            misses.clone(),
        );

        let refreshes = Family::<CacheLabels, Counter>::default();
        registry.register(
            "infocache_refreshes",
            "Forced refreshes of cached entries",
            refreshes.clone(),
        );

        let refresh_errors = Family::<CacheLabels, Counter>::default();
        registry.register(
            "infocache_refresh_errors",
            "Forced refreshes that failed",
            refresh_errors.clone(),
        );

        Self {
            registry: Arc::new(Mutex::new(registry)),
            hits,
            misses,
            refreshes,
            refresh_errors,
        }
    }

    pub fn record_hit(&self, labels: &CacheLabels) {
        self.hits.get_or_create(labels).inc();
    }

    pub fn record_miss(&self, labels: &CacheLabels) {
        self.misses.get_or_create(labels).inc();
    }

    pub fn record_refreshes(&self, labels: &CacheLabels, count: u64) {
        self.refreshes.get_or_create(labels).inc_by(count);
    }

    pub fn record_refresh_error(&self, labels: &CacheLabels) {
        self.refresh_errors.get_or_create(labels).inc();
    }

    /// Renders the registry in OpenMetrics text format.
    pub async fn encode_metrics(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let registry = self.registry.lock().await;
        let mut buffer = String::new();
        encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}
