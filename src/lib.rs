// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! # meshstore infocache
//!
//! Refreshable information cache for the meshstore client agent.
//!
//! The agent avoids repeating two expensive discovery operations: querying
//! the cluster management service for attachment metadata, and scanning
//! local network hardware for usable fabric interfaces grouped by NUMA
//! affinity. Both results are cached here with single-flight construction,
//! per-entry refresh serialization and independent enable/disable per
//! sub-cache.
//!
//! ## Main modules
//! - `attach`: attachment metadata records and the fetcher interface
//! - `cache`: generic keyed cache with single-flight construction
//! - `config`: configuration management
//! - `error`: error types
//! - `fabric`: NUMA fabric topology model and scanner interface
//! - `hardware`: local interface classification and readiness gating
//! - `infocache`: the facade composing the sub-caches
//! - `metrics`: cache effectiveness counters
//! - `prelude`: commonly used types and traits

mod attach;
mod cache;
mod config;
mod error;
mod fabric;
mod hardware;
mod infocache;
mod metrics;
pub mod prelude;

// Re-export commonly used types
/// Cache configuration
pub use config::{Config, FabricInterfaceConfig};

/// Cache error and result type
pub use error::{CacheError, CollaboratorError, Result};

/// Info cache facade and its collaborator interfaces
pub use infocache::{InfoCache, InfoCacheDeps};

/// Attachment metadata records
pub use attach::{
    AttachInfo, AttachInfoFetcher, ClientNetHint, FabricIfaceSummary, GetAttachInfoRequest,
    RankUri,
};

/// Fabric topology model
pub use fabric::{
    DeviceFilter, FabricIfaceParams, FabricInterface, FabricScanner, FilterMode, NumaFabric,
    NumaFabricMap, NumaFabricReadGuard, NumaFabricWriteGuard,
};

/// Local hardware interfaces and readiness gating
pub use hardware::{
    DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT, DeviceClass, NetDevClassProvider, NetDevState,
    NetDevStateProvider, NetInterface, NetInterfaceLister, WaitFabricReadyParams,
    wait_fabric_ready,
};

/// Generic keyed cache building blocks
pub use cache::{EntryGuard, ItemCache, RefreshableItem};

/// Cache effectiveness counters
pub use metrics::{
    CLIENT_METRICS_ENABLED_ENV, CLIENT_METRICS_RETAIN_ENV, CacheLabels, CacheMetrics,
};
