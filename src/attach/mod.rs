// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Attachment metadata from the cluster management service
//!
//! These records mirror the management RPC payload field for field. `Clone`
//! is the deep-copy operation used by the cache read path: every list is
//! copied element-wise, so a cloned record never aliases the cached master.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::hardware::DeviceClass;

/// Request for attachment metadata for one system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAttachInfoRequest {
    pub system: String,
    /// Request URIs for every rank, not just the management service
    pub all_ranks: bool,
}

/// One participant rank's endpoint URI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankUri {
    pub rank: u32,
    pub uri: String,
    pub provider_idx: u32,
    pub num_ctxs: u32,
}

/// Client-side network configuration hint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientNetHint {
    pub provider: String,
    pub interface: String,
    pub domain: String,
    pub rpc_timeout_secs: u32,
    pub device_class: DeviceClass,
    /// Shared receive context setting; negative means unset
    pub srv_srx_set: i32,
    pub env_vars: Vec<String>,
    pub provider_idx: u32,
}

/// Per-NUMA-node fabric interface summary reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricIfaceSummary {
    pub numa_node: u32,
    pub provider: String,
    pub interface: String,
}

/// Attachment/addressing metadata for one system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachInfo {
    pub status: i32,
    pub rank_uris: Vec<RankUri>,
    /// Ranks hosting the management service
    pub ms_ranks: Vec<u32>,
    pub client_net_hint: ClientNetHint,
    pub secondary_rank_uris: Vec<RankUri>,
    pub secondary_net_hints: Vec<ClientNetHint>,
    pub data_version: u64,
    pub system: String,
    pub build_info: String,
    pub numa_fabric_summary: Vec<FabricIfaceSummary>,
}

/// Fetches attachment metadata from the management service.
///
/// Implementations own the bound RPC transport.
#[async_trait]
pub trait AttachInfoFetcher: Send + Sync {
    async fn fetch(
        &self,
        req: &GetAttachInfoRequest,
    ) -> std::result::Result<AttachInfo, CollaboratorError>;
}
