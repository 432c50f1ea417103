// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for convenient use.
//! Users of the library can import everything they need with:
//!
//! ```rust
//! use meshstore_infocache::prelude::*;
//! ```

// Core types
pub use crate::config::{Config, FabricInterfaceConfig};
pub use crate::error::{CacheError, CollaboratorError, Result};
pub use crate::infocache::{InfoCache, InfoCacheDeps};

// Attachment metadata
pub use crate::attach::{
    AttachInfo, AttachInfoFetcher, ClientNetHint, FabricIfaceSummary, GetAttachInfoRequest,
    RankUri,
};

// Fabric topology
pub use crate::fabric::{
    FabricIfaceParams, FabricInterface, FabricScanner, NumaFabric, NumaFabricMap,
};

// Local hardware
pub use crate::hardware::{
    DeviceClass, NetDevClassProvider, NetDevState, NetDevStateProvider, NetInterface,
    NetInterfaceLister,
};
