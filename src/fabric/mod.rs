// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Fabric topology model
//!
//! The NUMA fabric map groups usable high-speed network interfaces by NUMA
//! node. It is produced by an injected scanner (or seeded statically from
//! configuration), filtered by device class, and shared with readers through
//! a reader/writer lock.

mod filter;
mod numa;
mod types;

use async_trait::async_trait;

use crate::error::CollaboratorError;

pub use filter::{DeviceFilter, FilterMode};
pub use numa::{NumaFabric, NumaFabricMap, NumaFabricReadGuard, NumaFabricWriteGuard};
pub use types::{FabricIfaceParams, FabricInterface};

/// Scans local hardware for fabric interfaces, grouped by NUMA node.
///
/// Implemented by the hardware-introspection layer of the owning process.
#[async_trait]
pub trait FabricScanner: Send + Sync {
    async fn scan(
        &self,
        providers: &[String],
    ) -> std::result::Result<NumaFabricMap, CollaboratorError>;
}
