// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Type definitions for fabric interfaces

use serde::{Deserialize, Serialize};

use crate::hardware::DeviceClass;

/// A usable fabric interface on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricInterface {
    pub name: String,
    pub domain: String,
    pub provider: String,
    pub numa_node: u32,
    pub device_class: DeviceClass,
}

/// Selection criteria for a fabric device lookup
///
/// An empty provider matches any provider. When `interface` is set the
/// lookup is an exact-name match; otherwise the topology map's selection
/// policy picks a device, preferring `numa_node` when given.
#[derive(Debug, Clone, Default)]
pub struct FabricIfaceParams {
    pub dev_class: DeviceClass,
    pub provider: String,
    pub interface: Option<String>,
    pub numa_node: Option<u32>,
}
