// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! NUMA-grouped fabric map and device selection

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::filter::DeviceFilter;
use super::types::{FabricIfaceParams, FabricInterface};
use crate::config::FabricInterfaceConfig;
use crate::error::{CacheError, Result};
use crate::hardware::DeviceClass;

/// Fabric interfaces grouped by NUMA node, ordered on both levels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumaFabricMap(BTreeMap<u32, Vec<FabricInterface>>);

impl NumaFabricMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interface to its NUMA node's bucket.
    pub fn insert(&mut self, iface: FabricInterface) {
        self.0.entry(iface.numa_node).or_default().push(iface);
    }

    /// Total number of interfaces across all NUMA nodes.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Removes interfaces whose device class differs from `dev_class` and
    /// deletes NUMA buckets left empty.
    pub fn filter_device_class(&mut self, dev_class: DeviceClass) {
        for ifaces in self.0.values_mut() {
            ifaces.retain(|fi| fi.device_class == dev_class);
        }
        self.0.retain(|_, ifaces| !ifaces.is_empty());
    }

    /// Removes interfaces rejected by the name filter, deleting empty buckets.
    pub fn apply_filter(&mut self, filter: &DeviceFilter) {
        for ifaces in self.0.values_mut() {
            ifaces.retain(|fi| {
                let keep = filter.allows(&fi.name);
                if !keep {
                    tracing::debug!("fabric interface {} filtered out by config", fi.name);
                }
                keep
            });
        }
        self.0.retain(|_, ifaces| !ifaces.is_empty());
    }

    fn matches(fi: &FabricInterface, params: &FabricIfaceParams) -> bool {
        if params.dev_class != DeviceClass::Unknown && fi.device_class != params.dev_class {
            return false;
        }
        params.provider.is_empty() || fi.provider == params.provider
    }

    /// Exact-name lookup, further constrained by class/provider when set.
    pub fn find_device(&self, name: &str, params: &FabricIfaceParams) -> Result<FabricInterface> {
        self.0
            .values()
            .flatten()
            .find(|fi| fi.name == name && Self::matches(fi, params))
            .cloned()
            .ok_or_else(|| CacheError::NotFound(name.to_string()))
    }

    fn candidates_in_node(
        &self,
        node: u32,
        params: &FabricIfaceParams,
    ) -> Vec<&FabricInterface> {
        self.0
            .get(&node)
            .map(|ifaces| {
                ifaces
                    .iter()
                    .filter(|fi| Self::matches(fi, params))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Deref for NumaFabricMap {
    type Target = BTreeMap<u32, Vec<FabricInterface>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for NumaFabricMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<FabricInterface> for NumaFabricMap {
    fn from_iter<I: IntoIterator<Item = FabricInterface>>(iter: I) -> Self {
        let mut map = Self::new();
        for fi in iter {
            map.insert(fi);
        }
        map
    }
}

/// Read-locked view of the fabric map; dropping it releases the lock.
pub struct NumaFabricReadGuard(OwnedRwLockReadGuard<NumaFabricMap>);

impl Deref for NumaFabricReadGuard {
    type Target = NumaFabricMap;

    fn deref(&self) -> &NumaFabricMap {
        &self.0
    }
}

/// Write-locked view of the fabric map; dropping it releases the lock.
pub struct NumaFabricWriteGuard(OwnedRwLockWriteGuard<NumaFabricMap>);

impl Deref for NumaFabricWriteGuard {
    type Target = NumaFabricMap;

    fn deref(&self) -> &NumaFabricMap {
        &self.0
    }
}

impl DerefMut for NumaFabricWriteGuard {
    fn deref_mut(&mut self) -> &mut NumaFabricMap {
        &mut self.0
    }
}

/// Reader/writer-locked fabric map plus device selection state
pub struct NumaFabric {
    map: Arc<RwLock<NumaFabricMap>>,
    // round-robin position per NUMA node, spreading selections across calls
    cursors: StdMutex<HashMap<u32, usize>>,
}

impl NumaFabric {
    #[must_use]
    pub fn new(map: NumaFabricMap) -> Self {
        Self {
            map: Arc::new(RwLock::new(map)),
            cursors: StdMutex::new(HashMap::new()),
        }
    }

    /// Wraps a scan result, applying the configured name filter.
    #[must_use]
    pub fn from_scan(mut map: NumaFabricMap, filter: Option<&DeviceFilter>) -> Self {
        if let Some(filter) = filter {
            map.apply_filter(filter);
        }
        tracing::debug!(
            "fabric scan produced {} interface(s) on {} NUMA node(s)",
            map.device_count(),
            map.len()
        );
        Self::new(map)
    }

    /// Builds a statically seeded fabric from configured interfaces.
    ///
    /// The domain defaults to the interface name when not configured.
    #[must_use]
    pub fn from_config(entries: &[FabricInterfaceConfig]) -> Self {
        let map = entries
            .iter()
            .map(|entry| FabricInterface {
                name: entry.interface.clone(),
                domain: entry
                    .domain
                    .clone()
                    .unwrap_or_else(|| entry.interface.clone()),
                provider: entry.provider.clone(),
                numa_node: entry.numa_node,
                device_class: entry.device_class,
            })
            .collect();
        Self::new(map)
    }

    /// Shared read access to the map; the guard is the release handle.
    pub async fn rlocked_map(&self) -> NumaFabricReadGuard {
        NumaFabricReadGuard(self.map.clone().read_owned().await)
    }

    /// Exclusive write access to the map; the guard is the release handle.
    pub async fn wlocked_map(&self) -> NumaFabricWriteGuard {
        NumaFabricWriteGuard(self.map.clone().write_owned().await)
    }

    /// Exact-name device lookup.
    pub async fn find_device(
        &self,
        name: &str,
        params: &FabricIfaceParams,
    ) -> Result<FabricInterface> {
        let map = self.map.read().await;
        map.find_device(name, params)
    }

    /// Picks a device matching `params`, preferring the requested NUMA node
    /// and spreading repeated picks round-robin within a node.
    pub async fn get_device(&self, params: &FabricIfaceParams) -> Result<FabricInterface> {
        let map = self.map.read().await;

        let mut nodes: Vec<u32> = map.keys().copied().collect();
        if let Some(preferred) = params.numa_node {
            if let Some(pos) = nodes.iter().position(|n| *n == preferred) {
                nodes.remove(pos);
                nodes.insert(0, preferred);
            }
        }

        for node in nodes {
            let candidates = map.candidates_in_node(node, params);
            if candidates.is_empty() {
                continue;
            }
            if params.numa_node.is_some_and(|preferred| preferred != node) {
                tracing::debug!(
                    "no fabric device on requested NUMA node, falling back to node {}",
                    node
                );
            }
            let mut cursors = self.cursors.lock().expect("fabric cursor lock");
            let cursor = cursors.entry(node).or_insert(0);
            let pick = candidates[*cursor % candidates.len()].clone();
            *cursor = cursor.wrapping_add(1);
            return Ok(pick);
        }

        Err(CacheError::NotFound(format!(
            "fabric device with class {} and provider {:?}",
            params.dev_class, params.provider
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::FilterMode;

    fn iface(name: &str, numa: u32, provider: &str, class: DeviceClass) -> FabricInterface {
        FabricInterface {
            name: name.to_string(),
            domain: name.to_string(),
            provider: provider.to_string(),
            numa_node: numa,
            device_class: class,
        }
    }

    fn sample_map() -> NumaFabricMap {
        [
            iface("eth0", 0, "tcp", DeviceClass::Ether),
            iface("eth1", 0, "tcp", DeviceClass::Ether),
            iface("ib0", 0, "verbs", DeviceClass::Infiniband),
            iface("ib1", 1, "verbs", DeviceClass::Infiniband),
            iface("lo", 1, "tcp", DeviceClass::Loopback),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_insert_groups_by_numa_node() {
        let map = sample_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&0).unwrap().len(), 3);
        assert_eq!(map.get(&1).unwrap().len(), 2);
        assert_eq!(map.device_count(), 5);
    }

    #[test]
    fn test_filter_device_class_removes_empty_buckets() {
        let mut map = sample_map();
        map.filter_device_class(DeviceClass::Ether);

        assert_eq!(map.device_count(), 2);
        assert!(map.contains_key(&0));
        // NUMA node 1 had no ether interfaces and disappears entirely.
        assert!(!map.contains_key(&1));
    }

    #[test]
    fn test_apply_name_filter() {
        let mut map = sample_map();
        map.apply_filter(&DeviceFilter::new(FilterMode::Exclude, ["eth0", "eth1", "ib0"]));

        assert!(!map.contains_key(&0));
        assert_eq!(map.get(&1).unwrap().len(), 2);
    }

    #[test]
    fn test_find_device_by_name() {
        let map = sample_map();
        let found = map
            .find_device("ib1", &FabricIfaceParams::default())
            .unwrap();
        assert_eq!(found.numa_node, 1);
        assert_eq!(found.provider, "verbs");
    }

    #[test]
    fn test_find_device_not_found() {
        let map = sample_map();
        let err = map
            .find_device("eth9", &FabricIfaceParams::default())
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(name) if name == "eth9"));
    }

    #[test]
    fn test_find_device_respects_class_constraint() {
        let map = sample_map();
        let err = map
            .find_device(
                "eth0",
                &FabricIfaceParams {
                    dev_class: DeviceClass::Infiniband,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_device_round_robin_within_node() {
        let nf = NumaFabric::new(sample_map());
        let params = FabricIfaceParams {
            dev_class: DeviceClass::Ether,
            numa_node: Some(0),
            ..Default::default()
        };

        let first = nf.get_device(&params).await.unwrap();
        let second = nf.get_device(&params).await.unwrap();
        let third = nf.get_device(&params).await.unwrap();

        assert_ne!(first.name, second.name);
        assert_eq!(first.name, third.name);
    }

    #[tokio::test]
    async fn test_get_device_falls_back_to_other_numa_node() {
        let nf = NumaFabric::new(sample_map());
        let params = FabricIfaceParams {
            dev_class: DeviceClass::Infiniband,
            provider: "verbs".to_string(),
            // Node 2 does not exist; selection falls back to node order.
            numa_node: Some(2),
            ..Default::default()
        };

        let picked = nf.get_device(&params).await.unwrap();
        assert!(picked.name.starts_with("ib"));
    }

    #[tokio::test]
    async fn test_get_device_nothing_matches() {
        let nf = NumaFabric::new(sample_map());
        let params = FabricIfaceParams {
            dev_class: DeviceClass::Ether,
            provider: "verbs".to_string(),
            ..Default::default()
        };

        let err = nf.get_device(&params).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_from_config_defaults_domain_to_interface() {
        let nf = NumaFabric::from_config(&[FabricInterfaceConfig {
            interface: "ib0".to_string(),
            domain: None,
            provider: "verbs".to_string(),
            numa_node: 0,
            device_class: DeviceClass::Infiniband,
        }]);

        let map = nf.rlocked_map().await;
        let fi = &map.get(&0).unwrap()[0];
        assert_eq!(fi.domain, "ib0");
    }

    #[tokio::test]
    async fn test_locked_map_guards_share_and_exclude() {
        let nf = NumaFabric::new(sample_map());

        // Two concurrent readers are fine.
        let r1 = nf.rlocked_map().await;
        let r2 = nf.rlocked_map().await;
        assert_eq!(r1.device_count(), r2.device_count());
        drop(r1);
        drop(r2);

        // The writer gets exclusive access once readers release.
        let mut w = nf.wlocked_map().await;
        w.filter_device_class(DeviceClass::Loopback);
        drop(w);

        let r = nf.rlocked_map().await;
        assert_eq!(r.device_count(), 1);
    }
}
