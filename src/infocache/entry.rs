// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Refreshable cache entries for attach info and fabric topology

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::attach::{AttachInfo, GetAttachInfoRequest};
use crate::cache::RefreshableItem;
use crate::error::{CacheError, Result};
use crate::fabric::NumaFabric;
use crate::hardware::DeviceClass;

pub(crate) const ATTACH_INFO_KEY: &str = "AttachInfo";
pub(crate) const FABRIC_KEY: &str = "NumaFabric";

/// Cache key for a system's attach info entry
pub(crate) fn sys_attach_info_key(system: &str) -> String {
    if system.is_empty() {
        ATTACH_INFO_KEY.to_string()
    } else {
        format!("{ATTACH_INFO_KEY}-{system}")
    }
}

/// Bound attach info fetch, carrying the RPC client and telemetry settings
pub(crate) type AttachFetchFn =
    Arc<dyn Fn(GetAttachInfoRequest) -> BoxFuture<'static, Result<AttachInfo>> + Send + Sync>;

/// Bound fabric fetch, carrying the scanner and device filter
pub(crate) type FabricFetchFn =
    Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, Result<Arc<NumaFabric>>> + Send + Sync>;

/// State common to every cache entry
#[derive(Debug, Clone, Copy, Default)]
struct CacheItemState {
    last_cached: Option<Instant>,
    refresh_interval: Duration,
}

impl CacheItemState {
    fn new(refresh_interval: Duration) -> Self {
        Self {
            last_cached: None,
            refresh_interval,
        }
    }

    fn is_cached(&self) -> bool {
        self.last_cached.is_some()
    }

    fn is_stale(&self) -> bool {
        if self.refresh_interval.is_zero() {
            return false;
        }
        self.last_cached
            .is_some_and(|t| t.elapsed() > self.refresh_interval)
    }

    fn mark_cached(&mut self) {
        self.last_cached = Some(Instant::now());
    }
}

/// Cached attach info for one system, refreshed on a TTL
pub(crate) struct CachedAttachInfo {
    state: CacheItemState,
    fetch: AttachFetchFn,
    system: String,
    last_response: Option<AttachInfo>,
}

impl CachedAttachInfo {
    pub(crate) fn new(refresh_interval: Duration, system: &str, fetch: AttachFetchFn) -> Self {
        Self {
            state: CacheItemState::new(refresh_interval),
            fetch,
            system: system.to_string(),
            last_response: None,
        }
    }

    pub(crate) fn key(&self) -> String {
        sys_attach_info_key(&self.system)
    }

    fn needs_refresh(&self) -> bool {
        !self.state.is_cached() || self.state.is_stale()
    }

    async fn refresh(&mut self) -> Result<()> {
        let req = GetAttachInfoRequest {
            system: self.system.clone(),
            all_ranks: true,
        };
        let resp = (self.fetch)(req).await?;

        self.last_response = Some(resp);
        self.state.mark_cached();
        Ok(())
    }

    /// The cached master record
    pub(crate) fn record(&self) -> Result<&AttachInfo> {
        self.last_response
            .as_ref()
            .ok_or(CacheError::Uninitialized("attach info never fetched"))
    }
}

/// Cached fabric topology; never auto-stale once scanned
pub(crate) struct CachedFabricInfo {
    state: CacheItemState,
    fetch: FabricFetchFn,
    providers: Vec<String>,
    dev_class: DeviceClass,
    last_results: Option<Arc<NumaFabric>>,
}

impl CachedFabricInfo {
    pub(crate) fn new(
        fetch: FabricFetchFn,
        dev_class: DeviceClass,
        providers: Vec<String>,
    ) -> Self {
        Self {
            state: CacheItemState::new(Duration::ZERO),
            fetch,
            providers,
            dev_class,
            last_results: None,
        }
    }

    /// A pre-cached entry whose fetch returns the seeded fabric, so the
    /// hardware scanner is never invoked for it.
    pub(crate) fn new_static(nf: Arc<NumaFabric>) -> Self {
        let seeded = nf.clone();
        let mut state = CacheItemState::new(Duration::ZERO);
        state.mark_cached();
        Self {
            state,
            fetch: Arc::new(move |_| {
                let nf = seeded.clone();
                Box::pin(async move { Ok(nf) })
            }),
            providers: Vec::new(),
            // Unknown matches any class, so forced refreshes never filter
            // the seeded map down.
            dev_class: DeviceClass::Unknown,
            last_results: Some(nf),
        }
    }

    fn needs_refresh(&self) -> bool {
        !self.state.is_cached()
    }

    async fn refresh(&mut self) -> Result<()> {
        let results = (self.fetch)(self.providers.clone()).await?;

        if self.dev_class != DeviceClass::Unknown {
            let mut map = results.wlocked_map().await;
            map.filter_device_class(self.dev_class);
            tracing::debug!(
                "fabric topology filtered to {} {} interface(s)",
                map.device_count(),
                self.dev_class
            );
        }

        self.last_results = Some(results);
        self.state.mark_cached();
        Ok(())
    }

    /// The cached topology, shared with readers
    pub(crate) fn fabric(&self) -> Result<Arc<NumaFabric>> {
        self.last_results
            .clone()
            .ok_or(CacheError::Uninitialized("fabric never scanned"))
    }
}

/// The concrete entry kinds stored in the keyed cache
pub(crate) enum CacheItem {
    AttachInfo(CachedAttachInfo),
    Fabric(CachedFabricInfo),
}

impl CacheItem {
    fn kind(&self) -> &'static str {
        match self {
            Self::AttachInfo(_) => "attach info",
            Self::Fabric(_) => "fabric",
        }
    }

    pub(crate) fn as_attach_info(&self) -> Result<&CachedAttachInfo> {
        match self {
            Self::AttachInfo(entry) => Ok(entry),
            other => Err(CacheError::InvariantViolation(format!(
                "expected attach info cache entry, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn as_fabric(&self) -> Result<&CachedFabricInfo> {
        match self {
            Self::Fabric(entry) => Ok(entry),
            other => Err(CacheError::InvariantViolation(format!(
                "expected fabric cache entry, found {}",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl RefreshableItem for CacheItem {
    fn key(&self) -> String {
        match self {
            Self::AttachInfo(entry) => entry.key(),
            Self::Fabric(_) => FABRIC_KEY.to_string(),
        }
    }

    async fn refresh_if_needed(&mut self) -> Result<bool> {
        let needed = match self {
            Self::AttachInfo(entry) => entry.needs_refresh(),
            Self::Fabric(entry) => entry.needs_refresh(),
        };
        if needed {
            self.refresh().await?;
        }
        Ok(needed)
    }

    async fn refresh(&mut self) -> Result<()> {
        match self {
            Self::AttachInfo(entry) => entry.refresh().await,
            Self::Fabric(entry) => entry.refresh().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{FabricInterface, NumaFabricMap};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counted_attach_fetch(
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    ) -> AttachFetchFn {
        Arc::new(move |req| {
            let calls = calls.clone();
            let fail = fail.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail.load(Ordering::SeqCst) {
                    return Err(CacheError::Fetch("management service unreachable".into()));
                }
                Ok(AttachInfo {
                    system: req.system,
                    data_version: calls.load(Ordering::SeqCst) as u64,
                    ..Default::default()
                })
            })
        })
    }

    fn iface(name: &str, numa: u32, class: DeviceClass) -> FabricInterface {
        FabricInterface {
            name: name.to_string(),
            domain: name.to_string(),
            provider: "ofi+tcp".to_string(),
            numa_node: numa,
            device_class: class,
        }
    }

    #[tokio::test]
    async fn test_attach_key_includes_system() {
        let fetch = counted_attach_fetch(Arc::default(), Arc::default());
        let entry = CachedAttachInfo::new(Duration::ZERO, "sysA", fetch.clone());
        assert_eq!(entry.key(), "AttachInfo-sysA");

        let entry = CachedAttachInfo::new(Duration::ZERO, "", fetch);
        assert_eq!(entry.key(), "AttachInfo");
    }

    #[tokio::test]
    async fn test_zero_interval_never_auto_stale() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counted_attach_fetch(calls.clone(), Arc::default());
        let mut item = CacheItem::AttachInfo(CachedAttachInfo::new(Duration::ZERO, "a", fetch));

        assert!(item.refresh_if_needed().await.unwrap());
        for _ in 0..5 {
            assert!(!item.refresh_if_needed().await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_triggers_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counted_attach_fetch(calls.clone(), Arc::default());
        let interval = Duration::from_secs(10);
        let mut item = CacheItem::AttachInfo(CachedAttachInfo::new(interval, "a", fetch));

        assert!(item.refresh_if_needed().await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!item.refresh_if_needed().await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(item.refresh_if_needed().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_preserves_content_and_timestamp() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let fetch = counted_attach_fetch(calls.clone(), fail.clone());
        let mut entry = CachedAttachInfo::new(Duration::from_secs(10), "a", fetch);

        entry.refresh().await.unwrap();
        let cached_at = entry.state.last_cached;
        let version = entry.record().unwrap().data_version;

        tokio::time::advance(Duration::from_secs(11)).await;
        fail.store(true, Ordering::SeqCst);
        let err = entry.refresh().await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));

        assert_eq!(entry.state.last_cached, cached_at);
        assert_eq!(entry.record().unwrap().data_version, version);
    }

    #[tokio::test]
    async fn test_record_before_first_fetch_is_uninitialized() {
        let fetch = counted_attach_fetch(Arc::default(), Arc::default());
        let entry = CachedAttachInfo::new(Duration::ZERO, "a", fetch);
        assert!(matches!(
            entry.record().unwrap_err(),
            CacheError::Uninitialized(_)
        ));
    }

    #[tokio::test]
    async fn test_fabric_refresh_filters_device_class() {
        let fetch: FabricFetchFn = Arc::new(|_| {
            Box::pin(async {
                let map: NumaFabricMap = [
                    iface("eth0", 0, DeviceClass::Ether),
                    iface("ib0", 0, DeviceClass::Infiniband),
                    iface("ib1", 1, DeviceClass::Infiniband),
                ]
                .into_iter()
                .collect();
                Ok(Arc::new(NumaFabric::new(map)))
            })
        });
        let mut entry = CachedFabricInfo::new(fetch, DeviceClass::Infiniband, vec![]);

        entry.refresh().await.unwrap();

        let nf = entry.fabric().unwrap();
        let map = nf.rlocked_map().await;
        assert_eq!(map.device_count(), 2);
        assert!(map.values().flatten().all(|fi| fi.name.starts_with("ib")));
    }

    #[tokio::test]
    async fn test_fabric_never_auto_stale_once_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_fetch = calls.clone();
        let fetch: FabricFetchFn = Arc::new(move |_| {
            let calls = calls_in_fetch.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(NumaFabric::new(NumaFabricMap::new())))
            })
        });
        let mut item = CacheItem::Fabric(CachedFabricInfo::new(
            fetch,
            DeviceClass::Unknown,
            vec![],
        ));

        assert!(item.refresh_if_needed().await.unwrap());
        assert!(!item.refresh_if_needed().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Only a forced refresh rescans.
        item.refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_fabric_entry_is_pre_cached() {
        let map: NumaFabricMap = [iface("eth0", 0, DeviceClass::Ether)].into_iter().collect();
        let nf = Arc::new(NumaFabric::new(map));
        let mut item = CacheItem::Fabric(CachedFabricInfo::new_static(nf));

        assert!(!item.refresh_if_needed().await.unwrap());

        // Even a forced refresh serves the seeded constant.
        item.refresh().await.unwrap();
        let CacheItem::Fabric(entry) = &item else {
            unreachable!()
        };
        let map = entry.fabric().unwrap();
        let locked = map.rlocked_map().await;
        assert_eq!(locked.device_count(), 1);
    }

    #[tokio::test]
    async fn test_entry_kind_accessors() {
        let fetch = counted_attach_fetch(Arc::default(), Arc::default());
        let item = CacheItem::AttachInfo(CachedAttachInfo::new(Duration::ZERO, "a", fetch));

        assert!(item.as_attach_info().is_ok());
        assert!(matches!(
            item.as_fabric().unwrap_err(),
            CacheError::InvariantViolation(_)
        ));
    }
}
