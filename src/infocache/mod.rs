// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Refreshable info cache for the meshstore client agent
//!
//! Caches the results of the two expensive discovery operations the agent
//! performs on behalf of client processes: fetching attachment metadata from
//! the cluster management service, and scanning local hardware for usable
//! fabric interfaces. Each sub-cache can be disabled independently without
//! evicting what is already cached.

mod entry;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::attach::{AttachInfo, AttachInfoFetcher, GetAttachInfoRequest};
use crate::cache::ItemCache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fabric::{
    DeviceFilter, FabricIfaceParams, FabricInterface, FabricScanner, FilterMode, NumaFabric,
    NumaFabricReadGuard,
};
use crate::hardware::{
    self, DeviceClass, NetDevClassProvider, NetDevStateProvider, NetInterfaceLister,
    WaitFabricReadyParams,
};
use crate::metrics::{
    CLIENT_METRICS_ENABLED_ENV, CLIENT_METRICS_RETAIN_ENV, CacheLabels, CacheMetrics,
};

use entry::{
    ATTACH_INFO_KEY, AttachFetchFn, CacheItem, CachedAttachInfo, CachedFabricInfo, FABRIC_KEY,
    FabricFetchFn, sys_attach_info_key,
};

/// Injected collaborator interfaces for [`InfoCache`]
pub struct InfoCacheDeps {
    pub fetcher: Arc<dyn AttachInfoFetcher>,
    pub scanner: Arc<dyn FabricScanner>,
    pub lister: Arc<dyn NetInterfaceLister>,
    pub class_provider: Arc<dyn NetDevClassProvider>,
    pub state_provider: Arc<dyn NetDevStateProvider>,
}

/// Client telemetry flags, shared with the attach fetch closures
struct TelemetrySettings {
    enabled: AtomicBool,
    retain: AtomicBool,
}

impl TelemetrySettings {
    /// Appends the client metrics environment variables to a freshly fetched
    /// response. Runs once per successful remote fetch, never on cache hits,
    /// so repeated reads stay idempotent.
    fn augment(&self, resp: &mut AttachInfo) {
        if self.enabled.load(Ordering::SeqCst) {
            resp.client_net_hint
                .env_vars
                .push(format!("{CLIENT_METRICS_ENABLED_ENV}=1"));
            if self.retain.load(Ordering::SeqCst) {
                resp.client_net_hint
                    .env_vars
                    .push(format!("{CLIENT_METRICS_RETAIN_ENV}=1"));
            }
        }
    }
}

/// Cache for the results of expensive discovery operations needed by the agent
pub struct InfoCache {
    cache: ItemCache<CacheItem>,
    attach_info_cache_disabled: AtomicBool,
    fabric_cache_disabled: AtomicBool,
    telemetry: Arc<TelemetrySettings>,

    fetcher: Arc<dyn AttachInfoFetcher>,
    scanner: Arc<dyn FabricScanner>,
    lister: Arc<dyn NetInterfaceLister>,
    class_provider: Arc<dyn NetDevClassProvider>,
    state_provider: Arc<dyn NetDevStateProvider>,

    default_system: String,
    attach_refresh: StdMutex<Duration>,
    providers: StdMutex<BTreeSet<String>>,
    device_filter: Option<DeviceFilter>,
    metrics: CacheMetrics,
}

impl InfoCache {
    /// Creates a new cache wired to the given collaborators, honoring the
    /// configuration's disable flags, attach TTL, telemetry flags and static
    /// fabric seed.
    #[must_use]
    pub fn new(cfg: &Config, deps: InfoCacheDeps) -> Self {
        let device_filter = if !cfg.exclude_fabric_ifaces.is_empty() {
            Some(DeviceFilter::new(
                FilterMode::Exclude,
                cfg.exclude_fabric_ifaces.clone(),
            ))
        } else if !cfg.include_fabric_ifaces.is_empty() {
            Some(DeviceFilter::new(
                FilterMode::Include,
                cfg.include_fabric_ifaces.clone(),
            ))
        } else {
            None
        };

        let ic = Self {
            cache: ItemCache::new(),
            attach_info_cache_disabled: AtomicBool::new(false),
            fabric_cache_disabled: AtomicBool::new(false),
            telemetry: Arc::new(TelemetrySettings {
                enabled: AtomicBool::new(cfg.telemetry_enabled),
                retain: AtomicBool::new(cfg.telemetry_retain_secs > 0),
            }),
            fetcher: deps.fetcher,
            scanner: deps.scanner,
            lister: deps.lister,
            class_provider: deps.class_provider,
            state_provider: deps.state_provider,
            default_system: cfg.system_name.clone(),
            attach_refresh: StdMutex::new(Duration::from_secs(cfg.cache_expiration_secs)),
            providers: StdMutex::new(cfg.providers.iter().cloned().collect()),
            device_filter,
            metrics: CacheMetrics::new(),
        };

        if cfg.disable_cache {
            ic.disable_attach_info_cache();
            ic.disable_fabric_cache();
            return ic;
        }

        ic.enable_attach_info_cache(Duration::from_secs(cfg.cache_expiration_secs));
        if cfg.fabric_interfaces.is_empty() {
            ic.enable_fabric_cache();
        } else {
            ic.enable_static_fabric_cache(NumaFabric::from_config(&cfg.fabric_interfaces));
        }

        ic
    }

    /// Registers an additional fabric provider to include in future scans.
    pub fn add_provider(&self, provider: &str) {
        if provider.is_empty() {
            return;
        }
        self.providers
            .lock()
            .expect("provider set lock")
            .insert(provider.to_string());
    }

    /// Checks whether the attach info sub-cache is enabled.
    pub fn is_attach_info_cache_enabled(&self) -> bool {
        !self.attach_info_cache_disabled.load(Ordering::SeqCst)
    }

    /// Fully disables the attach info sub-cache. Cached entries survive.
    pub fn disable_attach_info_cache(&self) {
        self.attach_info_cache_disabled.store(true, Ordering::SeqCst);
    }

    /// Enables the attach info sub-cache with the given refresh interval.
    pub fn enable_attach_info_cache(&self, interval: Duration) {
        *self.attach_refresh.lock().expect("attach interval lock") = interval;
        self.attach_info_cache_disabled
            .store(false, Ordering::SeqCst);
    }

    /// Checks whether the fabric sub-cache is enabled.
    pub fn is_fabric_cache_enabled(&self) -> bool {
        !self.fabric_cache_disabled.load(Ordering::SeqCst)
    }

    /// Fully disables the fabric sub-cache. Cached entries survive.
    pub fn disable_fabric_cache(&self) {
        self.fabric_cache_disabled.store(true, Ordering::SeqCst);
    }

    /// Enables the refreshable local fabric sub-cache.
    pub fn enable_fabric_cache(&self) {
        self.fabric_cache_disabled.store(false, Ordering::SeqCst);
    }

    /// Installs a pre-cached fabric topology that is never rescanned and
    /// enables the fabric sub-cache.
    pub fn enable_static_fabric_cache(&self, nf: NumaFabric) {
        self.cache
            .set(CacheItem::Fabric(CachedFabricInfo::new_static(Arc::new(nf))));
        self.enable_fabric_cache();
    }

    /// Cache effectiveness counters, for the owning agent to expose.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// The attach fetch bound to the RPC fetcher, with provider validation
    /// and telemetry augmentation applied to every successful fetch.
    fn attach_fetch_fn(&self) -> AttachFetchFn {
        let fetcher = self.fetcher.clone();
        let telemetry = self.telemetry.clone();
        Arc::new(move |req| {
            let fetcher = fetcher.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                let mut resp = fetcher.fetch(&req).await.map_err(CacheError::from)?;
                if resp.client_net_hint.provider.is_empty() {
                    return Err(CacheError::Validation(
                        "response contained no provider".to_string(),
                    ));
                }
                telemetry.augment(&mut resp);
                Ok(resp)
            })
        })
    }

    /// Fetches the attach info for a system, from the cache when enabled.
    ///
    /// The returned record is a deep copy, independently mutable by the
    /// caller.
    pub async fn get_attach_info(&self, system: &str) -> Result<AttachInfo> {
        if !self.is_attach_info_cache_enabled() {
            return self.get_attach_info_remote(system).await;
        }

        // Use the default system if none is specified.
        let system = if system.is_empty() {
            self.default_system.as_str()
        } else {
            system
        };
        let key = sys_attach_info_key(system);
        let interval = *self.attach_refresh.lock().expect("attach interval lock");
        let fetch = self.attach_fetch_fn();

        let missed = AtomicBool::new(false);
        let guard = self
            .cache
            .get_or_create(&key, || async {
                missed.store(true, Ordering::SeqCst);
                Ok(CacheItem::AttachInfo(CachedAttachInfo::new(
                    interval, system, fetch,
                )))
            })
            .await?;

        let labels = CacheLabels::attach_info();
        if missed.load(Ordering::SeqCst) {
            self.metrics.record_miss(&labels);
        } else {
            self.metrics.record_hit(&labels);
        }

        Ok(guard.as_attach_info()?.record()?.clone())
    }

    /// Uncached fetch used while the attach info sub-cache is disabled.
    ///
    /// Always asks for all ranks, regardless of the caller's scope, so that
    /// a later cache-enabled call can reuse a broad result.
    async fn get_attach_info_remote(&self, system: &str) -> Result<AttachInfo> {
        tracing::debug!("attach info not cached, fetching directly from management service");
        let system = if system.is_empty() {
            self.default_system.as_str()
        } else {
            system
        };
        let req = GetAttachInfoRequest {
            system: system.to_string(),
            all_ranks: true,
        };
        (self.attach_fetch_fn())(req).await
    }

    /// Requested providers first, then the registered ones.
    fn scan_providers(&self, requested: &[String]) -> Vec<String> {
        let mut provs: Vec<String> = requested
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        let registered = self.providers.lock().expect("provider set lock");
        for prov in registered.iter() {
            if !provs.contains(prov) {
                provs.push(prov.clone());
            }
        }
        provs
    }

    /// The fabric fetch bound to the scanner and the configured name filter.
    fn fabric_fetch_fn(&self) -> FabricFetchFn {
        let scanner = self.scanner.clone();
        let filter = self.device_filter.clone();
        Arc::new(move |providers| {
            let scanner = scanner.clone();
            let filter = filter.clone();
            Box::pin(async move {
                let map = scanner.scan(&providers).await.map_err(CacheError::from)?;
                Ok(Arc::new(NumaFabric::from_scan(map, filter.as_ref())))
            })
        })
    }

    /// Blocks until the local interfaces of the requested class are ready.
    async fn wait_fabric_ready(&self, dev_class: DeviceClass) -> Result<()> {
        let ifaces = self.lister.interfaces().map_err(CacheError::from)?;

        let mut need_ifaces = Vec::new();
        for iface in ifaces {
            let class = self
                .class_provider
                .device_class(&iface.name)
                .map_err(CacheError::from)?;
            if class == dev_class {
                need_ifaces.push(iface.name);
            }
        }

        if need_ifaces.is_empty() {
            tracing::debug!("no interfaces with device class {} to wait for", dev_class);
            return Ok(());
        }

        hardware::wait_fabric_ready(WaitFabricReadyParams {
            state_provider: self.state_provider.clone(),
            fabric_ifaces: need_ifaces,
            ignore_unusable: true,
            poll_interval: hardware::DEFAULT_POLL_INTERVAL,
            max_wait: hardware::DEFAULT_READY_TIMEOUT,
        })
        .await
    }

    /// Resolves the fabric topology, from the cache when enabled.
    async fn get_numa_fabric(
        &self,
        dev_class: DeviceClass,
        requested_providers: &[String],
    ) -> Result<Arc<NumaFabric>> {
        let providers = self.scan_providers(requested_providers);

        if !self.is_fabric_cache_enabled() {
            tracing::debug!("fabric not cached, rescanning");
            self.wait_fabric_ready(dev_class).await?;
            return (self.fabric_fetch_fn())(providers).await;
        }

        let missed = AtomicBool::new(false);
        let guard = self
            .cache
            .get_or_create(FABRIC_KEY, || async {
                missed.store(true, Ordering::SeqCst);
                self.wait_fabric_ready(dev_class).await?;
                Ok(CacheItem::Fabric(CachedFabricInfo::new(
                    self.fabric_fetch_fn(),
                    dev_class,
                    providers,
                )))
            })
            .await?;

        let labels = CacheLabels::fabric();
        if missed.load(Ordering::SeqCst) {
            self.metrics.record_miss(&labels);
        } else {
            self.metrics.record_hit(&labels);
        }

        guard.as_fabric()?.fabric()
    }

    /// Returns a fabric device satisfying `params`, scanning or consulting
    /// the cache as needed.
    ///
    /// A named interface is an exact-match lookup; otherwise the topology
    /// map's selection policy picks a device by provider and NUMA affinity.
    pub async fn get_fabric_device(&self, params: &FabricIfaceParams) -> Result<FabricInterface> {
        let providers = if params.provider.is_empty() {
            Vec::new()
        } else {
            vec![params.provider.clone()]
        };
        let nf = self.get_numa_fabric(params.dev_class, &providers).await?;

        match &params.interface {
            Some(name) => nf.find_device(name, params).await,
            None => nf.get_device(params).await,
        }
    }

    /// Read-locked view of the fabric map for a device class and providers.
    /// The lock is released when the returned guard drops.
    pub async fn get_numa_fabric_map(
        &self,
        dev_class: DeviceClass,
        providers: &[String],
    ) -> Result<NumaFabricReadGuard> {
        let nf = self.get_numa_fabric(dev_class, providers).await?;
        Ok(nf.rlocked_map().await)
    }

    /// Forces a refresh of every tracked key belonging to an enabled
    /// sub-cache. Fails when both sub-caches are disabled.
    pub async fn refresh(&self) -> Result<()> {
        if !self.is_attach_info_cache_enabled() && !self.is_fabric_cache_enabled() {
            return Err(CacheError::CachesDisabled);
        }

        let mut fabric_keys = Vec::new();
        if self.is_fabric_cache_enabled() && self.cache.has(FABRIC_KEY) {
            fabric_keys.push(FABRIC_KEY.to_string());
        }
        let mut attach_keys = Vec::new();
        if self.is_attach_info_cache_enabled() {
            attach_keys.extend(
                self.cache
                    .keys()
                    .into_iter()
                    .filter(|k| k.starts_with(ATTACH_INFO_KEY)),
            );
        }

        tracing::debug!("refreshing cache keys: {:?} {:?}", fabric_keys, attach_keys);
        let (fabric_result, attach_result) = tokio::join!(
            self.cache.refresh(&fabric_keys),
            self.cache.refresh(&attach_keys)
        );

        let fabric_labels = CacheLabels::fabric();
        self.metrics
            .record_refreshes(&fabric_labels, fabric_keys.len() as u64);
        if fabric_result.is_err() {
            self.metrics.record_refresh_error(&fabric_labels);
        }
        let attach_labels = CacheLabels::attach_info();
        self.metrics
            .record_refreshes(&attach_labels, attach_keys.len() as u64);
        if attach_result.is_err() {
            self.metrics.record_refresh_error(&attach_labels);
        }

        fabric_result.and(attach_result)
    }
}
