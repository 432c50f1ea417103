// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Local network hardware abstractions
//!
//! Collaborator interfaces for enumerating and classifying local network
//! interfaces, plus the readiness wait that gates the first fabric scan.
//! Concrete implementations (sysfs, libfabric, test doubles) are injected
//! by the owning process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CollaboratorError, Result};

/// Default sleep between readiness poll iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default overall deadline for the readiness wait
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Category of network transport hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Ether,
    Infiniband,
    Loopback,
    Unknown,
}

impl Default for DeviceClass {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ether => write!(f, "ether"),
            Self::Infiniband => write!(f, "infiniband"),
            Self::Loopback => write!(f, "loopback"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Operational state of a network device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDevState {
    /// State could not be determined; treated as not yet ready
    Unknown,
    /// Device is administratively down or otherwise unusable
    Down,
    /// Device is up but not yet usable for fabric traffic
    NotReady,
    /// Device is usable
    Ready,
}

/// A local network interface as reported by the lister
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
}

/// Enumerates local network interfaces
pub trait NetInterfaceLister: Send + Sync {
    fn interfaces(&self) -> std::result::Result<Vec<NetInterface>, CollaboratorError>;
}

/// Classifies a local interface by transport hardware type
pub trait NetDevClassProvider: Send + Sync {
    fn device_class(&self, iface: &str) -> std::result::Result<DeviceClass, CollaboratorError>;
}

/// Reports the operational state of a local interface
pub trait NetDevStateProvider: Send + Sync {
    fn device_state(&self, iface: &str) -> std::result::Result<NetDevState, CollaboratorError>;
}

/// Parameters for [`wait_fabric_ready`]
pub struct WaitFabricReadyParams {
    pub state_provider: Arc<dyn NetDevStateProvider>,
    pub fabric_ifaces: Vec<String>,
    /// Drop unusable (down) interfaces from the wait set instead of failing
    pub ignore_unusable: bool,
    /// Sleep between poll iterations; zero selects [`DEFAULT_POLL_INTERVAL`]
    pub poll_interval: Duration,
    /// Overall deadline; zero selects [`DEFAULT_READY_TIMEOUT`]
    pub max_wait: Duration,
}

/// Polls the named interfaces until every usable one reports ready.
///
/// Returns [`CacheError::ReadinessTimeout`] when the deadline elapses first,
/// and a fetch error when no usable interface remains in the wait set.
pub async fn wait_fabric_ready(params: WaitFabricReadyParams) -> Result<()> {
    if params.fabric_ifaces.is_empty() {
        return Err(CacheError::Fetch("no fabric interfaces requested".into()));
    }

    let poll_interval = if params.poll_interval.is_zero() {
        DEFAULT_POLL_INTERVAL
    } else {
        params.poll_interval
    };
    let max_wait = if params.max_wait.is_zero() {
        DEFAULT_READY_TIMEOUT
    } else {
        params.max_wait
    };

    let provider = params.state_provider;
    let ignore_unusable = params.ignore_unusable;
    let mut pending = params.fabric_ifaces;

    let wait_loop = async move {
        let mut ready_count = 0usize;
        loop {
            let mut not_ready = Vec::new();
            for iface in pending {
                match provider.device_state(&iface)? {
                    NetDevState::Ready => {
                        tracing::trace!("fabric interface {} is ready", iface);
                        ready_count += 1;
                    }
                    NetDevState::Down => {
                        if !ignore_unusable {
                            return Err(CacheError::Fetch(
                                format!("fabric interface {iface} is unusable").into(),
                            ));
                        }
                        tracing::debug!("ignoring unusable fabric interface {}", iface);
                    }
                    NetDevState::NotReady | NetDevState::Unknown => {
                        not_ready.push(iface);
                    }
                }
            }

            if not_ready.is_empty() {
                if ready_count == 0 {
                    return Err(CacheError::Fetch("no usable fabric interfaces".into()));
                }
                return Ok(());
            }

            tracing::debug!(
                "waiting for {} fabric interface(s) to become ready: {:?}",
                not_ready.len(),
                not_ready
            );
            pending = not_ready;
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(max_wait, wait_loop).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::ReadinessTimeout(max_wait)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted state provider: pops one state per query, repeats the last.
    struct ScriptedStates {
        states: Mutex<HashMap<String, Vec<NetDevState>>>,
    }

    impl ScriptedStates {
        fn new(script: &[(&str, &[NetDevState])]) -> Arc<Self> {
            let states = script
                .iter()
                .map(|(name, s)| ((*name).to_string(), s.to_vec()))
                .collect();
            Arc::new(Self {
                states: Mutex::new(states),
            })
        }
    }

    impl NetDevStateProvider for ScriptedStates {
        fn device_state(
            &self,
            iface: &str,
        ) -> std::result::Result<NetDevState, CollaboratorError> {
            let mut states = self.states.lock().unwrap();
            let seq = states
                .get_mut(iface)
                .ok_or_else(|| format!("unexpected interface {iface}"))?;
            if seq.len() > 1 {
                Ok(seq.remove(0))
            } else {
                Ok(seq[0])
            }
        }
    }

    fn params(provider: Arc<ScriptedStates>, ifaces: &[&str]) -> WaitFabricReadyParams {
        WaitFabricReadyParams {
            state_provider: provider,
            fabric_ifaces: ifaces.iter().map(|s| (*s).to_string()).collect(),
            ignore_unusable: true,
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_wait_ready_immediately() {
        let provider = ScriptedStates::new(&[("eth0", &[NetDevState::Ready])]);
        wait_fabric_ready(params(provider, &["eth0"])).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_after_polling() {
        let provider = ScriptedStates::new(&[(
            "eth0",
            &[
                NetDevState::NotReady,
                NetDevState::NotReady,
                NetDevState::Ready,
            ],
        )]);
        wait_fabric_ready(params(provider, &["eth0"])).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let provider = ScriptedStates::new(&[
            ("eth0", &[NetDevState::NotReady]),
            ("eth1", &[NetDevState::NotReady]),
        ]);
        let err = wait_fabric_ready(params(provider, &["eth0", "eth1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ReadinessTimeout(_)));
    }

    #[tokio::test]
    async fn test_unusable_interfaces_ignored() {
        let provider = ScriptedStates::new(&[
            ("eth0", &[NetDevState::Down]),
            ("eth1", &[NetDevState::Ready]),
        ]);
        wait_fabric_ready(params(provider, &["eth0", "eth1"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_all_unusable_fails() {
        let provider = ScriptedStates::new(&[("eth0", &[NetDevState::Down])]);
        let err = wait_fabric_ready(params(provider, &["eth0"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_unusable_fails_when_not_ignored() {
        let provider = ScriptedStates::new(&[("eth0", &[NetDevState::Down])]);
        let mut p = params(provider, &["eth0"]);
        p.ignore_unusable = false;
        let err = wait_fabric_ready(p).await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_no_interfaces_requested() {
        let provider = ScriptedStates::new(&[]);
        let err = wait_fabric_ready(params(provider, &[])).await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_resurfacing_not_repolled() {
        // A down interface is dropped permanently even if a later poll
        // would have reported it ready.
        let provider = ScriptedStates::new(&[
            ("eth0", &[NetDevState::Down, NetDevState::Ready]),
            ("eth1", &[NetDevState::NotReady, NetDevState::Ready]),
        ]);
        wait_fabric_ready(params(provider, &["eth0", "eth1"]))
            .await
            .unwrap();
    }

    #[test]
    fn test_device_class_display() {
        assert_eq!(DeviceClass::Ether.to_string(), "ether");
        assert_eq!(DeviceClass::Infiniband.to_string(), "infiniband");
        assert_eq!(DeviceClass::Loopback.to_string(), "loopback");
        assert_eq!(DeviceClass::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_device_class_serde_round_trip() {
        let json = serde_json::to_string(&DeviceClass::Infiniband).unwrap();
        assert_eq!(json, "\"infiniband\"");
        let back: DeviceClass = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DeviceClass::Infiniband);
    }
}
