// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Configuration for the agent info cache
//!
//! Loads and parses configuration from environment variables and JSON.

use serde::Deserialize;

use crate::hardware::DeviceClass;


/// Default configuration values
pub mod defaults {
    /// System name used when a caller requests attach info with an empty one
    pub const SYSTEM_NAME: &str = "meshstore";
    pub const CACHE_EXPIRATION_SECS: u64 = 0;
}

/// Environment variable names used by the cache
pub mod env_vars {
    pub const SYSTEM_NAME: &str = "MESHSTORE_SYSTEM_NAME";
    pub const DISABLE_CACHE: &str = "MESHSTORE_DISABLE_CACHE";
    pub const CACHE_EXPIRATION_SECS: &str = "MESHSTORE_CACHE_EXPIRATION_SECONDS";
    pub const FABRIC_IFACES: &str = "MESHSTORE_FABRIC_IFACES";
    pub const EXCLUDE_FABRIC_IFACES: &str = "MESHSTORE_EXCLUDE_FABRIC_IFACES";
    pub const INCLUDE_FABRIC_IFACES: &str = "MESHSTORE_INCLUDE_FABRIC_IFACES";
    pub const PROVIDERS: &str = "MESHSTORE_PROVIDERS";
    pub const TELEMETRY_ENABLED: &str = "MESHSTORE_TELEMETRY_ENABLED";
    pub const TELEMETRY_RETAIN_SECS: &str = "MESHSTORE_TELEMETRY_RETAIN_SECONDS";
}

/// A statically configured fabric interface, used to seed the fabric cache
/// without a hardware scan
#[derive(Debug, Clone, Deserialize)]
pub struct FabricInterfaceConfig {
    pub interface: String,
    /// Defaults to the interface name when omitted
    pub domain: Option<String>,
    pub provider: String,
    pub numa_node: u32,
    pub device_class: DeviceClass,
}

impl FabricInterfaceConfig {
    /// Validates a statically configured fabric interface
    pub fn validate(&self) -> Result<(), String> {
        if self.interface.trim().is_empty() {
            return Err("fabric interface name cannot be empty".to_string());
        }
        if self.provider.trim().is_empty() {
            return Err(format!(
                "provider cannot be empty for fabric interface '{}'",
                self.interface
            ));
        }
        Ok(())
    }
}

/// Cache-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub system_name: String,
    /// Disables both sub-caches at construction
    pub disable_cache: bool,
    /// Attach info refresh interval in seconds; zero means never auto-stale
    pub cache_expiration_secs: u64,
    /// Statically configured fabric interfaces; non-empty enables the
    /// static fabric cache instead of hardware scans
    pub fabric_interfaces: Vec<FabricInterfaceConfig>,
    /// Fabric interfaces excluded from scan results (takes precedence over
    /// the include list)
    pub exclude_fabric_ifaces: Vec<String>,
    /// When non-empty, only these interfaces are kept from scan results
    pub include_fabric_ifaces: Vec<String>,
    /// Additional fabric providers included in every scan
    pub providers: Vec<String>,
    pub telemetry_enabled: bool,
    /// Retention period for client metrics; non-zero also sets the retain
    /// flag in augmented responses
    pub telemetry_retain_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            system_name: defaults::SYSTEM_NAME.to_string(),
            disable_cache: false,
            cache_expiration_secs: defaults::CACHE_EXPIRATION_SECS,
            fabric_interfaces: vec![],
            exclude_fabric_ifaces: vec![],
            include_fabric_ifaces: vec![],
            providers: vec![],
            telemetry_enabled: false,
            telemetry_retain_secs: 0,
        }
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl Config {
    /// Loads configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let system_name = std::env::var(env_vars::SYSTEM_NAME)
            .unwrap_or_else(|_| defaults::SYSTEM_NAME.to_string());

        // Static fabric interface list is a JSON payload
        let fabric_interfaces: Vec<FabricInterfaceConfig> =
            if let Ok(config_json) = std::env::var(env_vars::FABRIC_IFACES) {
                serde_json::from_str(&config_json).unwrap_or_else(|e| {
                    tracing::warn!(
                        "Failed to parse {}: {}. Using empty list.",
                        env_vars::FABRIC_IFACES,
                        e
                    );
                    vec![]
                })
            } else {
                vec![]
            };

        // Validate all static fabric interface entries
        for iface in &fabric_interfaces {
            if let Err(e) = iface.validate() {
                tracing::error!("Invalid fabric interface configuration: {}", e);
            }
        }

        Config {
            system_name,
            disable_cache: env_bool(env_vars::DISABLE_CACHE),
            cache_expiration_secs: env_u64(
                env_vars::CACHE_EXPIRATION_SECS,
                defaults::CACHE_EXPIRATION_SECS,
            ),
            fabric_interfaces,
            exclude_fabric_ifaces: env_list(env_vars::EXCLUDE_FABRIC_IFACES),
            include_fabric_ifaces: env_list(env_vars::INCLUDE_FABRIC_IFACES),
            providers: env_list(env_vars::PROVIDERS),
            telemetry_enabled: env_bool(env_vars::TELEMETRY_ENABLED),
            telemetry_retain_secs: env_u64(env_vars::TELEMETRY_RETAIN_SECS, 0),
        }
    }
}
