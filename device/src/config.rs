//! Discovery configuration.
//!
//! Provides typed configuration with bon builders and environment variable
//! fallbacks.

use bon::bon;

use crate::backend::DeviceKind;
use crate::error::{InvalidConfigSnafu, Result};
use crate::selection::{SelectionPolicy, VendorAllowList};

/// Comma-separated vendor tokens for the platform allow-list (`*` keeps every platform).
pub const ENV_PLATFORM_VENDORS: &str = "LUMEN_PLATFORM_VENDORS";
/// Device class contexts are created for: `gpu`, `cpu`, `accelerator` or `all`.
pub const ENV_DEVICE_KIND: &str = "LUMEN_DEVICE_KIND";
/// Index of the execution target selected after discovery.
pub const ENV_DEVICE_INDEX: &str = "LUMEN_DEVICE_INDEX";

/// Configuration consumed by [`crate::discover`].
#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    /// Device class each platform context is created for.
    pub device_kind: DeviceKind,
    /// Which platforms keep their context.
    pub policy: SelectionPolicy,
    /// Execution target that becomes current after discovery.
    pub device_index: usize,
}

#[bon]
impl CatalogConfig {
    /// Create a configuration with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default)] device_kind: DeviceKind,
        #[builder(default)] policy: SelectionPolicy,
        #[builder(default)] device_index: usize,
    ) -> Self {
        Self { device_kind, policy, device_index }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `LUMEN_PLATFORM_VENDORS` - Vendor allow-list (default: `nvidia,amd`)
    /// * `LUMEN_DEVICE_KIND` - Device class (default: `gpu`)
    /// * `LUMEN_DEVICE_INDEX` - Initial execution target (default: 0)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`CatalogConfig::from_env`] with an explicit variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(vendors) = lookup(ENV_PLATFORM_VENDORS) {
            config.policy = parse_policy(&vendors)?;
        }
        if let Some(kind) = lookup(ENV_DEVICE_KIND) {
            config.device_kind = parse_device_kind(&kind)?;
        }
        if let Some(index) = lookup(ENV_DEVICE_INDEX) {
            config.device_index = index
                .trim()
                .parse()
                .map_err(|_| InvalidConfigSnafu { key: ENV_DEVICE_INDEX, value: index.clone() }.build())?;
        }

        Ok(config)
    }
}

fn parse_policy(value: &str) -> Result<SelectionPolicy> {
    if value.trim() == "*" {
        return Ok(SelectionPolicy::Any);
    }

    let list = VendorAllowList::new(value.split(','));
    snafu::ensure!(!list.tokens().is_empty(), InvalidConfigSnafu { key: ENV_PLATFORM_VENDORS, value });
    Ok(SelectionPolicy::AllowList(list))
}

fn parse_device_kind(value: &str) -> Result<DeviceKind> {
    match value.trim().to_lowercase().as_str() {
        "gpu" => Ok(DeviceKind::Gpu),
        "cpu" => Ok(DeviceKind::Cpu),
        "accelerator" | "acc" => Ok(DeviceKind::Accelerator),
        "all" => Ok(DeviceKind::All),
        _ => InvalidConfigSnafu { key: ENV_DEVICE_KIND, value }.fail(),
    }
}
