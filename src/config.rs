//! Device Runtime Configuration
//!
//! All tunables of the device runtime live in [`DeviceConfig`], which is
//! passed explicitly to [`DeviceThread::new`](crate::device::DeviceThread::new)
//! and from there to the registry, copy queue and caches.
//!
//! ```rust,ignore
//! use myth_device::config::DeviceConfig;
//!
//! // Small staging pool for a tool that only uploads thumbnails
//! let config = DeviceConfig {
//!     staging_pool_size: 16 << 20,
//!     copy_worker_threads: 1,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use std::time::Duration;

use crate::errors::{DeviceError, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Configuration of a device thread and the systems it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Number of slots in the object registry. The registry never grows;
    /// running out of slots is fatal.
    pub object_capacity: u32,

    /// Total size of the upload staging pool in bytes.
    pub staging_pool_size: u64,
    /// Allocation granularity of the staging pool. Must be a power of two
    /// that divides `staging_pool_size`.
    pub staging_page_size: u64,
    /// Worker threads used for the asynchronous source-to-staging writes.
    pub copy_worker_threads: usize,
    /// Sleep between polls while [`CopyQueue::stop`](crate::copy::CopyQueue::stop)
    /// waits for in-flight writes.
    pub stop_poll_interval: Duration,

    /// Download (readback) areas are rounded up to this size. Power of two.
    pub download_granularity: u64,
    /// Idle download areas beyond this many bytes are destroyed instead of
    /// being returned to the free list.
    pub download_retained_limit: u64,
    /// Idle download areas unused for this many frames are trimmed.
    pub download_max_idle_frames: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            object_capacity: 65_536,
            staging_pool_size: 256 * MIB,
            staging_page_size: 4 * KIB,
            copy_worker_threads: 2,
            stop_poll_interval: Duration::from_millis(100),
            download_granularity: 64 * KIB,
            download_retained_limit: 16 * MIB,
            download_max_idle_frames: 8,
        }
    }
}

impl DeviceConfig {
    /// Checks every value for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.object_capacity == 0 {
            return Err(DeviceError::InvalidConfig(
                "object_capacity must be greater than zero".into(),
            ));
        }
        if !self.staging_page_size.is_power_of_two() {
            return Err(DeviceError::InvalidConfig(format!(
                "staging_page_size must be a power of two (got {})",
                self.staging_page_size
            )));
        }
        if self.staging_pool_size < self.staging_page_size
            || self.staging_pool_size % self.staging_page_size != 0
        {
            return Err(DeviceError::InvalidConfig(format!(
                "staging_pool_size ({}) must be a non-zero multiple of staging_page_size ({})",
                self.staging_pool_size, self.staging_page_size
            )));
        }
        if self.staging_pool_size / self.staging_page_size > u64::from(u32::MAX) {
            return Err(DeviceError::InvalidConfig(
                "staging pool has too many pages".into(),
            ));
        }
        if self.copy_worker_threads == 0 {
            return Err(DeviceError::InvalidConfig(
                "copy_worker_threads must be at least 1".into(),
            ));
        }
        if !self.download_granularity.is_power_of_two() {
            return Err(DeviceError::InvalidConfig(format!(
                "download_granularity must be a power of two (got {})",
                self.download_granularity
            )));
        }
        Ok(())
    }

    /// Number of pages in the staging pool.
    #[inline]
    #[must_use]
    pub fn staging_page_count(&self) -> u32 {
        (self.staging_pool_size / self.staging_page_size) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_page_count(), 65_536);
    }

    #[test]
    fn test_rejects_non_pow2_page() {
        let config = DeviceConfig {
            staging_page_size: 3000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DeviceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_pool_not_multiple_of_page() {
        let config = DeviceConfig {
            staging_pool_size: 4096 * 3 + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_capacity_and_workers() {
        let config = DeviceConfig {
            object_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeviceConfig {
            copy_worker_threads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
