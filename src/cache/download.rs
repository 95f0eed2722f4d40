//! Download Area Pool
//!
//! Scratch readback buffers for download ops. Requests are served best-fit
//! from idle areas; misses allocate a new area rounded up to the pool
//! granularity, which bounds fragmentation from size-varying requests.
//!
//! Idle areas are kept up to a retained-bytes limit and released after
//! sitting unused for a number of frames (see [`DownloadAreaPool::trim`]).

use log::{debug, warn};

use crate::backend::{Backend, NativeHandle};
use crate::config::DeviceConfig;

/// A readback buffer handed out by the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DownloadArea {
    pub buffer: NativeHandle,
    pub capacity: u64,
}

struct IdleArea {
    area: DownloadArea,
    idle_frames: u32,
}

pub struct DownloadAreaPool {
    granularity: u64,
    retained_limit: u64,
    free: Vec<IdleArea>,
    in_use: usize,
}

impl DownloadAreaPool {
    #[must_use]
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            granularity: config.download_granularity,
            retained_limit: config.download_retained_limit,
            free: Vec::new(),
            in_use: 0,
        }
    }

    /// Bytes held by idle areas.
    #[must_use]
    pub fn retained_bytes(&self) -> u64 {
        self.free.iter().map(|idle| idle.area.capacity).sum()
    }

    #[inline]
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.in_use
    }

    /// Returns an area of at least `size` bytes: the smallest idle one that
    /// fits, or a new one. `None` when the backend cannot allocate.
    pub fn acquire(&mut self, backend: &mut dyn Backend, size: u64) -> Option<DownloadArea> {
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, idle)| idle.area.capacity >= size)
            .min_by_key(|(_, idle)| idle.area.capacity)
            .map(|(index, _)| index);

        let area = if let Some(index) = best {
            self.free.swap_remove(index).area
        } else {
            let capacity = size.max(1).div_ceil(self.granularity) * self.granularity;
            match backend.create_download_buffer(capacity) {
                Ok(buffer) => {
                    debug!(
                        "Download pool grew by {capacity} bytes ({} areas in use)",
                        self.in_use + 1
                    );
                    DownloadArea { buffer, capacity }
                }
                Err(err) => {
                    warn!("Download area of {capacity} bytes unavailable: {err}");
                    return None;
                }
            }
        };

        self.in_use += 1;
        Some(area)
    }

    /// Returns `area` to the idle list, destroying idle areas beyond the
    /// retained limit, largest first.
    pub fn release(&mut self, backend: &mut dyn Backend, area: DownloadArea) {
        self.in_use = self.in_use.saturating_sub(1);
        self.free.push(IdleArea {
            area,
            idle_frames: 0,
        });

        let mut retained = self.retained_bytes();
        while retained > self.retained_limit {
            let Some(largest) = self
                .free
                .iter()
                .enumerate()
                .max_by_key(|(_, idle)| idle.area.capacity)
                .map(|(index, _)| index)
            else {
                break;
            };
            let evicted = self.free.swap_remove(largest).area;
            retained -= evicted.capacity;
            backend.destroy_download_buffer(evicted.buffer);
        }
    }

    /// Ages idle areas by one frame and destroys those idle for more than
    /// `max_idle_frames`.
    pub fn trim(&mut self, backend: &mut dyn Backend, max_idle_frames: u32) {
        for idle in &mut self.free {
            idle.idle_frames += 1;
        }
        self.free.retain(|idle| {
            let keep = idle.idle_frames <= max_idle_frames;
            if !keep {
                backend.destroy_download_buffer(idle.area.buffer);
            }
            keep
        });
    }

    /// Destroys every idle area.
    pub fn clear(&mut self, backend: &mut dyn Backend) {
        for idle in self.free.drain(..) {
            backend.destroy_download_buffer(idle.area.buffer);
        }
    }
}
