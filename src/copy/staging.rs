//! Staging Memory Pool
//!
//! A bounded, page-granular pool of upload memory. Allocation is first-fit
//! over a sorted list of free page ranges; a failed allocation is a normal
//! outcome that callers retry later.
//!
//! [`StagingArea`] keeps its pool alive through an `Arc` back-reference and
//! returns its pages when dropped, so a staging area can never outlive the
//! accounting it came from.

use std::ops::Range;
use std::sync::Arc;

use log::{info, trace};
use parking_lot::Mutex;

use crate::config::DeviceConfig;

struct PoolState {
    /// Free page ranges, sorted and non-adjacent.
    free: Vec<Range<u32>>,
    used_pages: u32,
    peak_pages: u32,
}

/// Page-based staging memory accounting.
pub struct StagingPool {
    state: Mutex<PoolState>,
    page_size: u64,
    page_count: u32,
}

impl StagingPool {
    #[must_use]
    pub fn new(config: &DeviceConfig) -> Arc<Self> {
        let page_count = config.staging_page_count();
        info!(
            "Staging pool: {} bytes in {} pages of {} bytes",
            config.staging_pool_size, page_count, config.staging_page_size
        );

        Arc::new(Self {
            state: Mutex::new(PoolState {
                free: vec![0..page_count],
                used_pages: 0,
                peak_pages: 0,
            }),
            page_size: config.staging_page_size,
            page_count,
        })
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u64 {
        u64::from(self.page_count) * self.page_size
    }

    #[inline]
    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        u64::from(self.state.lock().used_pages) * self.page_size
    }

    #[must_use]
    pub fn peak_bytes(&self) -> u64 {
        u64::from(self.state.lock().peak_pages) * self.page_size
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.capacity() - self.used_bytes()
    }

    fn pages_for(&self, size: u64) -> u64 {
        size.max(1).div_ceil(self.page_size)
    }

    /// Whether a request of `size` bytes could ever be satisfied.
    #[must_use]
    pub fn fits_at_all(&self, size: u64) -> bool {
        self.pages_for(size) <= u64::from(self.page_count)
    }

    /// Allocates `size` bytes, or returns `None` when no contiguous run of
    /// pages is free right now.
    #[must_use]
    pub fn allocate(self: &Arc<Self>, size: u64) -> Option<StagingArea> {
        let pages = self.pages_for(size);
        if pages > u64::from(self.page_count) {
            return None;
        }
        let pages = pages as u32;

        let first_page = {
            let mut state = self.state.lock();
            let slot = state.free.iter().position(|r| r.len() as u32 >= pages);
            let Some(slot) = slot else {
                trace!(
                    "Staging allocation of {size} bytes failed ({} of {} pages in use)",
                    state.used_pages, self.page_count
                );
                return None;
            };

            let range = &mut state.free[slot];
            let first = range.start;
            range.start += pages;
            if range.is_empty() {
                state.free.remove(slot);
            }

            state.used_pages += pages;
            state.peak_pages = state.peak_pages.max(state.used_pages);
            first
        };

        Some(StagingArea {
            pool: Arc::clone(self),
            pages: first_page..first_page + pages,
            data: vec![0; size as usize],
        })
    }

    fn release(&self, pages: Range<u32>) {
        let mut state = self.state.lock();
        state.used_pages -= pages.len() as u32;

        let at = state.free.partition_point(|r| r.start < pages.start);
        state.free.insert(at, pages);

        // merge with the following range, then the preceding one
        if at + 1 < state.free.len() && state.free[at].end == state.free[at + 1].start {
            let next = state.free.remove(at + 1);
            state.free[at].end = next.end;
        }
        if at > 0 && state.free[at - 1].end == state.free[at].start {
            let current = state.free.remove(at);
            state.free[at - 1].end = current.end;
        }
    }
}

/// A region of staging memory. Returned to its pool on drop.
pub struct StagingArea {
    pool: Arc<StagingPool>,
    pages: Range<u32>,
    data: Vec<u8>,
}

impl StagingArea {
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn first_page(&self) -> u32 {
        self.pages.start
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.pool.release(self.pages.clone());
    }
}

impl std::fmt::Debug for StagingArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingArea")
            .field("pages", &self.pages)
            .field("size", &self.data.len())
            .finish()
    }
}
