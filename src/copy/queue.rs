//! Copy Queue
//!
//! Moves upload data from [`SourceDataProvider`]s into device objects without
//! blocking the submission side.
//!
//! # Job lifecycle
//!
//! ```text
//!  schedule()                 staging allocated            update() harvests
//!  ─────────▶  Pending  ──────────────────────▶ Processing ──────────────────▶ Finished
//!              (FIFO)       async write spawned   (copy worker)   device copy or drop,
//!                                                                 staging released,
//!                                                                 provider notified
//! ```
//!
//! - Pending jobs start in schedule order as long as staging memory allows.
//!   A job that does not fit is skipped, not waited on, so smaller jobs
//!   behind it may start first.
//! - The byte copy into staging memory runs on a dedicated tokio runtime.
//!   It sets an atomic `finished` flag that [`CopyQueue::update`] polls on the
//!   device thread, where the device-side copy is issued.
//! - [`CopyQueue::stop`] drops pending jobs, flags processing jobs as
//!   canceled and waits for every in-flight write to report finished.
//!
//! Pending and processing jobs are guarded by separate locks. When both are
//! needed they are taken in that order.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use super::layout::{CopyRange, StagingLayout};
use super::provider::SourceDataProvider;
use super::staging::{StagingArea, StagingPool};
use crate::backend::Backend;
use crate::config::DeviceConfig;
use crate::errors::{DeviceError, Result};
use crate::object::{ObjectId, ObjectRegistry};

/// Identifier of a scheduled upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopyJobId(pub u64);

impl std::fmt::Display for CopyJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "copy#{}", self.0)
    }
}

/// Lifecycle timestamps of one job.
#[derive(Clone, Copy, Debug)]
pub struct JobTimings {
    pub scheduled: Instant,
    pub staging_allocated: Option<Instant>,
    pub write_started: Option<Instant>,
    pub write_finished: Option<Instant>,
    pub device_copy_started: Option<Instant>,
    pub device_copy_finished: Option<Instant>,
}

impl JobTimings {
    fn new() -> Self {
        Self {
            scheduled: Instant::now(),
            staging_allocated: None,
            write_started: None,
            write_finished: None,
            device_copy_started: None,
            device_copy_finished: None,
        }
    }
}

/// One pending upload.
pub struct CopyJob {
    id: CopyJobId,
    target: ObjectId,
    provider: Arc<dyn SourceDataProvider>,
    layout: StagingLayout,
    /// Filled by the write task once it finishes.
    staging: Mutex<Option<StagingArea>>,
    timings: Mutex<JobTimings>,
    canceled: AtomicBool,
    finished: AtomicBool,
    failed: AtomicBool,
}

impl CopyJob {
    #[inline]
    #[must_use]
    pub fn id(&self) -> CopyJobId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> ObjectId {
        self.target
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    #[must_use]
    pub fn timings(&self) -> JobTimings {
        *self.timings.lock()
    }

    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Asynchronous part of the job: loads the source bytes and writes every
    /// atom into `area`. A panicking provider counts as a failed load, so
    /// the job always reports finished.
    async fn write_to_staging(self: Arc<Self>, mut area: StagingArea) {
        if !self.is_canceled() {
            self.timings.lock().write_started = Some(Instant::now());

            let loaded = AssertUnwindSafe(async { self.provider.load_async().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(DeviceError::SourceData(format!(
                        "source '{}' panicked while loading",
                        self.provider.label()
                    )))
                });

            match loaded {
                Ok(bytes) if self.is_canceled() => drop(bytes),
                Ok(bytes) if (bytes.len() as u64) < self.layout.source_size => {
                    warn!(
                        "{}: source '{}' produced {} bytes, {} expected",
                        self.id,
                        self.provider.label(),
                        bytes.len(),
                        self.layout.source_size
                    );
                    self.failed.store(true, Ordering::Release);
                }
                Ok(bytes) => {
                    let staging = area.bytes_mut();
                    for atom in &self.layout.atoms {
                        staging[atom.staging_range()].copy_from_slice(&bytes[atom.source_range()]);
                    }
                }
                Err(err) => {
                    warn!(
                        "{}: loading source '{}' failed: {err}",
                        self.id,
                        self.provider.label()
                    );
                    self.failed.store(true, Ordering::Release);
                }
            }

            self.timings.lock().write_finished = Some(Instant::now());
        }

        *self.staging.lock() = Some(area);
        self.finished.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for CopyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyJob")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("source", &self.provider.label())
            .field("staging_size", &self.layout.staging_size)
            .field("finished", &self.is_finished())
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

/// Outcome of one [`CopyQueue::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Jobs whose device copy was issued.
    pub applied: usize,
    /// Jobs dropped because their target is gone.
    pub dropped: usize,
    /// Jobs whose source data could not be loaded.
    pub failed: usize,
    /// Pending jobs started at the end of the update.
    pub started: usize,
}

/// Asynchronous upload pipeline with a bounded staging budget.
pub struct CopyQueue {
    registry: Arc<ObjectRegistry>,
    pool: Arc<StagingPool>,
    runtime: tokio::runtime::Runtime,
    pending: Mutex<VecDeque<Arc<CopyJob>>>,
    processing: Mutex<Vec<Arc<CopyJob>>>,
    next_job_id: AtomicU64,
    stop_poll_interval: Duration,
    stopped: AtomicBool,
}

impl CopyQueue {
    pub fn new(config: &DeviceConfig, registry: Arc<ObjectRegistry>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.copy_worker_threads)
            .thread_name("myth-copy")
            .build()?;

        Ok(Self {
            registry,
            pool: StagingPool::new(config),
            runtime,
            pending: Mutex::new(VecDeque::new()),
            processing: Mutex::new(Vec::new()),
            next_job_id: AtomicU64::new(1),
            stop_poll_interval: config.stop_poll_interval,
            stopped: AtomicBool::new(false),
        })
    }

    #[inline]
    #[must_use]
    pub fn staging_pool(&self) -> &Arc<StagingPool> {
        &self.pool
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn processing_count(&self) -> usize {
        self.processing.lock().len()
    }

    #[must_use]
    pub fn is_pending(&self, id: CopyJobId) -> bool {
        self.pending.lock().iter().any(|job| job.id == id)
    }

    #[must_use]
    pub fn is_processing(&self, id: CopyJobId) -> bool {
        self.processing.lock().iter().any(|job| job.id == id)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0 && self.processing_count() == 0
    }

    // ── Scheduling ─────────────────────────────────────────────────────────

    /// Schedules an upload of `range` of `target` from `provider`.
    ///
    /// Fails when the target cannot receive uploads, the range is invalid,
    /// the provider size does not match the layout, or the upload could never
    /// fit into the staging pool. On failure the provider is not notified.
    pub fn schedule(
        &self,
        target: ObjectId,
        range: CopyRange,
        provider: Arc<dyn SourceDataProvider>,
    ) -> Result<CopyJobId> {
        let object = self
            .registry
            .resolve(target, None)
            .ok_or(DeviceError::ObjectNotFound(target))?;
        let copy_target = object
            .as_copy_target()
            .ok_or(DeviceError::NotCopiable(target))?;
        let layout = copy_target.staging_layout(&range)?;

        if provider.size() != layout.source_size {
            return Err(DeviceError::SourceSizeMismatch {
                expected: layout.source_size,
                actual: provider.size(),
            });
        }
        if !self.pool.fits_at_all(layout.staging_size) {
            return Err(DeviceError::StagingRequestTooLarge {
                requested: layout.staging_size,
                capacity: self.pool.capacity(),
            });
        }

        let id = CopyJobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let job = Arc::new(CopyJob {
            id,
            target,
            provider,
            layout,
            staging: Mutex::new(None),
            timings: Mutex::new(JobTimings::new()),
            canceled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });

        {
            // `stop` raises the flag under this lock, so a job pushed here is
            // always seen by its drain
            let mut pending = self.pending.lock();
            if self.stopped.load(Ordering::Acquire) {
                drop(pending);
                warn!("{id}: copy queue is stopped, upload to {target} dropped");
                job.provider.notify_finished(false);
                return Ok(id);
            }
            trace!(
                "{id}: scheduled {} bytes from '{}' ({:016x}) to {target}",
                job.layout.source_size,
                job.provider.label(),
                job.provider.content_hash()
            );
            pending.push_back(job);
        }

        self.try_start_pending();
        Ok(id)
    }

    /// Starts every pending job that fits into the staging pool, in FIFO
    /// order, skipping the ones that do not fit. Returns how many started.
    pub fn try_start_pending(&self) -> usize {
        if self.stopped.load(Ordering::Acquire) {
            return 0;
        }

        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return 0;
        }
        let mut processing = self.processing.lock();

        let mut started = 0;
        let mut remaining = VecDeque::with_capacity(pending.len());
        while let Some(job) = pending.pop_front() {
            match self.pool.allocate(job.layout.staging_size) {
                Some(area) => {
                    self.start(&job, area);
                    processing.push(job);
                    started += 1;
                }
                None => {
                    trace!("{}: waiting for {} bytes of staging", job.id, job.layout.staging_size);
                    remaining.push_back(job);
                }
            }
        }
        *pending = remaining;

        started
    }

    fn start(&self, job: &Arc<CopyJob>, area: StagingArea) {
        job.timings.lock().staging_allocated = Some(Instant::now());
        debug!(
            "{}: started, {} bytes of staging at page {}",
            job.id,
            area.size(),
            area.first_page()
        );

        let task = Arc::clone(job);
        self.runtime.spawn(task.write_to_staging(area));
    }

    // ── Device thread ──────────────────────────────────────────────────────

    /// Harvests finished writes, issues their device copies, and starts
    /// pending jobs that fit into the freed staging memory.
    pub fn update(&self, frame_index: u64, backend: &mut dyn Backend) -> CopyStats {
        let mut stats = CopyStats::default();

        for job in self.take_finished() {
            let area = job.staging.lock().take();

            if job.failed.load(Ordering::Acquire) {
                job.provider.notify_finished(false);
                stats.failed += 1;
                continue;
            }

            let target = self.registry.resolve(job.target, None);
            let copy_target = target.as_deref().and_then(|object| object.as_copy_target());

            match (copy_target, area) {
                (Some(copy_target), Some(area)) => {
                    job.timings.lock().device_copy_started = Some(Instant::now());
                    copy_target.copy_from_staging(backend, area.bytes(), &job.layout.atoms);

                    let timings = {
                        let mut timings = job.timings.lock();
                        timings.device_copy_finished = Some(Instant::now());
                        *timings
                    };
                    job.provider.notify_finished(true);
                    stats.applied += 1;

                    debug!(
                        "Frame {frame_index}: {} applied to {} ({} bytes, {:?} since schedule)",
                        job.id,
                        job.target,
                        job.layout.source_size,
                        timings.scheduled.elapsed()
                    );
                    // staging memory is released here, not when the GPU finishes the copy
                    drop(area);
                }
                _ => {
                    warn!(
                        "Frame {frame_index}: {} target {} is gone, upload dropped",
                        job.id, job.target
                    );
                    job.provider.notify_finished(false);
                    stats.dropped += 1;
                }
            }
        }

        stats.started = self.try_start_pending();
        stats
    }

    fn take_finished(&self) -> Vec<Arc<CopyJob>> {
        let mut processing = self.processing.lock();
        let (finished, running): (Vec<_>, Vec<_>) =
            processing.drain(..).partition(|job| job.is_finished());
        *processing = running;
        finished
    }

    /// Drops all pending jobs and waits for every in-flight write to finish.
    /// Every job still queued is reported to its provider as not applied.
    pub fn stop(&self) {
        let dropped: Vec<_> = {
            let mut pending = self.pending.lock();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
            pending.drain(..).collect()
        };
        for job in &dropped {
            job.provider.notify_finished(false);
        }

        {
            let processing = self.processing.lock();
            for job in processing.iter() {
                job.canceled.store(true, Ordering::Release);
            }
        }

        let mut canceled = 0;
        loop {
            for job in self.take_finished() {
                drop(job.staging.lock().take());
                job.provider.notify_finished(false);
                canceled += 1;
            }
            if self.processing.lock().is_empty() {
                break;
            }
            std::thread::sleep(self.stop_poll_interval);
        }

        info!(
            "Copy queue stopped: {} pending jobs dropped, {canceled} in-flight jobs canceled",
            dropped.len()
        );
    }

    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for CopyQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
