//! Device Thread
//!
//! [`DeviceThread`] owns the backend and every device-thread-local system:
//! the copy queue, the object cache, the frame executor and the frames in
//! flight. The object registry is the one piece shared with other threads;
//! clone it out with [`DeviceThread::registry`] to request deletions from
//! the submission side.
//!
//! # Frame loop
//!
//! ```text
//!  run_frame(stream)
//!    1. copy queue update      finished uploads become device copies
//!    2. drain deletions        requested deletions join the current frame
//!    3. execute stream         opcodes become backend calls
//!    4. submit                 fence inserted, frame queued
//!    5. retire                 completed frames run callbacks, destroy objects
//!    6. trim                   idle download areas released
//! ```
//!
//! # Ownership
//!
//! The registry only holds weak references. The device thread keeps the
//! owning reference of every object it created until the object has been
//! destroyed, so dropping a handle returned by a `create_*` call never
//! frees a native object behind the executor's back.

use std::sync::Arc;

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::cache::ObjectCache;
use crate::command::CommandStream;
use crate::config::DeviceConfig;
use crate::copy::{CopyJobId, CopyQueue, CopyRange, CopyStats, SourceDataProvider};
use crate::errors::{DeviceError, Result};
use crate::executor::{ExecuteContext, ExecutionStats, FrameExecutor};
use crate::frame::{Frame, FrameQueue};
use crate::object::registry::DeletionReceiver;
use crate::object::{
    Buffer, BufferDesc, BufferView, BufferViewDesc, ComputePipeline, ComputePipelineDesc,
    DeviceObject, GraphicsPipeline, GraphicsPipelineDesc, Image, ImageDesc, ImageView,
    ImageViewDesc, ObjectId, ObjectRegistry, ObjectType, Output, OutputDesc, Sampler, SamplerDesc,
};

/// What one [`DeviceThread::run_frame`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub copies: CopyStats,
    pub execution: ExecutionStats,
    /// Objects whose destruction was deferred to this frame.
    pub deletions: usize,
    /// Frames retired at the end of this frame, this one included if the
    /// GPU was already done with it.
    pub retired: usize,
}

pub struct DeviceThread<B: Backend> {
    config: DeviceConfig,
    backend: B,
    registry: Arc<ObjectRegistry>,
    deletions: DeletionReceiver,
    owned: FxHashMap<ObjectId, Arc<dyn DeviceObject>>,
    copy_queue: CopyQueue,
    cache: ObjectCache,
    executor: FrameExecutor,
    frames: FrameQueue,
    current: Frame,
    shut_down: bool,
}

impl<B: Backend> DeviceThread<B> {
    pub fn new(config: DeviceConfig, backend: B) -> Result<Self> {
        config.validate()?;

        let (registry, deletions) = ObjectRegistry::new(config.object_capacity);
        let registry = Arc::new(registry);
        let copy_queue = CopyQueue::new(&config, Arc::clone(&registry))?;
        let cache = ObjectCache::new(&config);

        info!(
            "Device thread started: {} object slots, {} MiB staging, {} copy workers",
            config.object_capacity,
            config.staging_pool_size >> 20,
            config.copy_worker_threads
        );

        Ok(Self {
            config,
            backend,
            registry,
            deletions,
            owned: FxHashMap::default(),
            copy_queue,
            cache,
            executor: FrameExecutor::new(),
            frames: FrameQueue::new(),
            current: Frame::new(0),
            shut_down: false,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The shared registry. Safe to use from any thread.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    #[must_use]
    pub fn copy_queue(&self) -> &CopyQueue {
        &self.copy_queue
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    #[inline]
    #[must_use]
    pub fn executor(&self) -> &FrameExecutor {
        &self.executor
    }

    /// Index of the frame currently being recorded.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.current.index()
    }

    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.in_flight()
    }

    /// Objects created by this thread that have not been destroyed yet.
    #[inline]
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.owned.len()
    }

    /// Resolves `id`, optionally checking its type.
    #[must_use]
    pub fn resolve(
        &self,
        id: ObjectId,
        expected: Option<ObjectType>,
    ) -> Option<Arc<dyn DeviceObject>> {
        self.registry.resolve(id, expected)
    }

    // ========================================================================
    // Object creation
    // ========================================================================

    fn adopt<T: DeviceObject>(&mut self, object: Arc<T>) -> Arc<T> {
        let erased: Arc<dyn DeviceObject> = object.clone();
        debug!(
            "Created {:?} {} '{}'",
            erased.object_type(),
            erased.handle(),
            erased.label()
        );
        self.owned.insert(erased.handle(), erased);
        object
    }

    /// Resolves `id` as a `T`, reporting stale handles and wrong types.
    fn lookup<T: DeviceObject>(
        &self,
        id: ObjectId,
        expected: ObjectType,
    ) -> Result<Arc<dyn DeviceObject>> {
        let object = self
            .registry
            .resolve(id, None)
            .ok_or(DeviceError::ObjectNotFound(id))?;
        if object.object_type() != expected || object.downcast_ref::<T>().is_none() {
            return Err(DeviceError::WrongObjectType {
                id,
                expected,
                actual: object.object_type(),
            });
        }
        Ok(object)
    }

    pub fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<Buffer>> {
        let native = self.backend.create_buffer(&desc)?;
        let buffer = self
            .registry
            .register_object(|id| Buffer::new(id, desc, native));
        Ok(self.adopt(buffer))
    }

    pub fn create_image(&mut self, desc: ImageDesc) -> Result<Arc<Image>> {
        let native = self.backend.create_image(&desc)?;
        let image = self
            .registry
            .register_object(|id| Image::new(id, desc, native));
        Ok(self.adopt(image))
    }

    /// Creates a constant or storage view of `buffer`.
    pub fn create_buffer_view(
        &mut self,
        buffer: ObjectId,
        kind: ObjectType,
        desc: &BufferViewDesc,
    ) -> Result<Arc<BufferView>> {
        if !matches!(
            kind,
            ObjectType::ConstantBufferView | ObjectType::StorageBufferView
        ) {
            return Err(DeviceError::InvalidView(format!(
                "{kind:?} is not a buffer view type"
            )));
        }

        let parent = self.lookup::<Buffer>(buffer, ObjectType::Buffer)?;
        let parent = parent
            .downcast_ref::<Buffer>()
            .ok_or(DeviceError::ObjectNotFound(buffer))?;
        let view = self
            .registry
            .try_register_object(|id| BufferView::new(id, kind, parent, desc))?;
        Ok(self.adopt(view))
    }

    /// Creates a sampled, writable or render-target view of `image`.
    pub fn create_image_view(
        &mut self,
        image: ObjectId,
        kind: ObjectType,
        desc: ImageViewDesc,
    ) -> Result<Arc<ImageView>> {
        let parent = self.lookup::<Image>(image, ObjectType::Image)?;
        let parent = parent
            .downcast_ref::<Image>()
            .ok_or(DeviceError::ObjectNotFound(image))?;

        ImageView::validate(parent, kind, &desc)?;
        let native = self
            .backend
            .create_image_view(parent.native(), parent.desc(), &desc)?;
        let view = self
            .registry
            .register_object(|id| ImageView::new(id, kind, parent, desc, native));
        Ok(self.adopt(view))
    }

    /// Creates a sampler. Samplers with equal descriptors share one native
    /// sampler.
    pub fn create_sampler(&mut self, desc: SamplerDesc) -> Result<Arc<Sampler>> {
        let native = self
            .cache
            .sampler(&mut self.backend, &desc)
            .ok_or_else(|| DeviceError::Backend(format!("sampler creation failed for {desc:?}")))?;
        let sampler = self
            .registry
            .register_object(|id| Sampler::new(id, desc, native));
        Ok(self.adopt(sampler))
    }

    pub fn create_graphics_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
    ) -> Result<Arc<GraphicsPipeline>> {
        let program = self.backend.create_graphics_program(&desc)?;
        let pipeline = self
            .registry
            .register_object(|id| GraphicsPipeline::new(id, desc, program));
        Ok(self.adopt(pipeline))
    }

    pub fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
    ) -> Result<Arc<ComputePipeline>> {
        let program = self.backend.create_compute_program(&desc)?;
        let pipeline = self
            .registry
            .register_object(|id| ComputePipeline::new(id, desc, program));
        Ok(self.adopt(pipeline))
    }

    pub fn create_output(&mut self, desc: OutputDesc) -> Result<Arc<Output>> {
        let native = self.backend.create_output(&desc)?;
        let output = self
            .registry
            .register_object(|id| Output::new(id, desc, native));
        Ok(self.adopt(output))
    }

    // ========================================================================
    // Uploads and deletion
    // ========================================================================

    /// Schedules an upload of `range` of `target` from `provider`. The device
    /// copy is issued by a later [`run_frame`](Self::run_frame).
    pub fn schedule_upload(
        &self,
        target: ObjectId,
        range: CopyRange,
        provider: Arc<dyn SourceDataProvider>,
    ) -> Result<CopyJobId> {
        self.copy_queue.schedule(target, range, provider)
    }

    /// Requests destruction of `id`. The object is destroyed once every
    /// frame that may still use it has retired.
    pub fn release_object(&self, id: ObjectId) -> bool {
        self.registry.request_deletion(id)
    }

    /// Closes an output and requests its destruction.
    pub fn close_output(&self, id: ObjectId) -> bool {
        let Some(object) = self.registry.resolve_typed(id, ObjectType::Output) else {
            return false;
        };
        let Some(output) = object.downcast_ref::<Output>() else {
            return false;
        };
        output.close();
        self.registry.request_deletion(id)
    }

    /// Moves every queued deletion into the current frame.
    fn drain_deletions(&mut self) -> usize {
        let mut count = 0;
        for object in self.deletions.try_iter() {
            self.owned.remove(&object.handle());
            self.current.defer_destruction(object);
            count += 1;
        }
        count
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Runs one frame: harvests uploads, executes `stream`, submits and
    /// retires whatever the GPU has finished.
    pub fn run_frame(&mut self, stream: &CommandStream) -> FrameReport {
        let frame_index = self.current.index();
        let copies = self.copy_queue.update(frame_index, &mut self.backend);
        let deletions = self.drain_deletions();

        let execution = {
            let mut ctx = ExecuteContext {
                backend: &mut self.backend,
                registry: &self.registry,
                cache: &mut self.cache,
                frame: &mut self.current,
            };
            self.executor.execute(&mut ctx, stream)
        };

        self.submit_current();
        let retired = self
            .frames
            .retire_completed(&mut self.backend, &mut self.cache, &self.registry);
        self.cache
            .trim(&mut self.backend, self.config.download_max_idle_frames);

        FrameReport {
            frame_index,
            copies,
            execution,
            deletions,
            retired,
        }
    }

    fn submit_current(&mut self) {
        let next = Frame::new(self.current.index() + 1);
        let mut frame = std::mem::replace(&mut self.current, next);
        frame.submit(&mut self.backend);
        self.frames.push(frame);
    }

    /// Blocks until the GPU is idle and retires every frame in flight.
    pub fn wait_idle(&mut self) -> usize {
        self.backend.wait_idle();
        self.frames
            .retire_all(&mut self.backend, &mut self.cache, &self.registry)
    }

    /// Tears everything down. Objects that refuse deletion (open outputs)
    /// are reported as leaked. Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.copy_queue.stop();
        let purge = self.registry.purge();
        let deletions = self.drain_deletions();

        self.submit_current();
        self.wait_idle();
        self.cache.clear(&mut self.backend);

        if !self.owned.is_empty() {
            warn!(
                "Device thread shut down with {} undeletable objects",
                self.owned.len()
            );
        }
        info!(
            "Device thread shut down: {deletions} objects destroyed, {} leaked, {} frames retired",
            purge.leaked,
            self.frames.retired_count()
        );
    }

    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<B: Backend> Drop for DeviceThread<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
