//! Frames in flight.
//!
//! A [`Frame`] collects everything that has to wait for the GPU to finish
//! the work recorded during it: completion callbacks (readbacks, recycling
//! of scratch memory) and objects whose destruction was requested while
//! they might still be in use. [`FrameQueue`] retires frames strictly in
//! submission order once their fence has signaled.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};

use crate::backend::{Backend, FenceId};
use crate::cache::ObjectCache;
use crate::object::{DeviceObject, ObjectRegistry};

/// What a completion callback may touch.
pub struct CompletionContext<'a> {
    pub backend: &'a mut dyn Backend,
    pub cache: &'a mut ObjectCache,
}

pub type CompletionCallback = Box<dyn FnOnce(&mut CompletionContext<'_>) + Send>;

pub struct Frame {
    index: u64,
    callbacks: Vec<CompletionCallback>,
    deferred: Vec<Arc<dyn DeviceObject>>,
    fence: Option<FenceId>,
}

impl Frame {
    #[must_use]
    pub fn new(index: u64) -> Self {
        Self {
            index,
            callbacks: Vec::new(),
            deferred: Vec::new(),
            fence: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    #[must_use]
    pub fn fence(&self) -> Option<FenceId> {
        self.fence
    }

    #[inline]
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    #[inline]
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Runs `callback` once the GPU has finished this frame's work.
    pub fn register_completion_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut CompletionContext<'_>) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Destroys `object` once this frame has retired.
    pub fn defer_destruction(&mut self, object: Arc<dyn DeviceObject>) {
        self.deferred.push(object);
    }

    /// Closes the frame by inserting its fence.
    pub fn submit(&mut self, backend: &mut dyn Backend) {
        debug_assert!(self.fence.is_none(), "frame {} submitted twice", self.index);
        self.fence = Some(backend.insert_fence());
    }

    fn is_complete(&self, backend: &mut dyn Backend) -> bool {
        self.fence.is_some_and(|fence| backend.is_fence_signaled(fence))
    }

    fn retire(self, backend: &mut dyn Backend, cache: &mut ObjectCache, registry: &ObjectRegistry) {
        let mut ctx = CompletionContext { backend, cache };
        let callbacks = self.callbacks.len();
        for callback in self.callbacks {
            callback(&mut ctx);
        }

        let destroyed = self.deferred.len();
        for object in self.deferred {
            destroy_object(ctx.backend, ctx.cache, registry, &object);
        }

        trace!(
            "Frame {} retired: {callbacks} callbacks, {destroyed} objects destroyed",
            self.index
        );
    }
}

/// Tears down one object: derived cache entries first, then the native
/// handles, then the registry slot.
pub(crate) fn destroy_object(
    backend: &mut dyn Backend,
    cache: &mut ObjectCache,
    registry: &ObjectRegistry,
    object: &Arc<dyn DeviceObject>,
) {
    let id = object.handle();
    cache.on_object_destroyed(backend, id);
    object.release_native(backend);
    registry.unregister_object(id, object);
    debug!("Destroyed {:?} {id} '{}'", object.object_type(), object.label());
}

/// Submitted frames waiting for the GPU.
#[derive(Default)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    retired: u64,
}

impl FrameQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a submitted frame.
    pub fn push(&mut self, frame: Frame) {
        debug_assert!(frame.fence.is_some(), "frame {} queued before submit", frame.index);
        self.frames.push_back(frame);
    }

    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    #[must_use]
    pub fn retired_count(&self) -> u64 {
        self.retired
    }

    /// Retires completed frames in submission order, stopping at the first
    /// one still in flight. Returns how many retired.
    pub fn retire_completed(
        &mut self,
        backend: &mut dyn Backend,
        cache: &mut ObjectCache,
        registry: &ObjectRegistry,
    ) -> usize {
        let mut count = 0;
        while let Some(front) = self.frames.front() {
            if !front.is_complete(backend) {
                break;
            }
            if let Some(frame) = self.frames.pop_front() {
                frame.retire(backend, cache, registry);
                count += 1;
            }
        }
        self.retired += count as u64;
        count
    }

    /// Retires every frame regardless of its fence. Only valid after the
    /// backend has gone idle.
    pub fn retire_all(
        &mut self,
        backend: &mut dyn Backend,
        cache: &mut ObjectCache,
        registry: &ObjectRegistry,
    ) -> usize {
        let count = self.frames.len();
        for frame in self.frames.drain(..) {
            frame.retire(backend, cache, registry);
        }
        self.retired += count as u64;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::config::DeviceConfig;
    use parking_lot::Mutex;

    #[test]
    fn test_frames_retire_in_order_after_fence() {
        let mut backend = RecordingBackend::new();
        backend.set_auto_signal(false);
        let mut cache = ObjectCache::new(&DeviceConfig::default());
        let (registry, _rx) = ObjectRegistry::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut queue = FrameQueue::new();
        for index in 0..2 {
            let mut frame = Frame::new(index);
            let order = Arc::clone(&order);
            frame.register_completion_callback(move |_| order.lock().push(index));
            frame.submit(&mut backend);
            queue.push(frame);
        }

        assert_eq!(queue.retire_completed(&mut backend, &mut cache, &registry), 0);

        backend.signal_all();
        assert_eq!(queue.retire_completed(&mut backend, &mut cache, &registry), 2);
        assert_eq!(*order.lock(), vec![0, 1]);
        assert_eq!(queue.in_flight(), 0);
    }
}
