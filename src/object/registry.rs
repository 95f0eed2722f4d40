//! Object Registry
//!
//! Fixed-capacity table mapping [`ObjectId`]s to live [`DeviceObject`]s.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     ObjectRegistry                        │
//! │                                                           │
//! │  slots: [Slot { object: Weak, generation, marked }; cap]  │
//! │  free:  [index, index, ...]   (stack)                     │
//! │  next_generation: u64         (global, never reused)      │
//! │                                                           │
//! │  register_object()   submission/device thread             │
//! │  resolve()           device thread (every op)             │
//! │  request_deletion()  any thread → deletion queue          │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry does not own objects. Slots hold weak references and the
//! creator keeps the strong one. Deletable objects are handed to the
//! deferred-destruction queue (a `flume` channel drained by the device thread).
//!
//! All state sits behind one `parking_lot::Mutex`. Lookups take the same lock;
//! handle churn is far rarer than per-frame resolves, and a single lock keeps
//! validation and dereference atomic.

use std::sync::{Arc, Weak};

use log::{debug, error, warn};
use parking_lot::Mutex;

use super::{DeviceObject, ObjectId, ObjectType};

/// Sending half of the deferred-destruction queue.
pub type DeletionSender = flume::Sender<Arc<dyn DeviceObject>>;
/// Receiving half of the deferred-destruction queue, drained by the device thread.
pub type DeletionReceiver = flume::Receiver<Arc<dyn DeviceObject>>;

#[derive(Default)]
struct Slot {
    object: Option<Weak<dyn DeviceObject>>,
    generation: u64,
    marked_for_deletion: bool,
}

struct RegistryInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_generation: u64,
}

impl RegistryInner {
    /// Validates `id` and returns its slot and a strong reference to the object.
    fn lookup(&self, id: ObjectId) -> Option<(&Slot, Arc<dyn DeviceObject>)> {
        if id.is_empty() {
            return None;
        }

        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }

        let object = slot.object.as_ref()?.upgrade()?;
        // the slot may have been recycled between validation and use
        if object.handle() != id {
            return None;
        }

        Some((slot, object))
    }
}

/// Outcome of [`ObjectRegistry::purge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Objects that were flagged and queued for destruction.
    pub queued: usize,
    /// Live objects that refused deletion.
    pub leaked: usize,
}

/// Thread-safe handle table with generation-checked lookups.
pub struct ObjectRegistry {
    inner: Mutex<RegistryInner>,
    capacity: u32,
    deletion_queue: DeletionSender,
}

impl ObjectRegistry {
    /// Creates a registry with `capacity` slots and the receiving half of its
    /// deferred-destruction queue.
    #[must_use]
    pub fn new(capacity: u32) -> (Self, DeletionReceiver) {
        let (tx, rx) = flume::unbounded();

        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, Slot::default);

        // pop order hands out low indices first
        let free = (0..capacity).rev().collect();

        let registry = Self {
            inner: Mutex::new(RegistryInner {
                slots,
                free,
                next_generation: 1,
            }),
            capacity,
            deletion_queue: tx,
        };

        (registry, rx)
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots currently holding an object.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock();
        self.capacity as usize - inner.free.len()
    }

    // ── Registration ───────────────────────────────────────────────────────

    /// Registers a new object. `build` receives the id the object must report
    /// from [`DeviceObject::handle`].
    ///
    /// # Panics
    ///
    /// Panics when every slot is in use. Registry capacity is a configuration
    /// value and is expected to be sized generously.
    pub fn register_object<T, F>(&self, build: F) -> Arc<T>
    where
        T: DeviceObject,
        F: FnOnce(ObjectId) -> T,
    {
        match self.try_register_object(|id| Ok::<_, std::convert::Infallible>(build(id))) {
            Ok(object) => object,
            Err(never) => match never {},
        }
    }

    /// Fallible variant of [`register_object`](Self::register_object). When
    /// `build` fails the reserved slot is returned to the free list.
    pub fn try_register_object<T, E, F>(&self, build: F) -> Result<Arc<T>, E>
    where
        T: DeviceObject,
        F: FnOnce(ObjectId) -> Result<T, E>,
    {
        let id = self.reserve_slot();

        let object = match build(id) {
            Ok(object) => Arc::new(object),
            Err(err) => {
                let mut inner = self.inner.lock();
                inner.slots[id.index() as usize] = Slot::default();
                inner.free.push(id.index());
                return Err(err);
            }
        };

        assert_eq!(
            object.handle(),
            id,
            "object must report the id it was registered under"
        );

        let weak: Weak<dyn DeviceObject> = Arc::downgrade(&object) as Weak<dyn DeviceObject>;
        {
            let mut inner = self.inner.lock();
            inner.slots[id.index() as usize].object = Some(weak);
        }

        debug!("Registered {:?} as {}", object.object_type(), id);
        Ok(object)
    }

    fn reserve_slot(&self) -> ObjectId {
        let mut inner = self.inner.lock();

        let Some(index) = inner.free.pop() else {
            error!(
                "Object registry exhausted: all {} slots are in use",
                self.capacity
            );
            panic!(
                "object registry exhausted ({} slots); raise DeviceConfig::object_capacity",
                self.capacity
            );
        };

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let slot = &mut inner.slots[index as usize];
        slot.generation = generation;
        slot.object = None;
        slot.marked_for_deletion = false;

        ObjectId::new(index, generation)
    }

    /// Removes `object` from the table.
    ///
    /// # Panics
    ///
    /// Panics if the slot for `id` does not currently hold exactly `object`
    /// (double-unregister or a mismatched pointer).
    pub fn unregister_object(&self, id: ObjectId, object: &Arc<dyn DeviceObject>) {
        let mut inner = self.inner.lock();

        let holds_object = inner.slots.get(id.index() as usize).is_some_and(|slot| {
            slot.generation == id.generation()
                && slot
                    .object
                    .as_ref()
                    .is_some_and(|weak| std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(object)))
        });

        if !holds_object {
            error!("Unregistering {id} which does not hold the given object");
            panic!("invalid unregister of {id}: slot is empty or holds a different object");
        }

        inner.slots[id.index() as usize] = Slot::default();
        inner.free.push(id.index());
    }

    // ── Lookup ─────────────────────────────────────────────────────────────

    /// Resolves `id` to its live object.
    ///
    /// Returns `None` for empty, out-of-range or stale ids, and when
    /// `expected` is given but the object has another type. A `None` here is
    /// the normal outcome for objects destroyed after a command stream was
    /// recorded; callers skip the affected operation.
    #[must_use]
    pub fn resolve(
        &self,
        id: ObjectId,
        expected: Option<ObjectType>,
    ) -> Option<Arc<dyn DeviceObject>> {
        let inner = self.inner.lock();
        let (_, object) = inner.lookup(id)?;

        if let Some(expected) = expected
            && object.object_type() != expected
        {
            return None;
        }

        Some(object)
    }

    /// Resolves `id` and checks it against `expected`.
    #[inline]
    #[must_use]
    pub fn resolve_typed(
        &self,
        id: ObjectId,
        expected: ObjectType,
    ) -> Option<Arc<dyn DeviceObject>> {
        self.resolve(id, Some(expected))
    }

    /// Whether `id` refers to a live object that has been flagged for deletion.
    #[must_use]
    pub fn is_marked_for_deletion(&self, id: ObjectId) -> bool {
        let inner = self.inner.lock();
        inner.lookup(id).is_some_and(|(slot, _)| slot.marked_for_deletion)
    }

    // ── Deletion ───────────────────────────────────────────────────────────

    /// Flags the object for deletion and hands it to the deferred-destruction
    /// queue if it is deletable right now.
    ///
    /// Returns `true` when the object was queued by this call. Marking an
    /// already-marked object, or one that refuses deletion, does nothing.
    pub fn request_deletion(&self, id: ObjectId) -> bool {
        let mut inner = self.inner.lock();

        let Some((slot, object)) = inner.lookup(id) else {
            return false;
        };
        if slot.marked_for_deletion || !object.can_delete() {
            return false;
        }

        inner.slots[id.index() as usize].marked_for_deletion = true;
        drop(inner);

        self.enqueue_deletion(object);
        true
    }

    /// Shutdown sweep: queues every deletable live object and reports the
    /// ones that refuse deletion as leaked.
    pub fn purge(&self) -> PurgeReport {
        let mut report = PurgeReport::default();
        let mut to_queue = Vec::new();

        {
            let mut inner = self.inner.lock();
            for slot in &mut inner.slots {
                if slot.marked_for_deletion {
                    continue;
                }
                let Some(object) = slot.object.as_ref().and_then(Weak::upgrade) else {
                    continue;
                };

                if object.can_delete() {
                    slot.marked_for_deletion = true;
                    to_queue.push(object);
                } else {
                    report.leaked += 1;
                }
            }
        }

        report.queued = to_queue.len();
        for object in to_queue {
            self.enqueue_deletion(object);
        }

        if report.leaked > 0 {
            warn!(
                "Object registry purge: {} live objects could not be deleted and were leaked",
                report.leaked
            );
        }
        debug!("Object registry purge queued {} objects", report.queued);

        report
    }

    fn enqueue_deletion(&self, object: Arc<dyn DeviceObject>) {
        let id = object.handle();
        if self.deletion_queue.send(object).is_err() {
            warn!("Deletion queue closed, {id} will not be destroyed");
        }
    }
}
