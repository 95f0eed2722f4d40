//! Object Registry Tests
//!
//! Tests for:
//! - Register / resolve / unregister round trip
//! - Handle uniqueness and generation monotonicity across slot reuse
//! - Stale-handle safety after a slot is recycled
//! - Deferred deletion requests and the shutdown purge

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use myth_device::{DeviceObject, ObjectId, ObjectRegistry, ObjectType};

struct Probe {
    id: ObjectId,
    kind: ObjectType,
    deletable: AtomicBool,
}

impl Probe {
    fn new(id: ObjectId, kind: ObjectType) -> Self {
        Self {
            id,
            kind,
            deletable: AtomicBool::new(true),
        }
    }

    fn pinned(id: ObjectId) -> Self {
        Self {
            id,
            kind: ObjectType::Output,
            deletable: AtomicBool::new(false),
        }
    }
}

impl DeviceObject for Probe {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        self.kind
    }

    fn can_delete(&self) -> bool {
        self.deletable.load(Ordering::Acquire)
    }
}

fn erased(probe: &Arc<Probe>) -> Arc<dyn DeviceObject> {
    probe.clone()
}

fn same_object(a: &Arc<dyn DeviceObject>, b: &Arc<Probe>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ============================================================================
// Register / resolve
// ============================================================================

#[test]
fn register_resolve_unregister_round_trip() {
    let (registry, _deletions) = ObjectRegistry::new(8);
    let a = registry.register_object(|id| Probe::new(id, ObjectType::Buffer));
    let id = a.handle();

    let resolved = registry.resolve(id, None).expect("live object resolves");
    assert!(same_object(&resolved, &a));
    drop(resolved);

    registry.unregister_object(id, &erased(&a));
    assert!(registry.resolve(id, None).is_none());
}

#[test]
fn typed_resolve_rejects_other_types() {
    let (registry, _deletions) = ObjectRegistry::new(8);
    let image = registry.register_object(|id| Probe::new(id, ObjectType::Image));

    assert!(registry.resolve_typed(image.handle(), ObjectType::Image).is_some());
    assert!(registry.resolve_typed(image.handle(), ObjectType::Buffer).is_none());
}

#[test]
fn live_objects_never_share_an_id() {
    let (registry, _deletions) = ObjectRegistry::new(16);
    let mut live: Vec<Arc<Probe>> = Vec::new();

    for round in 0..6 {
        for _ in 0..4 {
            live.push(registry.register_object(|id| Probe::new(id, ObjectType::Buffer)));
        }
        // retire every other object to churn the free list
        let retired: Vec<_> = live.drain(..).enumerate().collect();
        for (i, probe) in retired {
            if (i + round) % 2 == 0 {
                registry.unregister_object(probe.handle(), &erased(&probe));
            } else {
                live.push(probe);
            }
        }

        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert_ne!(a.handle(), b.handle());
            }
            let resolved = registry.resolve(a.handle(), None).expect("live");
            assert!(same_object(&resolved, a));
        }
    }
}

#[test]
fn reused_slot_gets_a_greater_generation() {
    let (registry, _deletions) = ObjectRegistry::new(1);

    let mut last = 0;
    for _ in 0..5 {
        let probe = registry.register_object(|id| Probe::new(id, ObjectType::Buffer));
        let id = probe.handle();
        assert_eq!(id.index(), 0);
        assert!(id.generation() > last);
        last = id.generation();
        registry.unregister_object(id, &erased(&probe));
    }
}

#[test]
fn stale_handle_never_resolves_to_the_new_occupant() {
    let (registry, _deletions) = ObjectRegistry::new(1);

    let first = registry.register_object(|id| Probe::new(id, ObjectType::Buffer));
    let stale = first.handle();
    registry.unregister_object(stale, &erased(&first));

    let second = registry.register_object(|id| Probe::new(id, ObjectType::Buffer));
    assert_eq!(second.handle().index(), stale.index());
    assert!(registry.resolve(stale, None).is_none());
    assert!(registry.resolve(second.handle(), None).is_some());
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn deletion_request_hands_object_to_owner_once() {
    let (registry, deletions) = ObjectRegistry::new(4);
    let probe = registry.register_object(|id| Probe::new(id, ObjectType::Image));

    assert!(registry.request_deletion(probe.handle()));
    assert!(!registry.request_deletion(probe.handle()));
    assert!(registry.is_marked_for_deletion(probe.handle()));

    let queued: Vec<_> = deletions.try_iter().collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].handle(), probe.handle());
}

#[test]
fn undeletable_object_is_queued_once_it_allows_it() {
    let (registry, deletions) = ObjectRegistry::new(4);
    let probe = registry.register_object(Probe::pinned);

    assert!(!registry.request_deletion(probe.handle()));
    assert!(deletions.is_empty());

    probe.deletable.store(true, Ordering::Release);
    assert!(registry.request_deletion(probe.handle()));
    assert_eq!(deletions.len(), 1);
}

#[test]
fn purge_queues_deletable_and_reports_leaks() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (registry, deletions) = ObjectRegistry::new(8);

    let _a = registry.register_object(|id| Probe::new(id, ObjectType::Buffer));
    let _b = registry.register_object(|id| Probe::new(id, ObjectType::Image));
    let _pinned = registry.register_object(Probe::pinned);

    let report = registry.purge();
    assert_eq!(report.queued, 2);
    assert_eq!(report.leaked, 1);
    assert_eq!(deletions.len(), 2);

    // already marked objects are not queued twice
    let again = registry.purge();
    assert_eq!(again.queued, 0);
}
