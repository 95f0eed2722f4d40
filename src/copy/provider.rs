//! Source data providers.
//!
//! An upload pulls its bytes from a [`SourceDataProvider`]. Loading is
//! asynchronous and runs on the copy workers; the provider is told exactly
//! once whether its data reached the device.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use futures::future::BoxFuture;
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::Result;

/// Supplies the bytes of one upload.
pub trait SourceDataProvider: Send + Sync {
    /// Total number of bytes `load_async` produces.
    fn size(&self) -> u64;

    /// Content identity, used for logging and deduplication by callers.
    fn content_hash(&self) -> u64;

    /// Whether the bytes are already in memory (loading will not block).
    fn resident(&self) -> bool {
        false
    }

    fn label(&self) -> &str {
        ""
    }

    /// Produces the bytes. Runs on a copy worker.
    fn load_async(&self) -> BoxFuture<'static, Result<Arc<[u8]>>>;

    /// Called exactly once per scheduled upload: `applied` is `true` when the
    /// bytes were issued as a device copy, `false` when the upload was
    /// dropped (target gone, load failure, or queue stopped).
    fn notify_finished(&self, applied: bool);
}

const OUTCOME_PENDING: u8 = 0;
const OUTCOME_APPLIED: u8 = 1;
const OUTCOME_DROPPED: u8 = 2;

/// Provider over bytes already in memory.
pub struct MemorySource {
    label: Cow<'static, str>,
    data: Arc<[u8]>,
    hash: u64,
    outcome: AtomicU8,
    notifications: AtomicUsize,
}

impl MemorySource {
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>, data: impl Into<Arc<[u8]>>) -> Arc<Self> {
        let data = data.into();
        Arc::new(Self {
            label: label.into(),
            hash: xxh3_64(&data),
            data,
            outcome: AtomicU8::new(OUTCOME_PENDING),
            notifications: AtomicUsize::new(0),
        })
    }

    /// Provider over the bytes of a `Pod` slice.
    #[must_use]
    pub fn from_pod<T: bytemuck::Pod>(
        label: impl Into<Cow<'static, str>>,
        data: &[T],
    ) -> Arc<Self> {
        Self::new(label, bytemuck::cast_slice::<T, u8>(data).to_vec())
    }

    /// `Some(true)` once applied, `Some(false)` once dropped.
    #[must_use]
    pub fn outcome(&self) -> Option<bool> {
        match self.outcome.load(Ordering::Acquire) {
            OUTCOME_APPLIED => Some(true),
            OUTCOME_DROPPED => Some(false),
            _ => None,
        }
    }

    /// How many times the provider has been notified.
    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.notifications.load(Ordering::Acquire)
    }
}

impl SourceDataProvider for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn content_hash(&self) -> u64 {
        self.hash
    }

    fn resident(&self) -> bool {
        true
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn load_async(&self) -> BoxFuture<'static, Result<Arc<[u8]>>> {
        let data = Arc::clone(&self.data);
        Box::pin(async move { Ok(data) })
    }

    fn notify_finished(&self, applied: bool) {
        let outcome = if applied {
            OUTCOME_APPLIED
        } else {
            OUTCOME_DROPPED
        };
        self.outcome.store(outcome, Ordering::Release);
        self.notifications.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySource")
            .field("label", &self.label)
            .field("size", &self.data.len())
            .field("hash", &format_args!("{:016x}", self.hash))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_hash_and_load() {
        let a = MemorySource::new("a", vec![1u8, 2, 3]);
        let b = MemorySource::from_pod("b", &[1u8, 2, 3]);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.size(), 3);

        let bytes = futures::executor::block_on(a.load_async()).unwrap();
        assert_eq!(&bytes[..], &[1, 2, 3]);
    }

    #[test]
    fn test_memory_source_outcome() {
        let source = MemorySource::new("s", vec![0u8; 4]);
        assert_eq!(source.outcome(), None);
        source.notify_finished(true);
        assert_eq!(source.outcome(), Some(true));
        assert_eq!(source.notification_count(), 1);
    }
}
