//! Page handles handed out by the memory cache.
//!
//! A buffer is in exactly one of three states:
//!
//! ```text
//!            new_page / get_writable_page
//!   Free  ───────────────────────────────►  Writable (WritablePage)
//!    ▲                                          │
//!    │ last handle dropped                      │ mark_as_read_only
//!    │ / discarded write                        ▼
//!    └──────────────────────────────────  Shared (SharedPage, n readers)
//! ```
//!
//! `SharedPage` only dereferences to `&[u8]`; `WritablePage` is the only
//! handle that yields `&mut [u8]`, and it is never visible to readers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use tessera_common::types::FileOrigin;

/// Pool of page-sized buffers not currently in use.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    pub(crate) buffers: Mutex<Vec<BytesMut>>,
}

impl FreeList {
    pub(crate) fn put(&self, buffer: BytesMut) {
        self.buffers.lock().push(buffer);
    }
}

/// A published page, cached by `(origin, position)`.
pub(crate) struct CachedPage {
    pub(crate) origin: FileOrigin,
    pub(crate) position: u32,
    pub(crate) buffer: BytesMut,
    pub(crate) timestamp: AtomicU64,
    free: Arc<FreeList>,
}

impl CachedPage {
    pub(crate) fn new(
        origin: FileOrigin,
        position: u32,
        buffer: BytesMut,
        timestamp: u64,
        free: Arc<FreeList>,
    ) -> Self {
        Self {
            origin,
            position,
            buffer,
            timestamp: AtomicU64::new(timestamp),
            free,
        }
    }
}

impl Drop for CachedPage {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        if !buffer.is_empty() {
            self.free.put(buffer);
        }
    }
}

/// Read-only, share-counted handle to a cached page.
///
/// Cloning increments the share counter and dropping decrements it. The
/// content never changes while any handle exists.
#[derive(Clone)]
pub struct SharedPage {
    pub(crate) inner: Arc<CachedPage>,
}

impl SharedPage {
    /// File the page belongs to.
    #[inline]
    pub fn origin(&self) -> FileOrigin {
        self.inner.origin
    }

    /// Physical position (page index) inside the file.
    #[inline]
    pub fn position(&self) -> u32 {
        self.inner.position
    }

    /// Number of handles other than the cache's own entry.
    #[inline]
    pub fn share_counter(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    /// True if both handles refer to the same buffer instance.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl Deref for SharedPage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner.buffer
    }
}

impl fmt::Debug for SharedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPage")
            .field("origin", &self.inner.origin)
            .field("position", &self.inner.position)
            .field("share_counter", &self.share_counter())
            .finish()
    }
}

/// Exclusive, mutable page buffer.
///
/// Dropping an unpublished writable page returns its buffer to the free
/// pool, discarding the changes.
pub struct WritablePage {
    pub(crate) buffer: Option<BytesMut>,
    free: Arc<FreeList>,
}

impl WritablePage {
    pub(crate) fn new(buffer: BytesMut, free: Arc<FreeList>) -> Self {
        Self {
            buffer: Some(buffer),
            free,
        }
    }

    pub(crate) fn take_buffer(mut self) -> BytesMut {
        self.buffer.take().unwrap_or_default()
    }
}

impl Deref for WritablePage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl DerefMut for WritablePage {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for WritablePage {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.free.put(buffer);
        }
    }
}

impl fmt::Debug for WritablePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritablePage").finish_non_exhaustive()
    }
}

impl AsRef<[u8]> for WritablePage {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for WritablePage {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl AsRef<[u8]> for SharedPage {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

pub(crate) fn next_tick(clock: &AtomicU64) -> u64 {
    clock.fetch_add(1, Ordering::Relaxed)
}
