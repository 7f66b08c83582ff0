//! The memory cache: page buffers shared by file position.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::debug;

use tessera_common::constants::PAGE_SIZE;
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::FileOrigin;

use super::config::CacheConfig;
use super::page::{next_tick, CachedPage, FreeList, SharedPage, WritablePage};

type PageKey = (FileOrigin, u32);

/// Memory cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Pages currently cached for reading.
    pub cached_pages: usize,
    /// Buffers in the free pool.
    pub free_pages: usize,
    /// Segments allocated so far.
    pub segments: usize,
    /// Cached pages returned to the free pool to avoid growing.
    pub reclaimed_pages: u64,
    /// Readable lookups served from the cache.
    pub hits: u64,
    /// Readable lookups that loaded from disk.
    pub misses: u64,
}

impl CacheStats {
    /// Returns the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Page cache keyed by `(origin, position)`.
///
/// Buffers are carved from large contiguous segments. When the free pool is
/// empty the cache either reclaims unused cached pages (oldest first) or
/// allocates the next segment.
///
/// # Example
///
/// ```rust
/// use tessera_storage::buffer::{CacheConfig, MemoryCache};
/// use tessera_common::types::FileOrigin;
///
/// let cache = MemoryCache::new(CacheConfig::new());
/// let mut page = cache.new_page();
/// page[100] = 42;
/// let shared = cache.mark_as_read_only(page, FileOrigin::Log, 0);
/// assert_eq!(shared[100], 42);
///
/// let again = cache.get_readable_page(FileOrigin::Log, 0, |_| unreachable!()).unwrap();
/// assert_eq!(again[100], 42);
/// ```
pub struct MemoryCache {
    config: CacheConfig,
    readable: Mutex<HashMap<PageKey, Arc<CachedPage>>>,
    free: Arc<FreeList>,
    clock: AtomicU64,
    segments: AtomicUsize,
    reclaimed: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates an empty cache. No memory is allocated until first use.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            readable: Mutex::new(HashMap::new()),
            free: Arc::new(FreeList::default()),
            clock: AtomicU64::new(0),
            segments: AtomicUsize::new(0),
            reclaimed: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the shared page at `(origin, position)`, loading it with
    /// `load` on a miss.
    pub fn get_readable_page<F>(
        &self,
        origin: FileOrigin,
        position: u32,
        load: F,
    ) -> TesseraResult<SharedPage>
    where
        F: FnOnce(&mut [u8]) -> TesseraResult<()>,
    {
        let key = (origin, position);
        if let Some(page) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut buffer = self.take_free_buffer();
        if let Err(e) = load(&mut buffer[..]) {
            self.free.put(buffer);
            return Err(e);
        }

        let mut readable = self.readable.lock();
        // Another reader may have loaded the same position meanwhile.
        if let Some(existing) = readable.get(&key) {
            let existing = Arc::clone(existing);
            drop(readable);
            self.free.put(buffer);
            return Ok(SharedPage { inner: existing });
        }
        let page = Arc::new(CachedPage::new(
            origin,
            position,
            buffer,
            next_tick(&self.clock),
            Arc::clone(&self.free),
        ));
        readable.insert(key, Arc::clone(&page));
        Ok(SharedPage { inner: page })
    }

    fn lookup(&self, key: &PageKey) -> Option<SharedPage> {
        let readable = self.readable.lock();
        readable.get(key).map(|page| {
            page.timestamp
                .store(next_tick(&self.clock), Ordering::Relaxed);
            SharedPage {
                inner: Arc::clone(page),
            }
        })
    }

    /// Returns a private copy of the page at `(origin, position)`. The
    /// cached instance, if any, is never modified.
    pub fn get_writable_page<F>(
        &self,
        origin: FileOrigin,
        position: u32,
        load: F,
    ) -> TesseraResult<WritablePage>
    where
        F: FnOnce(&mut [u8]) -> TesseraResult<()>,
    {
        let mut buffer = self.take_free_buffer();
        let cached = self.lookup(&(origin, position));
        match cached {
            Some(page) => buffer.copy_from_slice(&page),
            None => {
                if let Err(e) = load(&mut buffer[..]) {
                    self.free.put(buffer);
                    return Err(e);
                }
            }
        }
        Ok(WritablePage::new(buffer, Arc::clone(&self.free)))
    }

    /// Returns a zeroed writable page.
    pub fn new_page(&self) -> WritablePage {
        let mut buffer = self.take_free_buffer();
        buffer.fill(0);
        WritablePage::new(buffer, Arc::clone(&self.free))
    }

    /// Copies a shared page into a fresh writable buffer.
    pub fn copy_to_writable(&self, page: &SharedPage) -> WritablePage {
        let mut buffer = self.take_free_buffer();
        buffer.copy_from_slice(page);
        WritablePage::new(buffer, Arc::clone(&self.free))
    }

    /// Publishes a writable page at `(origin, position)`.
    ///
    /// If an unused instance is already cached there, the bytes are copied
    /// into it and the writable buffer goes back to the pool. If readers
    /// hold the cached instance, the new page replaces it in the cache and
    /// those readers keep the old content.
    ///
    /// Either way the map keeps exactly one canonical entry per position,
    /// and a buffer some reader holds is never written to.
    pub fn mark_as_read_only(
        &self,
        page: WritablePage,
        origin: FileOrigin,
        position: u32,
    ) -> SharedPage {
        let key = (origin, position);
        let buffer = page.take_buffer();
        let tick = next_tick(&self.clock);
        let mut readable = self.readable.lock();

        if let Some(existing) = readable.get_mut(&key) {
            if let Some(cached) = Arc::get_mut(existing) {
                cached.buffer.copy_from_slice(&buffer);
                cached.timestamp.store(tick, Ordering::Relaxed);
                let shared = SharedPage {
                    inner: Arc::clone(existing),
                };
                drop(readable);
                self.free.put(buffer);
                return shared;
            }
        }

        let page = Arc::new(CachedPage::new(
            origin,
            position,
            buffer,
            tick,
            Arc::clone(&self.free),
        ));
        // A replaced instance stays alive for its readers.
        readable.insert(key, Arc::clone(&page));
        SharedPage { inner: page }
    }

    /// Drops every cached page. Fails if any page is still shared.
    pub fn clear(&self) -> TesseraResult<()> {
        let mut readable = self.readable.lock();
        if let Some(((origin, position), _)) =
            readable.iter().find(|(_, p)| Arc::strong_count(p) > 1)
        {
            return Err(TesseraError::internal(format!(
                "cannot clear cache: {origin} page {position} is in use"
            )));
        }
        let dropped: Vec<_> = readable.drain().map(|(_, p)| p).collect();
        drop(readable);
        debug!(pages = dropped.len(), "memory cache cleared");
        drop(dropped);
        Ok(())
    }

    /// Removes cached entries of `origin` that nobody holds.
    pub fn discard_unused(&self, origin: FileOrigin) {
        let mut readable = self.readable.lock();
        let keys: Vec<PageKey> = readable
            .iter()
            .filter(|((o, _), p)| *o == origin && Arc::strong_count(p) == 1)
            .map(|(k, _)| *k)
            .collect();
        let dropped: Vec<_> = keys.iter().filter_map(|k| readable.remove(k)).collect();
        drop(readable);
        drop(dropped);
    }

    /// Returns current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_pages: self.readable.lock().len(),
            free_pages: self.free.buffers.lock().len(),
            segments: self.segments.load(Ordering::Relaxed),
            reclaimed_pages: self.reclaimed.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn take_free_buffer(&self) -> BytesMut {
        loop {
            if let Some(buffer) = self.free.buffers.lock().pop() {
                return buffer;
            }
            self.extend();
        }
    }

    /// Refills the free pool, by reclaiming unused pages when at least half
    /// a segment's worth exists, otherwise by allocating a new segment.
    fn extend(&self) {
        let segment_size = self.config.segment_size(self.segments.load(Ordering::Relaxed));
        let wanted = (segment_size / 2).max(1);

        let mut readable = self.readable.lock();
        let mut unused: Vec<(u64, PageKey)> = readable
            .iter()
            .filter(|(_, p)| Arc::strong_count(p) == 1)
            .map(|(k, p)| (p.timestamp.load(Ordering::Relaxed), *k))
            .collect();

        if unused.len() >= wanted {
            unused.sort_unstable_by_key(|(ts, _)| *ts);
            let dropped: Vec<_> = unused
                .iter()
                .take(wanted)
                .filter_map(|(_, k)| readable.remove(k))
                .collect();
            drop(readable);
            self.reclaimed
                .fetch_add(dropped.len() as u64, Ordering::Relaxed);
            debug!(pages = dropped.len(), "reclaimed unused cached pages");
            drop(dropped);
            return;
        }
        drop(readable);

        let mut segment = BytesMut::zeroed(segment_size * PAGE_SIZE);
        let mut buffers = Vec::with_capacity(segment_size);
        while !segment.is_empty() {
            buffers.push(segment.split_to(PAGE_SIZE));
        }
        let n = self.segments.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(segment = n, pages = segment_size, "memory cache extended");
        self.free.buffers.lock().extend(buffers);
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn small_cache() -> MemoryCache {
        MemoryCache::new(CacheConfig::new().with_segment_sizes(vec![4]))
    }

    fn load_with(byte: u8) -> impl FnOnce(&mut [u8]) -> TesseraResult<()> {
        move |buf| {
            buf.fill(byte);
            Ok(())
        }
    }

    #[test]
    fn test_readable_is_cached_and_share_counted() {
        let cache = small_cache();
        let a = cache.get_readable_page(FileOrigin::Data, 1, load_with(1)).unwrap();
        let b = cache
            .get_readable_page(FileOrigin::Data, 1, |_| panic!("should hit"))
            .unwrap();
        assert!(SharedPage::ptr_eq(&a, &b));
        assert_eq!(a.share_counter(), 2);
        let c = b.clone();
        assert_eq!(a.share_counter(), 3);
        drop(b);
        drop(c);
        assert_eq!(a.share_counter(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_load_error_returns_buffer() {
        let cache = small_cache();
        let err = cache
            .get_readable_page(FileOrigin::Data, 1, |_| Err(TesseraError::corruption("bad")))
            .unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(cache.stats().cached_pages, 0);
        assert_eq!(cache.stats().free_pages, 4);
    }

    #[test]
    fn test_writable_is_private_copy() {
        let cache = small_cache();
        let shared = cache.get_readable_page(FileOrigin::Data, 3, load_with(5)).unwrap();
        let mut writable = cache
            .get_writable_page(FileOrigin::Data, 3, |_| panic!("should copy"))
            .unwrap();
        writable[0] = 99;
        assert_eq!(shared[0], 5);
        assert_eq!(writable[1], 5);
    }

    #[test]
    fn test_discarded_writable_returns_to_pool() {
        let cache = small_cache();
        let page = cache.new_page();
        assert_eq!(cache.stats().free_pages, 3);
        drop(page);
        assert_eq!(cache.stats().free_pages, 4);
    }

    #[test]
    fn test_publish_copies_into_unused_instance() {
        let cache = small_cache();
        let first = cache.get_readable_page(FileOrigin::Log, 0, load_with(1)).unwrap();
        drop(first);

        let mut page = cache.new_page();
        page.fill(2);
        let published = cache.mark_as_read_only(page, FileOrigin::Log, 0);
        assert_eq!(published[0], 2);
        assert_eq!(cache.stats().cached_pages, 1);
        // one buffer for the cached instance, the writable's went back
        assert_eq!(cache.stats().free_pages, 3);
    }

    #[test]
    fn test_publish_preserves_reader_snapshot() {
        let cache = small_cache();
        let old_reader = cache.get_readable_page(FileOrigin::Log, 7, load_with(1)).unwrap();

        let mut page = cache
            .get_writable_page(FileOrigin::Log, 7, |_| unreachable!())
            .unwrap();
        page.fill(2);
        cache.mark_as_read_only(page, FileOrigin::Log, 7);

        assert!(old_reader.iter().all(|&b| b == 1));
        let new_reader = cache
            .get_readable_page(FileOrigin::Log, 7, |_| unreachable!())
            .unwrap();
        assert!(new_reader.iter().all(|&b| b == 2));

        drop(old_reader);
        // the replaced instance returned its buffer
        assert_eq!(cache.stats().cached_pages, 1);
    }

    #[test]
    fn test_reclaim_before_growing() {
        let cache = small_cache();
        for position in 0..4 {
            drop(cache.get_readable_page(FileOrigin::Data, position, load_with(0)).unwrap());
        }
        assert_eq!(cache.stats().segments, 1);
        assert_eq!(cache.stats().free_pages, 0);

        // Pool is empty and all four pages are unused: reclaim the oldest two.
        drop(cache.get_readable_page(FileOrigin::Data, 10, load_with(0)).unwrap());
        let stats = cache.stats();
        assert_eq!(stats.segments, 1);
        assert_eq!(stats.reclaimed_pages, 2);
        assert!(cache
            .get_readable_page(FileOrigin::Data, 0, load_with(9))
            .unwrap()
            .iter()
            .all(|&b| b == 9));
    }

    #[test]
    fn test_grow_when_pages_are_held() {
        let cache = small_cache();
        let held: Vec<_> = (0..4)
            .map(|p| cache.get_readable_page(FileOrigin::Data, p, load_with(0)).unwrap())
            .collect();
        let _extra = cache.get_readable_page(FileOrigin::Data, 4, load_with(0)).unwrap();
        assert_eq!(cache.stats().segments, 2);
        assert_eq!(cache.stats().reclaimed_pages, 0);
        drop(held);
    }

    #[test]
    fn test_clear_requires_no_readers() {
        let cache = small_cache();
        let page = cache.get_readable_page(FileOrigin::Data, 1, load_with(0)).unwrap();
        assert!(cache.clear().is_err());
        drop(page);
        cache.clear().unwrap();
        assert_eq!(cache.stats().cached_pages, 0);
        assert_eq!(cache.stats().free_pages, 4);
    }

    #[test]
    fn test_concurrent_readers_see_stable_snapshot() {
        let cache = Arc::new(small_cache());
        let before = Arc::new(Barrier::new(5));
        let published = Arc::new(Barrier::new(5));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let before = Arc::clone(&before);
                let published = Arc::clone(&published);
                thread::spawn(move || {
                    let early = cache.get_readable_page(FileOrigin::Log, 1, load_with(1)).unwrap();
                    before.wait();
                    published.wait();
                    let late = cache
                        .get_readable_page(FileOrigin::Log, 1, |_| unreachable!())
                        .unwrap();
                    (early.iter().all(|&b| b == 1), late.iter().all(|&b| b == 2))
                })
            })
            .collect();

        before.wait();
        let mut page = cache
            .get_writable_page(FileOrigin::Log, 1, |_| unreachable!())
            .unwrap();
        page.fill(2);
        cache.mark_as_read_only(page, FileOrigin::Log, 1);
        published.wait();

        for reader in readers {
            assert_eq!(reader.join().unwrap(), (true, true));
        }
    }
}
