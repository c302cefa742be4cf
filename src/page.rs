//! Page and buffer pool: a fixed-capacity, page-granular cache in front of
//! the table file manager (§4.C). A page is identified by `(table_name,
//! page_number)`; the pool is cache-first for reads, exclusively owns its
//! cached pages, dirty set and recency order, and is safe for concurrent
//! readers and writers via a single internal lock plus atomic hit/miss
//! counters.
//!
//! Whole-file read/write remains the source of truth for correctness (§3);
//! this cache accelerates repeated reads and gives the table service a
//! place to track which pages have diverged from disk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Every page is this many bytes, header included.
pub const PAGE_SIZE: usize = 16 * 1024;

/// Default pool capacity: 1,024 pages, about 16 MiB.
pub const DEFAULT_MAX_PAGES: usize = 1024;

/// Identifies one cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table_name: String,
    pub page_number: u64,
}

impl PageId {
    pub fn new(table_name: impl Into<String>, page_number: u64) -> Self {
        PageId { table_name: table_name.into(), page_number }
    }
}

/// A 16 KiB page: an 8-byte header (record count, free-space offset, both
/// big-endian u32) followed by raw record bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    bytes: Vec<u8>,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("page payload must be exactly {PAGE_SIZE} bytes, got {0}")]
    WrongSize(usize),
    #[error("failed to flush dirty page {0:?}: {1}")]
    FlushFailed(PageId, String),
    #[error("failed to load page {0:?}: {1}")]
    LoadFailed(PageId, String),
}

impl Page {
    /// An empty page: zero records, free space starting right after the header.
    pub fn empty() -> Self {
        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[4..8].copy_from_slice(&8u32.to_be_bytes());
        Page { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.len() != PAGE_SIZE {
            return Err(Error::WrongSize(bytes.len()));
        }
        Ok(Page { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn record_count(&self) -> u32 {
        u32::from_be_bytes(self.bytes[0..4].try_into().unwrap())
    }

    pub fn free_space_offset(&self) -> u32 {
        u32::from_be_bytes(self.bytes[4..8].try_into().unwrap())
    }
}

/// Counters and sizing reported by `BufferPool::stats`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub cached_pages: usize,
    pub max_pages: usize,
    pub dirty_pages: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Callback the pool uses to commit a dirty page back to durable storage.
/// Supplied by the table service; writes the whole owning table file (§4.D
/// has no sub-file page addressing), keyed by the page's table name.
pub type PageWriter = Arc<dyn Fn(&PageId, &Page) -> Result<(), String> + Send + Sync>;

struct Inner {
    max_pages: usize,
    // Front = least recently used, back = most recently used.
    order: VecDeque<PageId>,
    entries: HashMap<PageId, Arc<Page>>,
    dirty: HashSet<PageId>,
}

impl Inner {
    fn touch(&mut self, page_id: &PageId) {
        if let Some(pos) = self.order.iter().position(|p| p == page_id) {
            let id = self.order.remove(pos).unwrap();
            self.order.push_back(id);
        }
    }

    /// Evicts the single least-recently-used entry, flushing it first if
    /// dirty. Ties (never-accessed entries with equal recency) are broken by
    /// insertion order, which is exactly what the front of `order` holds.
    fn evict_one(&mut self, writer: Option<&PageWriter>) -> Option<Result<(), Error>> {
        let victim = self.order.pop_front()?;
        let mut result = None;
        if self.dirty.remove(&victim) {
            if let Some(page) = self.entries.get(&victim) {
                match writer {
                    Some(w) => {
                        if let Err(e) = w(&victim, page) {
                            result = Some(Err(Error::FlushFailed(victim.clone(), e)));
                        }
                    }
                    None => {
                        log::warn!("evicting dirty page {victim:?} with no flush writer configured");
                    }
                }
            }
        }
        self.entries.remove(&victim);
        Some(result.unwrap_or(Ok(())))
    }

    fn insert(&mut self, page_id: PageId, page: Arc<Page>, writer: Option<&PageWriter>) -> Result<(), Error> {
        if self.entries.contains_key(&page_id) {
            self.entries.insert(page_id.clone(), page);
            self.touch(&page_id);
            return Ok(());
        }
        while self.entries.len() >= self.max_pages {
            match self.evict_one(writer) {
                Some(Err(e)) => return Err(e),
                Some(Ok(())) => {}
                None => break,
            }
        }
        self.entries.insert(page_id.clone(), page);
        self.order.push_back(page_id);
        Ok(())
    }
}

/// A fixed-capacity, LRU-evicting cache of pages, shared across connections.
pub struct BufferPool {
    inner: Mutex<Inner>,
    writer: Option<PageWriter>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(max_pages: usize) -> Self {
        BufferPool {
            inner: Mutex::new(Inner {
                max_pages,
                order: VecDeque::new(),
                entries: HashMap::new(),
                dirty: HashSet::new(),
            }),
            writer: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_writer(max_pages: usize, writer: PageWriter) -> Self {
        let mut pool = Self::new(max_pages);
        pool.writer = Some(writer);
        pool
    }

    /// Cache-first read. On a miss, `loader` is invoked to fetch the page
    /// from disk; the pool never reads from disk on its own. Updates
    /// access-recency on both hits and loads.
    pub fn get_or_load<F>(&self, page_id: &PageId, loader: F) -> Result<Arc<Page>, Error>
    where
        F: FnOnce() -> Result<Page, Error>,
    {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        if let Some(page) = inner.entries.get(page_id).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            inner.touch(page_id);
            return Ok(page);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        drop(inner);
        let page = Arc::new(loader()?);
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        inner.insert(page_id.clone(), page.clone(), self.writer.as_ref())?;
        Ok(page)
    }

    /// Inserts or replaces a page and marks it dirty. Updates access-recency.
    pub fn put(&self, page_id: PageId, page: Page) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        inner.insert(page_id.clone(), Arc::new(page), self.writer.as_ref())?;
        inner.dirty.insert(page_id);
        Ok(())
    }

    pub fn invalidate(&self, page_id: &PageId) {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        inner.entries.remove(page_id);
        inner.dirty.remove(page_id);
        if let Some(pos) = inner.order.iter().position(|p| p == page_id) {
            inner.order.remove(pos);
        }
    }

    pub fn invalidate_table(&self, table_name: &str) {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let to_remove: Vec<PageId> =
            inner.entries.keys().filter(|p| p.table_name == table_name).cloned().collect();
        for page_id in to_remove {
            inner.entries.remove(&page_id);
            inner.dirty.remove(&page_id);
            if let Some(pos) = inner.order.iter().position(|p| *p == page_id) {
                inner.order.remove(pos);
            }
        }
    }

    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        inner.entries.clear();
        inner.dirty.clear();
        inner.order.clear();
    }

    /// Commits every dirty page through the configured writer. A pool built
    /// via `new` (no writer) clears dirty bookkeeping without writing
    /// anything, matching a stubbed-writer build.
    pub fn flush_all(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let dirty: Vec<PageId> = inner.dirty.iter().cloned().collect();
        for page_id in dirty {
            if let Some(page) = inner.entries.get(&page_id).cloned() {
                if let Some(writer) = &self.writer {
                    writer(&page_id, &page).map_err(|e| Error::FlushFailed(page_id.clone(), e))?;
                }
            }
            inner.dirty.remove(&page_id);
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        PoolStats {
            cached_pages: inner.entries.len(),
            max_pages: inner.max_pages,
            dirty_pages: inner.dirty.len(),
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_tagged(tag: u8) -> Page {
        let mut p = Page::empty();
        p.bytes[8] = tag;
        p
    }

    #[test]
    fn miss_then_hit_updates_counters() {
        let pool = BufferPool::new(4);
        let id = PageId::new("t", 0);
        let loads = std::sync::atomic::AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::Relaxed);
            Ok(Page::empty())
        };
        pool.get_or_load(&id, load).unwrap();
        pool.get_or_load(&id, || panic!("should not reload on hit")).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(loads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let pool = BufferPool::new(2);
        for i in 0..2u64 {
            pool.get_or_load(&PageId::new("t", i), || Ok(Page::empty())).unwrap();
        }
        // Touch page 0 so page 1 becomes the LRU entry.
        pool.get_or_load(&PageId::new("t", 0), || panic!("cached")).unwrap();
        pool.get_or_load(&PageId::new("t", 2), || Ok(Page::empty())).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.cached_pages, 2);
        // Page 1 was evicted; 0 and 2 remain cached.
        pool.get_or_load(&PageId::new("t", 0), || panic!("0 should still be cached")).unwrap();
        pool.get_or_load(&PageId::new("t", 2), || panic!("2 should still be cached")).unwrap();
        let reload_count = std::sync::atomic::AtomicUsize::new(0);
        pool.get_or_load(&PageId::new("t", 1), || {
            reload_count.fetch_add(1, Ordering::Relaxed);
            Ok(Page::empty())
        })
        .unwrap();
        assert_eq!(reload_count.load(Ordering::Relaxed), 1, "page 1 should have been evicted");
    }

    #[test]
    fn lru_sequence_leaves_exactly_last_c_distinct_ids() {
        let capacity = 3;
        let pool = BufferPool::new(capacity);
        for i in 0..10u64 {
            pool.get_or_load(&PageId::new("t", i), || Ok(Page::empty())).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.cached_pages, capacity);
        for i in 7..10u64 {
            pool.get_or_load(&PageId::new("t", i), || panic!("should still be cached: {i}")).unwrap();
        }
    }

    #[test]
    fn dirty_page_is_flushed_before_eviction() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();
        let writer: PageWriter = Arc::new(move |id, _page| {
            flushed_clone.lock().unwrap().push(id.clone());
            Ok(())
        });
        let pool = BufferPool::with_writer(1, writer);
        pool.put(PageId::new("t", 0), page_tagged(1)).unwrap();
        pool.put(PageId::new("t", 1), page_tagged(2)).unwrap();
        assert_eq!(flushed.lock().unwrap().as_slice(), &[PageId::new("t", 0)]);
    }

    #[test]
    fn flush_all_writes_every_dirty_page_and_clears_dirty_set() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();
        let writer: PageWriter = Arc::new(move |id, _page| {
            flushed_clone.lock().unwrap().push(id.clone());
            Ok(())
        });
        let pool = BufferPool::with_writer(8, writer);
        pool.put(PageId::new("t", 0), Page::empty()).unwrap();
        pool.put(PageId::new("t", 1), Page::empty()).unwrap();
        pool.flush_all().unwrap();
        assert_eq!(flushed.lock().unwrap().len(), 2);
        assert_eq!(pool.stats().dirty_pages, 0);
    }

    #[test]
    fn invalidate_table_removes_only_that_tables_pages() {
        let pool = BufferPool::new(8);
        pool.get_or_load(&PageId::new("a", 0), || Ok(Page::empty())).unwrap();
        pool.get_or_load(&PageId::new("b", 0), || Ok(Page::empty())).unwrap();
        pool.invalidate_table("a");
        assert_eq!(pool.stats().cached_pages, 1);
        let reload = std::sync::atomic::AtomicUsize::new(0);
        pool.get_or_load(&PageId::new("b", 0), || {
            reload.fetch_add(1, Ordering::Relaxed);
            Ok(Page::empty())
        })
        .unwrap();
        assert_eq!(reload.load(Ordering::Relaxed), 0, "b's page should still be cached");
    }

    #[test]
    fn hit_rate_reflects_counters() {
        let pool = BufferPool::new(8);
        pool.get_or_load(&PageId::new("t", 0), || Ok(Page::empty())).unwrap();
        pool.get_or_load(&PageId::new("t", 0), || panic!("cached")).unwrap();
        pool.get_or_load(&PageId::new("t", 0), || panic!("cached")).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn concurrent_access_keeps_counters_consistent() {
        let pool = Arc::new(BufferPool::new(16));
        let mut handles = vec![];
        for t in 0..8 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    pool.get_or_load(&PageId::new("shared", t % 4), || Ok(Page::empty())).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 400);
    }
}
