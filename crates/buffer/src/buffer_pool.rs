use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use cooldb_common::{
    empty_page, page_lsn, Affinity, CoolDbError, DurabilityCoordinator, FilePage, LatchMode, Lsn, PageBuf,
};
use tracing::{debug, trace, warn};

use crate::file_manager::FileManager;

/// One cache slot: raw page bytes behind `UnsafeCell` (access is gated by
/// `meta`'s reader/writer counts, enforced by `BufferPool`, never by the
/// borrow checker directly — the same trust boundary a hand-rolled latch in
/// any systems language relies on) plus the latch/pin bookkeeping.
struct Slot {
    data: UnsafeCell<PageBuf>,
    meta: Mutex<SlotMeta>,
    cond: Condvar,
}

unsafe impl Sync for Slot {}

struct SlotMeta {
    page: Option<FilePage>,
    readers: u32,
    writer: bool,
    pin_count: u32,
    dirty: bool,
    affinity: Affinity,
    touches: u8,
}

impl Default for SlotMeta {
    fn default() -> Self {
        Self { page: None, readers: 0, writer: false, pin_count: 0, dirty: false, affinity: Affinity::Liked, touches: 0 }
    }
}

/// An exclusive or shared hold on one cached page. Must be released via
/// `BufferPool::unpin` / `unpin_dirty` — there is no implicit `Drop`-based
/// unpin, mirroring the explicit `unPin` call in the component design.
pub struct PageBuffer {
    slot: Arc<Slot>,
    idx: usize,
    page: FilePage,
    mode: LatchMode,
}

impl PageBuffer {
    pub fn page(&self) -> FilePage {
        self.page
    }

    pub fn mode(&self) -> LatchMode {
        self.mode
    }

    pub fn read(&self) -> &PageBuf {
        unsafe { &*self.slot.data.get() }
    }

    pub fn write(&mut self) -> &mut PageBuf {
        debug_assert!(matches!(self.mode, LatchMode::Exclusive), "write() on a SHARED pin");
        unsafe { &mut *self.slot.data.get() }
    }
}

struct DirtyEntry {
    rec_lsn: Lsn,
}

/// Fixed-capacity, auto-growable page cache with shared/exclusive latches,
/// HATED→LIKED→LOVED affinity replacement, and WAL-coordinated flushing.
pub struct BufferPool {
    file_manager: Arc<FileManager>,
    slots: RwLock<Vec<Arc<Slot>>>,
    page_table: Mutex<HashMap<FilePage, usize>>,
    dirty_pages: Mutex<HashMap<FilePage, DirtyEntry>>,
    wal: RwLock<Option<Arc<dyn DurabilityCoordinator>>>,
    allow_growth: Mutex<bool>,
    misses: Mutex<u64>,
}

impl BufferPool {
    pub fn new(file_manager: Arc<FileManager>, capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Arc::new(Slot { data: UnsafeCell::new(empty_page()), meta: Mutex::new(SlotMeta::default()), cond: Condvar::new() })).collect();
        Self {
            file_manager,
            slots: RwLock::new(slots),
            page_table: Mutex::new(HashMap::new()),
            dirty_pages: Mutex::new(HashMap::new()),
            wal: RwLock::new(None),
            allow_growth: Mutex::new(true),
            misses: Mutex::new(0),
        }
    }

    pub fn set_write_ahead_logging(&self, wal: Arc<dyn DurabilityCoordinator>) {
        *self.wal.write().unwrap() = Some(wal);
    }

    pub fn set_allow_growth(&self, allow: bool) {
        *self.allow_growth.lock().unwrap() = allow;
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    pub fn is_cached(&self, page: FilePage) -> bool {
        self.page_table.lock().unwrap().contains_key(&page)
    }

    /// Grow `file_id` by `n_pages`, returning the first new page. A thin
    /// passthrough to the underlying file manager for callers (segment
    /// allocation) that need raw pages before any buffer slot touches them.
    pub fn extend_file(&self, file_id: cooldb_common::FileId, n_pages: u32) -> Result<FilePage, CoolDbError> {
        self.file_manager.extend(file_id, n_pages)
    }

    pub fn ensure_capacity(&self, n: usize) {
        let mut slots = self.slots.write().unwrap();
        while slots.len() < n {
            slots.push(Arc::new(Slot { data: UnsafeCell::new(empty_page()), meta: Mutex::new(SlotMeta::default()), cond: Condvar::new() }));
        }
    }

    /// Snapshot the dirty-page table for a fuzzy checkpoint.
    pub fn check_point(&self) -> HashMap<FilePage, Lsn> {
        self.dirty_pages.lock().unwrap().iter().map(|(&p, e)| (p, e.rec_lsn)).collect()
    }

    pub fn pin(&self, page: FilePage, mode: LatchMode) -> Result<PageBuffer, CoolDbError> {
        loop {
            if let Some(idx) = self.page_table.lock().unwrap().get(&page).copied() {
                let slot = self.slots.read().unwrap()[idx].clone();
                if self.try_latch(&slot, mode, true) {
                    return Ok(PageBuffer { slot, idx, page, mode });
                }
                continue;
            }
            self.load_page(page)?;
        }
    }

    pub fn try_pin(&self, page: FilePage, mode: LatchMode) -> Result<Option<PageBuffer>, CoolDbError> {
        if let Some(idx) = self.page_table.lock().unwrap().get(&page).copied() {
            let slot = self.slots.read().unwrap()[idx].clone();
            return Ok(if self.try_latch(&slot, mode, false) { Some(PageBuffer { slot, idx, page, mode }) } else { None });
        }
        match self.load_page(page) {
            Ok(()) => {
                let idx = *self.page_table.lock().unwrap().get(&page).unwrap();
                let slot = self.slots.read().unwrap()[idx].clone();
                Ok(if self.try_latch(&slot, mode, false) { Some(PageBuffer { slot, idx, page, mode }) } else { None })
            }
            Err(e) => Err(e),
        }
    }

    /// Block (if `wait`) or fail immediately until the latch is compatible,
    /// then acquire it. Also applies the LIKED→LOVED promotion-on-hit rule.
    fn try_latch(&self, slot: &Arc<Slot>, mode: LatchMode, wait: bool) -> bool {
        let mut meta = slot.meta.lock().unwrap();
        loop {
            let compatible = match mode {
                LatchMode::Shared => !meta.writer,
                LatchMode::Exclusive => !meta.writer && meta.readers == 0,
            };
            if compatible {
                match mode {
                    LatchMode::Shared => meta.readers += 1,
                    LatchMode::Exclusive => meta.writer = true,
                }
                meta.pin_count += 1;
                meta.touches = meta.touches.saturating_add(1);
                if meta.touches >= 2 && meta.affinity == Affinity::Liked {
                    meta.affinity = Affinity::Loved;
                }
                return true;
            }
            if !wait {
                return false;
            }
            meta = slot.cond.wait(meta).unwrap();
        }
    }

    pub fn unpin(&self, buf: PageBuffer, affinity: Affinity) {
        self.release(buf, affinity, None);
    }

    pub fn unpin_dirty(&self, buf: PageBuffer, affinity: Affinity, end_lsn: Lsn) {
        self.release(buf, affinity, Some(end_lsn));
    }

    fn release(&self, buf: PageBuffer, affinity: Affinity, dirty_lsn: Option<Lsn>) {
        let PageBuffer { slot, idx: _, page, mode } = buf;
        {
            let mut meta = slot.meta.lock().unwrap();
            match mode {
                LatchMode::Shared => meta.readers -= 1,
                LatchMode::Exclusive => meta.writer = false,
            }
            meta.pin_count -= 1;
            meta.affinity = affinity;
            if dirty_lsn.is_some() {
                meta.dirty = true;
            }
        }
        if let Some(lsn) = dirty_lsn {
            let mut dirty = self.dirty_pages.lock().unwrap();
            dirty.entry(page).or_insert(DirtyEntry { rec_lsn: lsn });
        }
        slot.cond.notify_all();
    }

    /// Flush one dirty page, enforcing WAL: the log must be durable up to
    /// the page's `pageLSN` before the page reaches its home location.
    fn flush_dirty(&self, slot: &Slot, page: FilePage) -> Result<(), CoolDbError> {
        let snapshot = unsafe { *slot.data.get() };
        let lsn = page_lsn(&snapshot);
        if let Some(wal) = self.wal.read().unwrap().as_ref() {
            wal.flush_to(lsn)?;
        }
        self.file_manager.flush(page, &snapshot, false)?;
        self.dirty_pages.lock().unwrap().remove(&page);
        let mut meta = slot.meta.lock().unwrap();
        meta.dirty = false;
        Ok(())
    }

    /// Cache miss path: find an evictable slot (scanning HATED→LIKED→LOVED),
    /// flushing it if dirty, growing the pool if none is evictable and
    /// growth is allowed, then fetch `page` into it.
    fn load_page(&self, page: FilePage) -> Result<(), CoolDbError> {
        let victim_idx = self.find_victim();
        let idx = match victim_idx {
            Some(idx) => idx,
            None => {
                if *self.allow_growth.lock().unwrap() {
                    let mut slots = self.slots.write().unwrap();
                    slots.push(Arc::new(Slot {
                        data: UnsafeCell::new(empty_page()),
                        meta: Mutex::new(SlotMeta::default()),
                        cond: Condvar::new(),
                    }));
                    slots.len() - 1
                } else {
                    return Err(CoolDbError::BufferNotFound(page));
                }
            }
        };

        let slot = self.slots.read().unwrap()[idx].clone();
        let old_page = {
            let meta = slot.meta.lock().unwrap();
            meta.page
        };
        if let Some(old) = old_page {
            let dirty = slot.meta.lock().unwrap().dirty;
            if dirty {
                self.flush_dirty(&slot, old)?;
            }
            self.page_table.lock().unwrap().remove(&old);
        }

        let mut buf = empty_page();
        self.file_manager.fetch(page, &mut buf)?;
        unsafe {
            *slot.data.get() = buf;
        }
        {
            let mut meta = slot.meta.lock().unwrap();
            meta.page = Some(page);
            meta.dirty = false;
            meta.affinity = Affinity::Liked;
            meta.touches = 0;
        }
        self.page_table.lock().unwrap().insert(page, idx);
        self.bump_misses();
        trace!(?page, idx, "loaded page into buffer pool");
        Ok(())
    }

    fn find_victim(&self) -> Option<usize> {
        let slots = self.slots.read().unwrap();
        for wanted in [Affinity::Hated, Affinity::Liked, Affinity::Loved] {
            for (idx, slot) in slots.iter().enumerate() {
                let meta = slot.meta.lock().unwrap();
                if meta.pin_count == 0 && meta.page.is_some() && meta.affinity == wanted {
                    return Some(idx);
                }
            }
        }
        // Any unpinned free slot (never populated) also counts, checked last
        // since it needs no eviction at all.
        for (idx, slot) in slots.iter().enumerate() {
            let meta = slot.meta.lock().unwrap();
            if meta.page.is_none() {
                return Some(idx);
            }
        }
        None
    }

    /// Ages the cache: after enough misses, demote one LOVED slot back to
    /// LIKED so a page touched long ago does not pin the cache forever.
    fn bump_misses(&self) {
        let mut misses = self.misses.lock().unwrap();
        *misses += 1;
        if *misses % 8 != 0 {
            return;
        }
        let slots = self.slots.read().unwrap();
        for slot in slots.iter() {
            let mut meta = slot.meta.lock().unwrap();
            if meta.affinity == Affinity::Loved && meta.pin_count == 0 {
                meta.affinity = Affinity::Liked;
                meta.touches = 0;
                debug!("aged a LOVED slot back to LIKED");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooldb_common::set_page_lsn;
    use tempfile::tempdir;

    struct NullCoordinator;
    impl DurabilityCoordinator for NullCoordinator {
        fn flush_to(&self, _lsn: Lsn) -> Result<(), CoolDbError> {
            Ok(())
        }
    }

    fn pool_with(capacity: usize) -> (Arc<FileManager>, BufferPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::new());
        fm.add_file(0, &dir.path().join("data.db0")).unwrap();
        fm.extend(0, 8).unwrap();
        let pool = BufferPool::new(fm.clone(), capacity);
        pool.set_write_ahead_logging(Arc::new(NullCoordinator));
        (fm, pool, dir)
    }

    #[test]
    fn pin_write_unpin_roundtrip() {
        let (_fm, pool, _dir) = pool_with(4);
        let page = FilePage::new(0, 2);
        let mut buf = pool.pin(page, LatchMode::Exclusive).unwrap();
        buf.write()[333] = 7;
        set_page_lsn(buf.write(), 10);
        pool.unpin_dirty(buf, Affinity::Liked, 10);

        let buf = pool.pin(page, LatchMode::Shared).unwrap();
        assert_eq!(buf.read()[333], 7);
        pool.unpin(buf, Affinity::Liked);
    }

    #[test]
    fn shared_pins_do_not_conflict() {
        let (_fm, pool, _dir) = pool_with(4);
        let page = FilePage::new(0, 1);
        let a = pool.pin(page, LatchMode::Shared).unwrap();
        let b = pool.try_pin(page, LatchMode::Shared).unwrap();
        assert!(b.is_some());
        pool.unpin(a, Affinity::Liked);
        pool.unpin(b.unwrap(), Affinity::Liked);
    }

    #[test]
    fn exclusive_excludes_others() {
        let (_fm, pool, _dir) = pool_with(4);
        let page = FilePage::new(0, 1);
        let a = pool.pin(page, LatchMode::Exclusive).unwrap();
        let b = pool.try_pin(page, LatchMode::Shared).unwrap();
        assert!(b.is_none());
        pool.unpin(a, Affinity::Liked);
    }

    #[test]
    fn pool_grows_past_capacity() {
        let (_fm, pool, _dir) = pool_with(1);
        let a = pool.pin(FilePage::new(0, 1), LatchMode::Exclusive).unwrap();
        let b = pool.pin(FilePage::new(0, 2), LatchMode::Exclusive).unwrap();
        assert_eq!(pool.capacity(), 2);
        pool.unpin(a, Affinity::Liked);
        pool.unpin(b, Affinity::Liked);
    }

    #[test]
    fn growth_disabled_fails_when_full() {
        let (_fm, pool, _dir) = pool_with(1);
        pool.set_allow_growth(false);
        let a = pool.pin(FilePage::new(0, 1), LatchMode::Exclusive).unwrap();
        let err = pool.try_pin(FilePage::new(0, 2), LatchMode::Exclusive).unwrap_err();
        assert!(matches!(err, CoolDbError::BufferNotFound(_)));
        pool.unpin(a, Affinity::Liked);
    }
}
