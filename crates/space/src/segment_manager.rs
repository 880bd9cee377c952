use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cooldb_buffer::BufferPool;
use cooldb_common::{CoolDbError, FileId, FilePage, LatchMode, LogData};
use cooldb_txn::{Transaction, TransactionLogger};
use tracing::debug;

use crate::extent::{Extent, Segment};
use crate::free_extent_index::FreeExtentMethod;
use crate::used_extent_index::UsedExtentMethod;

/// Page type tag for segment-catalog mutations, dispatched to by the
/// top-level recovery context.
pub const PAGE_TYPE_SEGMENT_CATALOG: u8 = 1;

const LOG_DATA_EXTENTS: u8 = 1;

pub fn encode_extents(extents: &[Extent]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + extents.len() * 10);
    out.extend_from_slice(&(extents.len() as u16).to_be_bytes());
    for e in extents {
        out.extend_from_slice(&e.start.file_id.to_be_bytes());
        out.extend_from_slice(&e.start.page_num.to_be_bytes());
        out.extend_from_slice(&e.size.to_be_bytes());
    }
    out
}

pub fn decode_extents(bytes: &[u8]) -> Vec<Extent> {
    if bytes.len() < 2 {
        return Vec::new();
    }
    let count = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let mut out = Vec::with_capacity(count);
    let mut off = 2;
    for _ in 0..count {
        if bytes.len() < off + 10 {
            break;
        }
        let file_id = FileId::from_be_bytes([bytes[off], bytes[off + 1]]);
        let page_num = u32::from_be_bytes(bytes[off + 2..off + 6].try_into().unwrap());
        let size = u32::from_be_bytes(bytes[off + 6..off + 10].try_into().unwrap());
        out.push(Extent::new(FilePage::new(file_id, page_num), size));
        off += 10;
    }
    out
}

/// Maps logical segments to on-disk extents. The catalog itself bootstraps
/// as a segment of itself: each segment's extent list lives in the page
/// body addressed by its own `segmentId`, logged through the same
/// undo/redo machinery every other mutation uses.
pub struct SegmentManager {
    buffer: Arc<BufferPool>,
    logger: Arc<TransactionLogger>,
    free: Mutex<FreeExtentMethod>,
    used: Mutex<UsedExtentMethod>,
    catalog: Mutex<HashMap<FilePage, Segment>>,
    /// Fault-injection: fail after the used-index insert, before the
    /// matching free-index update (simulates a crash mid-allocation).
    pub test_failure1: AtomicBool,
    /// Fault-injection: fail after the free-index update, before the
    /// segment's `nextSize` bookkeeping commits.
    pub test_failure2: AtomicBool,
}

impl SegmentManager {
    pub fn new(buffer: Arc<BufferPool>, logger: Arc<TransactionLogger>) -> Self {
        Self {
            buffer,
            logger,
            free: Mutex::new(FreeExtentMethod::new()),
            used: Mutex::new(UsedExtentMethod::new()),
            catalog: Mutex::new(HashMap::new()),
            test_failure1: AtomicBool::new(false),
            test_failure2: AtomicBool::new(false),
        }
    }

    /// Register a free range of raw pages, e.g. ones just added by
    /// extending a data file outside of any segment.
    pub fn seed_free_extent(&self, extent: Extent) {
        self.free.lock().unwrap().insert_extent(extent);
    }

    pub fn create_segment(&self, segment_id: FilePage, segment_type: u8, initial_size: u32, growth_rate: u32) {
        let segment = Segment::new(segment_id, segment_type, initial_size, growth_rate);
        self.catalog.lock().unwrap().insert(segment_id, segment);
    }

    pub fn segment_extents(&self, segment_id: FilePage) -> Vec<Extent> {
        self.used.lock().unwrap().extents_for(segment_id)
    }

    pub fn free_pages(&self) -> u32 {
        self.free.lock().unwrap().total_free_pages()
    }

    /// Replay a catalog-page redo/undo record during recovery: overwrite
    /// `segment_id`'s used extents with `extents`. A no-op if the segment
    /// was never (re-)registered with `create_segment` in this process —
    /// catalog bootstrap from the log itself is not implemented.
    pub fn recovery_replace_extents(&self, segment_id: FilePage, extents: Vec<Extent>) {
        let mut used = self.used.lock().unwrap();
        for old in used.extents_for(segment_id) {
            used.remove(segment_id, old);
        }
        for e in &extents {
            used.insert(segment_id, *e);
        }
        drop(used);

        let mut catalog = self.catalog.lock().unwrap();
        if let Some(segment) = catalog.get_mut(&segment_id) {
            segment.extents = extents;
        }
    }

    /// Grow `segment`'s allocation by `nextSize` pages (then advance
    /// `nextSize` by `growthRate`), logging the catalog-page mutation so the
    /// move is atomic and recoverable. Returns the new extent.
    pub fn allocate_next_extent(
        &self,
        trans: &Transaction,
        segment_id: FilePage,
        file_id: FileId,
    ) -> Result<Extent, CoolDbError> {
        let requested = {
            let catalog = self.catalog.lock().unwrap();
            catalog.get(&segment_id).ok_or_else(|| CoolDbError::Other(format!("unknown segment {segment_id}")))?.next_size
        };

        let (taken, remainder) = match self.free.lock().unwrap().begin_allocate(requested) {
            Some(pair) => pair,
            None => {
                let start = self.buffer_file_extend(file_id, requested)?;
                (Extent::new(start, requested), None)
            }
        };

        let before = self.segment_snapshot(segment_id);
        self.used.lock().unwrap().insert(segment_id, taken);
        let after_used = Self::segment_snapshot_with(&before, Some(taken), None);
        self.log_catalog_change(trans, segment_id, &before, &after_used)?;

        if self.test_failure1.swap(false, Ordering::SeqCst) {
            return Err(CoolDbError::Other("injected failure after used-extent insert".into()));
        }

        if let Some(rest) = remainder {
            self.free.lock().unwrap().insert_extent(rest);
        }

        if self.test_failure2.swap(false, Ordering::SeqCst) {
            return Err(CoolDbError::Other("injected failure after free-extent update".into()));
        }

        let mut catalog = self.catalog.lock().unwrap();
        if let Some(segment) = catalog.get_mut(&segment_id) {
            segment.extents.push(taken);
            segment.next_size += segment.growth_rate;
        }
        debug!(%segment_id, pages = taken.size, "allocated extent");
        Ok(taken)
    }

    /// Return every extent belonging to `segment` to the free index,
    /// coalescing, and drop it from the catalog.
    pub fn drop_segment(&self, trans: &Transaction, segment_id: FilePage) -> Result<(), CoolDbError> {
        let extents = {
            let mut catalog = self.catalog.lock().unwrap();
            catalog.remove(&segment_id).map(|s| s.extents).unwrap_or_default()
        };
        let before = self.segment_snapshot(segment_id);
        for extent in &extents {
            self.used.lock().unwrap().remove(segment_id, *extent);
            self.free.lock().unwrap().insert_extent(*extent);
        }
        let after = Vec::new();
        self.log_catalog_change(trans, segment_id, &before, &after)?;
        debug!(%segment_id, count = extents.len(), "dropped segment");
        Ok(())
    }

    fn buffer_file_extend(&self, file_id: FileId, n_pages: u32) -> Result<FilePage, CoolDbError> {
        self.buffer.extend_file(file_id, n_pages)
    }

    fn segment_snapshot(&self, segment_id: FilePage) -> Vec<Extent> {
        self.used.lock().unwrap().extents_for(segment_id)
    }

    fn segment_snapshot_with(before: &[Extent], added: Option<Extent>, removed: Option<Extent>) -> Vec<Extent> {
        let mut out: Vec<Extent> = before.iter().copied().filter(|e| Some(*e) != removed).collect();
        out.extend(added);
        out
    }

    fn log_catalog_change(
        &self,
        trans: &Transaction,
        segment_id: FilePage,
        before: &[Extent],
        after: &[Extent],
    ) -> Result<(), CoolDbError> {
        let undo_data = vec![LogData { id: LOG_DATA_EXTENTS, bytes: encode_extents(before) }];
        let redo_data = vec![LogData { id: LOG_DATA_EXTENTS, bytes: encode_extents(after) }];
        let mut buf = self.buffer.pin(segment_id, LatchMode::Exclusive)?;
        let lsn = self.logger.write_undo_redo(trans, &mut buf, PAGE_TYPE_SEGMENT_CATALOG, undo_data, redo_data)?;
        self.buffer.unpin_dirty(buf, cooldb_common::Affinity::Liked, lsn);
        Ok(())
    }
}

/// Apply a segment-catalog redo/undo record's `LOG_DATA_EXTENTS` payload to
/// an in-memory catalog entry — shared by the top-level `RecoveryContext`
/// dispatcher for `PAGE_TYPE_SEGMENT_CATALOG`.
pub fn apply_catalog_payload(data: &[LogData]) -> Option<Vec<Extent>> {
    data.iter().find(|d| d.id == LOG_DATA_EXTENTS).map(|d| decode_extents(&d.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooldb_buffer::FileManager;
    use cooldb_wal::LogManager;
    use tempfile::tempdir;

    fn harness() -> (Arc<SegmentManager>, Arc<Transaction>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let log = Arc::new(LogManager::create(&dir.path().join("a.redo"), &dir.path().join("a.undo"), 16, 1024).unwrap());
        let fm = Arc::new(FileManager::new());
        fm.add_file(0, &dir.path().join("data.db0")).unwrap();
        fm.extend(0, 32).unwrap();
        let buffer = Arc::new(BufferPool::new(fm, 8));
        buffer.set_write_ahead_logging(log.clone());
        let logger = Arc::new(TransactionLogger::new(log, buffer.clone()));
        let mgr = Arc::new(SegmentManager::new(buffer, logger));
        mgr.seed_free_extent(Extent::new(FilePage::new(0, 1), 30));
        let trans = Arc::new(Transaction::new(1, 0));
        mgr.create_segment(FilePage::new(0, 0), 1, 4, 4);
        (mgr, trans, dir)
    }

    #[test]
    fn allocate_grows_next_size_by_growth_rate() {
        let (mgr, trans, _dir) = harness();
        let e1 = mgr.allocate_next_extent(&trans, FilePage::new(0, 0), 0).unwrap();
        assert_eq!(e1.size, 4);
        let e2 = mgr.allocate_next_extent(&trans, FilePage::new(0, 0), 0).unwrap();
        assert_eq!(e2.size, 8);
        assert_eq!(mgr.segment_extents(FilePage::new(0, 0)).len(), 2);
    }

    #[test]
    fn test_failure1_aborts_before_free_update() {
        let (mgr, trans, _dir) = harness();
        let free_before = mgr.free_pages();
        mgr.test_failure1.store(true, Ordering::SeqCst);
        assert!(mgr.allocate_next_extent(&trans, FilePage::new(0, 0), 0).is_err());
        assert_eq!(mgr.free_pages(), free_before - 4);
        assert_eq!(mgr.segment_extents(FilePage::new(0, 0)).len(), 1);
    }

    #[test]
    fn drop_segment_returns_pages_to_free() {
        let (mgr, trans, _dir) = harness();
        mgr.allocate_next_extent(&trans, FilePage::new(0, 0), 0).unwrap();
        let free_before = mgr.free_pages();
        mgr.drop_segment(&trans, FilePage::new(0, 0)).unwrap();
        assert_eq!(mgr.free_pages(), free_before + 4);
        assert!(mgr.segment_extents(FilePage::new(0, 0)).is_empty());
    }
}
