use std::collections::HashMap;

use cooldb_common::{CoolDbError, FilePage, Lsn, RecordType, RecoveryContext, TransId, UndoPointer};
use tracing::{debug, info, warn};

use crate::log_manager::LogManager;
use crate::record::extract_undo_pointer;

/// Earliest un-flushed log record per page, as reconstructed by analyze.
pub type DirtyPageTable = HashMap<FilePage, Lsn>;

/// Per-transaction state as reconstructed by analyze: the most recent
/// redo-log LSN it produced and its undo chain head in the undo log.
#[derive(Clone, Copy, Debug)]
pub struct TxnTableEntry {
    pub last_lsn: Lsn,
    pub undo_nxt: UndoPointer,
}

pub type TransactionTable = HashMap<TransId, TxnTableEntry>;

pub struct AnalyzeResult {
    pub dirty_pages: DirtyPageTable,
    pub txn_table: TransactionTable,
}

/// **Analyze**: scan forward from the last checkpoint's `master` LSN,
/// rebuilding the dirty-page table (earliest `recLSN` per page) and the
/// transaction table (removed on `COMMIT`).
pub fn analyze(log: &LogManager, master: Lsn) -> Result<AnalyzeResult, CoolDbError> {
    let mut dirty_pages = DirtyPageTable::new();
    let mut txn_table = TransactionTable::new();

    for item in log.iter_redo_from(master) {
        let (lsn, record) = item?;
        match record.rec_type {
            RecordType::Update | RecordType::Clr => {
                dirty_pages.entry(record.page).or_insert(lsn);
                let undo_nxt = extract_undo_pointer(&record.data).unwrap_or(UndoPointer::NULL);
                txn_table.insert(record.trans_id, TxnTableEntry { last_lsn: lsn, undo_nxt });
            }
            RecordType::Commit => {
                txn_table.remove(&record.trans_id);
            }
            RecordType::BeginCheckpoint | RecordType::EndCheckpoint => {}
        }
    }

    info!(
        dirty_pages = dirty_pages.len(),
        active_txns = txn_table.len(),
        "analyze pass complete"
    );
    Ok(AnalyzeResult { dirty_pages, txn_table })
}

/// **Redo**: scan forward from the lowest `recLSN` over all dirty pages,
/// reapplying every record whose page is dirty. `ctx.redo` is responsible
/// for the idempotence check (skip if the page's on-disk `pageLSN` already
/// covers this record) since only the caller's buffer pool can see that.
pub fn redo(log: &LogManager, analyzed: &AnalyzeResult, ctx: &dyn RecoveryContext) -> Result<(), CoolDbError> {
    let start = match analyzed.dirty_pages.values().min() {
        Some(&lsn) => lsn,
        None => {
            debug!("no dirty pages, redo pass is a no-op");
            return Ok(());
        }
    };

    for item in log.iter_redo_from(start) {
        let (lsn, record) = item?;
        match record.rec_type {
            RecordType::Update | RecordType::Clr => {
                if let Some(&rec_lsn) = analyzed.dirty_pages.get(&record.page) {
                    if lsn >= rec_lsn {
                        ctx.redo(record.page_type, record.page, lsn, 0, &record.data)?;
                    }
                }
            }
            RecordType::Commit | RecordType::BeginCheckpoint | RecordType::EndCheckpoint => {}
        }
    }
    Ok(())
}

/// **Undo**: for every transaction left in the table (never committed),
/// walk its undo chain backward, invoking `ctx.undo` for each record and
/// writing a CLR whose `undoNxtLSN` points one record earlier — a crash
/// mid-undo simply resumes from the CLR already on disk.
pub fn undo(log: &LogManager, analyzed: &AnalyzeResult, ctx: &dyn RecoveryContext) -> Result<(), CoolDbError> {
    for (&trans_id, entry) in analyzed.txn_table.iter() {
        let mut cursor = entry.undo_nxt;
        while !cursor.is_null() {
            let undo_record = log.read_undo(&cursor)?;
            let clr_data = ctx.undo(undo_record.page_type, undo_record.page, trans_id, &undo_record.data)?;
            let clr = crate::record::LogRecord {
                rec_type: RecordType::Clr,
                trans_id,
                page: undo_record.page,
                page_type: undo_record.page_type,
                undo_nxt_lsn: 0,
                data: clr_data,
            };
            let clr_lsn = log.append_redo(&clr)?;
            debug!(trans_id, clr_lsn, "wrote CLR during restart undo");
            cursor = extract_undo_pointer(&undo_record.data).unwrap_or(UndoPointer::NULL);
        }
    }
    warn!(count = analyzed.txn_table.len(), "restart undo complete, losers rolled back");
    Ok(())
}

/// Run the full analyze/redo/undo sequence against `master`.
pub fn recover(log: &LogManager, master: Lsn, ctx: &dyn RecoveryContext) -> Result<(), CoolDbError> {
    let analyzed = analyze(log, master)?;
    redo(log, &analyzed, ctx)?;
    undo(log, &analyzed, ctx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooldb_common::LogData;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct RecordingContext {
        redos: Mutex<Vec<(FilePage, Lsn)>>,
        undos: Mutex<Vec<(FilePage, TransId)>>,
    }

    impl RecoveryContext for RecordingContext {
        fn redo(&self, _page_type: u8, page: FilePage, lsn: Lsn, _offset: u16, _data: &[LogData]) -> Result<(), CoolDbError> {
            self.redos.lock().unwrap().push((page, lsn));
            Ok(())
        }

        fn undo(&self, _page_type: u8, page: FilePage, trans_id: TransId, _data: &[LogData]) -> Result<Vec<LogData>, CoolDbError> {
            self.undos.lock().unwrap().push((page, trans_id));
            Ok(vec![])
        }
    }

    #[test]
    fn redo_replays_uncommitted_and_committed_updates() {
        let dir = tempdir().unwrap();
        let log = LogManager::create(&dir.path().join("a.redo"), &dir.path().join("a.undo"), 8, 512).unwrap();

        let page = FilePage::new(0, 3);
        let rec = crate::record::LogRecord {
            rec_type: RecordType::Update,
            trans_id: 1,
            page,
            page_type: 1,
            undo_nxt_lsn: 0,
            data: vec![],
        };
        log.append_redo(&rec).unwrap();

        let ctx = RecordingContext { redos: Mutex::new(vec![]), undos: Mutex::new(vec![]) };
        let analyzed = analyze(&log, 1).unwrap();
        assert_eq!(analyzed.txn_table.len(), 1);
        redo(&log, &analyzed, &ctx).unwrap();
        assert_eq!(ctx.redos.lock().unwrap().len(), 1);
    }

    #[test]
    fn analyze_drops_committed_transactions() {
        let dir = tempdir().unwrap();
        let log = LogManager::create(&dir.path().join("b.redo"), &dir.path().join("b.undo"), 8, 512).unwrap();
        let page = FilePage::new(0, 3);
        log.append_redo(&crate::record::LogRecord {
            rec_type: RecordType::Update,
            trans_id: 1,
            page,
            page_type: 1,
            undo_nxt_lsn: 0,
            data: vec![],
        })
        .unwrap();
        log.append_redo(&crate::record::LogRecord {
            rec_type: RecordType::Commit,
            trans_id: 1,
            page,
            page_type: 1,
            undo_nxt_lsn: 0,
            data: vec![],
        })
        .unwrap();

        let analyzed = analyze(&log, 1).unwrap();
        assert!(analyzed.txn_table.is_empty());
    }
}
