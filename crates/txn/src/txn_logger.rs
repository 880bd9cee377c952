use std::sync::Arc;

use cooldb_buffer::{BufferPool, PageBuffer};
use cooldb_common::{
    set_page_lsn, set_page_undo_nxt_lsn, Affinity, CoolDbError, DurabilityCoordinator, LatchMode,
    LogData, Lsn, RecordType, RecoveryContext, TransId, UndoPointer,
};
use cooldb_wal::record::{extract_undo_pointer, with_undo_pointer};
use cooldb_wal::{LogManager, LogRecord};
use tracing::debug;

use crate::transaction::Transaction;
use crate::txn_pool::TransactionPool;

/// The central path for every durable mutation: pairs undo/redo writes,
/// compensation records, commit records, and drives rollback.
pub struct TransactionLogger {
    log: Arc<LogManager>,
    buffer: Arc<BufferPool>,
}

impl TransactionLogger {
    pub fn new(log: Arc<LogManager>, buffer: Arc<BufferPool>) -> Self {
        Self { log, buffer }
    }

    /// Append the undo record, then the redo record carrying its
    /// `UndoPointer`; stamp the buffer's `pageLSN`; advance the
    /// transaction's undo chain.
    pub fn write_undo_redo(
        &self,
        trans: &Transaction,
        buf: &mut PageBuffer,
        page_type: u8,
        undo_data: Vec<LogData>,
        redo_data: Vec<LogData>,
    ) -> Result<Lsn, CoolDbError> {
        let prior = trans.undo_nxt();
        let undo_record = LogRecord {
            rec_type: RecordType::Update,
            trans_id: trans.trans_id,
            page: buf.page(),
            page_type,
            undo_nxt_lsn: 0,
            data: with_undo_pointer(prior, undo_data),
        };
        // `clr_lsn` is informational only — chain traversal uses page+offset,
        // never this field — so it is safe to fill in with a placeholder
        // before the paired redo LSN exists.
        let undo_ptr = self.log.append_undo(&undo_record, 0)?;

        let redo_record = LogRecord {
            rec_type: RecordType::Update,
            trans_id: trans.trans_id,
            page: buf.page(),
            page_type,
            undo_nxt_lsn: 0,
            data: with_undo_pointer(undo_ptr, redo_data),
        };
        let redo_lsn = self.log.append_redo(&redo_record)?;

        set_page_lsn(buf.write(), redo_lsn);
        trans.set_undo_nxt(UndoPointer { page: undo_ptr.page, offset: undo_ptr.offset, lsn: redo_lsn });
        debug!(trans_id = trans.trans_id, redo_lsn, "wrote undo/redo pair");
        Ok(redo_lsn)
    }

    /// Append a compensation redo record describing an undo action.
    /// `continue_from` is the undo chain position to resume at if a crash
    /// interrupts rollback partway through — the chain link one record
    /// earlier than the one just undone.
    pub fn write_clr(
        &self,
        trans: &Transaction,
        buf: &mut PageBuffer,
        page_type: u8,
        clr_data: Vec<LogData>,
        continue_from: UndoPointer,
    ) -> Result<Lsn, CoolDbError> {
        let record = LogRecord {
            rec_type: RecordType::Clr,
            trans_id: trans.trans_id,
            page: buf.page(),
            page_type,
            undo_nxt_lsn: 0,
            data: with_undo_pointer(continue_from, clr_data),
        };
        let lsn = self.log.append_redo(&record)?;
        set_page_lsn(buf.write(), lsn);
        set_page_undo_nxt_lsn(buf.write(), continue_from.lsn);
        Ok(lsn)
    }

    /// Append `COMMIT`, flush the log to that LSN, and update the commit
    /// list. A transaction is not reported committed until this returns.
    pub fn write_commit_log(&self, trans: &Transaction, pool: &TransactionPool) -> Result<(), CoolDbError> {
        let record = LogRecord {
            rec_type: RecordType::Commit,
            trans_id: trans.trans_id,
            page: cooldb_common::FilePage::new(0, 0),
            page_type: 0,
            undo_nxt_lsn: 0,
            data: vec![],
        };
        let lsn = self.log.append_redo(&record)?;
        self.log.flush_to(lsn)?;
        pool.end_transaction(trans.trans_id);
        debug!(trans_id = trans.trans_id, lsn, "committed");
        Ok(())
    }

    /// Walk `trans.undo_nxt()` backward to `savepoint` (or the null pointer
    /// for a full rollback), invoking `ctx.undo` for each record (which pins
    /// and mutates the page itself, same as the crash-recovery undo pass),
    /// then pinning the page again to write a CLR and stamp its
    /// `undoNxtLSN` header. Space-allocation effects are protected from
    /// rollback separately, by `ctx.undo`'s own `PAGE_TYPE_SEGMENT_CATALOG`
    /// dispatch rather than by this walk.
    pub fn rollback(
        &self,
        trans: &Transaction,
        savepoint: UndoPointer,
        ctx: &dyn RecoveryContext,
    ) -> Result<(), CoolDbError> {
        let mut cursor = trans.undo_nxt();
        while !cursor.is_null() && cursor != savepoint {
            let undo_record = self.log.read_undo(&cursor)?;
            let clr_data = ctx.undo(undo_record.page_type, undo_record.page, trans.trans_id, &undo_record.data)?;
            let predecessor = extract_undo_pointer(&undo_record.data).unwrap_or(UndoPointer::NULL);

            let mut buf = self.buffer.pin(undo_record.page, LatchMode::Exclusive)?;
            self.write_clr(trans, &mut buf, undo_record.page_type, clr_data, predecessor)?;
            trans.add_rollback_cost(1);
            self.buffer.unpin_dirty(buf, Affinity::Liked, cursor.lsn);

            trans.set_undo_nxt(predecessor);
            cursor = predecessor;
        }
        Ok(())
    }
}
