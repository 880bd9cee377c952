use std::path::Path;

use cooldb_common::{CoolDbError, DurabilityCoordinator, Lsn, UndoPointer};
use tracing::debug;

use crate::record::LogRecord;
use crate::redo::{RedoLogIterator, RedoLogWriter};
use crate::undo::UndoLogWriter;

/// Unifies redo-log and undo-log addressing behind one handle, as `§2`'s
/// "Log Manager" row describes. Everything that needs to append or read log
/// records goes through here rather than touching `RedoLogWriter` /
/// `UndoLogWriter` directly.
pub struct LogManager {
    redo: RedoLogWriter,
    undo: UndoLogWriter,
}

impl LogManager {
    pub fn create(redo_path: &Path, undo_path: &Path, redo_pages: u64, page_size: u64) -> Result<Self, CoolDbError> {
        Ok(Self {
            redo: RedoLogWriter::create(redo_path, redo_pages, page_size)?,
            undo: UndoLogWriter::create(undo_path)?,
        })
    }

    pub fn open(
        redo_path: &Path,
        undo_path: &Path,
        tail: Lsn,
        flushed: Lsn,
        firewall: Lsn,
    ) -> Result<Self, CoolDbError> {
        Ok(Self {
            redo: RedoLogWriter::open(redo_path, tail, flushed, firewall)?,
            undo: UndoLogWriter::open(undo_path)?,
        })
    }

    pub fn append_redo(&self, record: &LogRecord) -> Result<Lsn, CoolDbError> {
        let lsn = self.redo.write(record)?;
        debug!(lsn, trans_id = record.trans_id, "appended redo record");
        Ok(lsn)
    }

    pub fn append_undo(&self, record: &LogRecord, clr_lsn: Lsn) -> Result<UndoPointer, CoolDbError> {
        self.undo.write(record, clr_lsn)
    }

    pub fn read_redo(&self, lsn: Lsn) -> Result<LogRecord, CoolDbError> {
        self.redo.read(lsn)
    }

    pub fn read_undo(&self, ptr: &UndoPointer) -> Result<LogRecord, CoolDbError> {
        self.undo.read(ptr)
    }

    pub fn iter_redo_from(&self, from: Lsn) -> RedoLogIterator<'_> {
        self.redo.iter_from(from)
    }

    pub fn tail(&self) -> Lsn {
        self.redo.tail()
    }

    pub fn set_do_not_overwrite(&self, lsn: Lsn) {
        self.redo.set_do_not_overwrite(lsn)
    }

    pub fn move_firewall_to(&self, lsn: Lsn) {
        self.redo.move_firewall_to(lsn)
    }

    pub fn do_not_overwrite(&self) -> Lsn {
        self.redo.do_not_overwrite()
    }

    pub fn purge_undo_before(&self, retain_from: &UndoPointer) -> Result<(), CoolDbError> {
        self.undo.purge(retain_from)
    }

    /// Reconstruct a redo log's `end_of_log` from the file itself, for
    /// reopening after an unclean shutdown where it was never persisted.
    pub fn discover_tail(redo_path: &Path, from: Lsn) -> Result<Lsn, CoolDbError> {
        crate::redo::discover_tail(redo_path, from)
    }
}

impl DurabilityCoordinator for LogManager {
    fn flush_to(&self, lsn: Lsn) -> Result<(), CoolDbError> {
        self.redo.flush_to(lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooldb_common::{FilePage, RecordType};
    use tempfile::tempdir;

    fn rec() -> LogRecord {
        LogRecord {
            rec_type: RecordType::Update,
            trans_id: 1,
            page: FilePage::new(0, 3),
            page_type: 0,
            undo_nxt_lsn: 0,
            data: vec![],
        }
    }

    #[test]
    fn append_and_flush() {
        let dir = tempdir().unwrap();
        let lm = LogManager::create(&dir.path().join("a.redo"), &dir.path().join("a.undo"), 4, 512).unwrap();
        let lsn = lm.append_redo(&rec()).unwrap();
        lm.flush_to(lsn).unwrap();
        assert_eq!(lm.read_redo(lsn).unwrap().trans_id, 1);
    }
}
