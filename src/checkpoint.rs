use std::sync::{Arc, Mutex};

use cooldb_buffer::BufferPool;
use cooldb_common::{CoolDbError, DurabilityCoordinator, FilePage, LogData, Lsn, RecordType};
use cooldb_txn::TransactionPool;
use cooldb_wal::record::LogRecord;
use cooldb_wal::{LogManager, SystemKey, SystemKeyFile};
use tracing::info;

const LOG_DATA_DIRTY_PAGES: u8 = 1;
const LOG_DATA_ACTIVE_TXNS: u8 = 2;

fn encode_dirty_pages(dirty: &std::collections::HashMap<FilePage, Lsn>) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + dirty.len() * 14);
    out.extend_from_slice(&(dirty.len() as u32).to_be_bytes());
    for (page, lsn) in dirty {
        out.extend_from_slice(&page.file_id.to_be_bytes());
        out.extend_from_slice(&page.page_num.to_be_bytes());
        out.extend_from_slice(&lsn.to_be_bytes());
    }
    out
}

fn encode_active_txns(ids: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ids.len() * 8);
    out.extend_from_slice(&(ids.len() as u32).to_be_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out
}

/// Periodic fuzzy checkpoint: writes `BEGIN_CHECKPOINT`/`END_CHECKPOINT`
/// bracketing a snapshot of the dirty-page and active-transaction tables,
/// persists the system key, and advances the redo firewall.
pub struct CheckpointWriter {
    log: Arc<LogManager>,
    buffer: Arc<BufferPool>,
    txns: Arc<TransactionPool>,
    system_key: Mutex<SystemKeyFile>,
}

impl CheckpointWriter {
    pub fn new(log: Arc<LogManager>, buffer: Arc<BufferPool>, txns: Arc<TransactionPool>, system_key: SystemKeyFile) -> Self {
        Self { log, buffer, txns, system_key: Mutex::new(system_key) }
    }

    /// Run one fuzzy checkpoint, returning the `BEGIN_CHECKPOINT` LSN that
    /// becomes the new `systemKey.master`.
    pub fn checkpoint(&self) -> Result<Lsn, CoolDbError> {
        let begin = LogRecord {
            rec_type: RecordType::BeginCheckpoint,
            trans_id: 0,
            page: FilePage::new(0, 0),
            page_type: 0,
            undo_nxt_lsn: 0,
            data: vec![],
        };
        let master = self.log.append_redo(&begin)?;

        let dirty = self.buffer.check_point();
        let active = self.txns.active_ids();

        let end = LogRecord {
            rec_type: RecordType::EndCheckpoint,
            trans_id: 0,
            page: FilePage::new(0, 0),
            page_type: 0,
            undo_nxt_lsn: 0,
            data: vec![
                LogData { id: LOG_DATA_DIRTY_PAGES, bytes: encode_dirty_pages(&dirty) },
                LogData { id: LOG_DATA_ACTIVE_TXNS, bytes: encode_active_txns(&active) },
            ],
        };
        let end_lsn = self.log.append_redo(&end)?;
        self.log.flush_to(end_lsn)?;

        let key = SystemKey { next_trans_id: self.txns.next_trans_id(), master_lsn: master };
        self.system_key.lock().unwrap().write(key)?;

        let oldest_active_commit_lsn = self.txns.calc_min_commit_lsn();
        let firewall = oldest_active_commit_lsn.map(|l| l.min(master)).unwrap_or(master);
        self.log.move_firewall_to(firewall);

        if let Some(retain_from) = self.txns.calc_min_undo_pointer() {
            self.log.purge_undo_before(&retain_from)?;
        }

        info!(master, dirty_pages = dirty.len(), active_txns = active.len(), "checkpoint complete");
        Ok(master)
    }
}
