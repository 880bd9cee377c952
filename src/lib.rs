//! `Database`: the facade that owns one instance of every subsystem, drives
//! startup recovery, runs the background checkpoint thread, and dispatches
//! `RecoveryContext` callbacks by page type.

pub mod checkpoint;
pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cooldb_buffer::{BufferPool, FileManager, PageBuffer};
use cooldb_common::{
    set_page_lsn, Affinity, CoolDbError, FileId, FilePage, LatchMode, LockMode, LogData, Lsn,
    RecoveryContext, TransId, UndoPointer, PAGE_HEADER_SIZE, PAGE_SIZE,
};
use cooldb_space::{Extent, SegmentManager, PAGE_TYPE_SEGMENT_CATALOG};
use cooldb_txn::{DeadlockDetector, LockManager, ResourceId, Transaction, TransactionLogger, TransactionPool};
use cooldb_wal::system_key::SystemKeyFile;
use cooldb_wal::{LogManager, SystemKey};
use tracing::{info, warn};

use checkpoint::CheckpointWriter;
use config::DatabaseConfig;

/// Page-type tag for the demo's generic single-byte mutation, stored at
/// `PAGE_HEADER_SIZE` in the page body. Higher-level record/row storage
/// (out of this engine's scope) would register its own page types here.
pub const PAGE_TYPE_GENERIC: u8 = 0;

const GENERIC_VALUE_DATA_ID: u8 = 1;

struct Inner {
    config: DatabaseConfig,
    #[allow(dead_code)]
    file_manager: Arc<FileManager>,
    buffer: Arc<BufferPool>,
    log: Arc<LogManager>,
    txns: Arc<TransactionPool>,
    locks: Arc<LockManager>,
    #[allow(dead_code)]
    deadlock: Arc<DeadlockDetector>,
    logger: Arc<TransactionLogger>,
    space: Arc<SegmentManager>,
    checkpoint: CheckpointWriter,
}

impl RecoveryContext for Inner {
    fn redo(&self, page_type: u8, page: FilePage, lsn: Lsn, _offset: u16, data: &[LogData]) -> Result<(), CoolDbError> {
        if page_type == PAGE_TYPE_SEGMENT_CATALOG {
            if let Some(extents) = cooldb_space::apply_catalog_payload(data) {
                self.space.recovery_replace_extents(page, extents);
            }
            return Ok(());
        }
        let mut buf = self.buffer.pin(page, LatchMode::Exclusive)?;
        apply_generic_value(&mut buf, data);
        set_page_lsn(buf.write(), lsn);
        self.buffer.unpin_dirty(buf, Affinity::Liked, lsn);
        Ok(())
    }

    fn undo(&self, page_type: u8, page: FilePage, _trans_id: TransId, data: &[LogData]) -> Result<Vec<LogData>, CoolDbError> {
        if page_type == PAGE_TYPE_SEGMENT_CATALOG {
            return Ok(data.to_vec());
        }
        let mut buf = self.buffer.pin(page, LatchMode::Exclusive)?;
        apply_generic_value(&mut buf, data);
        self.buffer.unpin(buf, Affinity::Liked);
        Ok(data.to_vec())
    }
}

fn apply_generic_value(buf: &mut PageBuffer, data: &[LogData]) {
    if let Some(d) = data.iter().find(|d| d.id == GENERIC_VALUE_DATA_ID) {
        let body = buf.write();
        let end = (PAGE_HEADER_SIZE + d.bytes.len()).min(PAGE_SIZE);
        body[PAGE_HEADER_SIZE..end].copy_from_slice(&d.bytes[..end - PAGE_HEADER_SIZE]);
    }
}

/// Owns every subsystem and is the single entry point a host process deals
/// with: begin/commit/abort transactions, pin/mutate pages, allocate
/// segments, and the background checkpoint loop.
pub struct Database {
    inner: Arc<Inner>,
    stop: Arc<AtomicBool>,
    checkpoint_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Open (creating if absent) the database rooted at `config.data_dir`,
    /// running startup recovery if the system key indicates an unclean
    /// shutdown.
    pub fn open(config: DatabaseConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let redo_path = config.redo_log_path();
        let undo_path = config.undo_log_path();
        let key_path = config.system_key_path();
        let data_path = config.data_file_path();

        let file_manager = Arc::new(FileManager::new());
        let fresh = !key_path.exists();

        let (log, txns, skf, master) = if fresh {
            file_manager.add_file(0, &data_path)?;
            file_manager.extend(0, config.initial_data_pages)?;
            let log = Arc::new(LogManager::create(&redo_path, &undo_path, config.redo_log_pages, PAGE_SIZE as u64)?);
            let skf = SystemKeyFile::create(&key_path, SystemKey { next_trans_id: 1, master_lsn: 0 })?;
            (log, Arc::new(TransactionPool::new(1)), skf, 0)
        } else {
            file_manager.add_file(0, &data_path)?;
            let (skf, key) = SystemKeyFile::open(&key_path)?;
            let master = key.master_lsn.max(1);
            let tail = LogManager::discover_tail(&redo_path, master)?;
            let log = Arc::new(LogManager::open(&redo_path, &undo_path, tail, tail, master)?);
            (log, Arc::new(TransactionPool::new(key.next_trans_id)), skf, master)
        };

        let buffer = Arc::new(BufferPool::new(file_manager.clone(), config.buffer_pool_pages));
        buffer.set_write_ahead_logging(log.clone());
        buffer.set_allow_growth(config.allow_buffer_growth);

        let deadlock = Arc::new(DeadlockDetector::new());
        let locks = Arc::new(LockManager::new(deadlock.clone()));
        let logger = Arc::new(TransactionLogger::new(log.clone(), buffer.clone()));
        let space = Arc::new(SegmentManager::new(buffer.clone(), logger.clone()));

        if fresh {
            space.create_segment(FilePage::new(0, 0), 0, config.initial_segment_size, config.segment_growth_rate);
            space.seed_free_extent(Extent::new(FilePage::new(0, 1), config.initial_data_pages - 1));
        } else {
            warn!("reopened database: segment catalog bootstrap from the log is not implemented, call create_segment again for any segment still in use");
        }

        let checkpoint = CheckpointWriter::new(log.clone(), buffer.clone(), txns.clone(), skf);

        let inner = Arc::new(Inner {
            config,
            file_manager,
            buffer,
            log: log.clone(),
            txns,
            locks,
            deadlock,
            logger,
            space,
            checkpoint,
        });

        if !fresh {
            info!(master, "unclean shutdown detected, running recovery");
            cooldb_wal::recover(&log, master, inner.as_ref())?;
            inner.checkpoint.checkpoint()?;
        }

        Ok(Self { inner, stop: Arc::new(AtomicBool::new(false)), checkpoint_handle: Mutex::new(None) })
    }

    /// Launch the background checkpoint thread. Idempotent.
    pub fn start(&self) {
        let mut handle = self.checkpoint_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let interval = inner.config.checkpoint_interval.interval;
        *handle = Some(std::thread::spawn(move || {
            let mut last = Instant::now();
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(200));
                if last.elapsed() >= interval {
                    if let Err(e) = inner.checkpoint.checkpoint() {
                        warn!(error = %e, "background checkpoint failed");
                    }
                    last = Instant::now();
                }
            }
        }));
    }

    /// Stop the background checkpoint thread and take a final checkpoint.
    pub fn stop(&self) -> Result<(), CoolDbError> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.checkpoint_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.checkpoint.checkpoint()?;
        Ok(())
    }

    pub fn begin_transaction(&self) -> Arc<Transaction> {
        self.inner.txns.begin_transaction(self.inner.log.tail())
    }

    pub fn lock(&self, resource: ResourceId, trans: &Transaction, mode: LockMode) -> Result<(), CoolDbError> {
        let txns = self.inner.txns.clone();
        let txns2 = txns.clone();
        let txns3 = txns.clone();
        self.inner.locks.lock(
            resource,
            trans.trans_id,
            mode,
            &move |t| txns.get(t).map(|x| x.is_cancelled()).unwrap_or(true),
            &move |t| txns2.get(t).map(|x| x.rollback_cost()).unwrap_or(0),
            &move |t| txns3.get(t).is_some(),
        )
    }

    pub fn unlock_all(&self, resource: ResourceId, trans: &Transaction) {
        self.inner.locks.unlock_all(resource, trans.trans_id)
    }

    pub fn pin(&self, page: FilePage, mode: LatchMode) -> Result<PageBuffer, CoolDbError> {
        self.inner.buffer.pin(page, mode)
    }

    pub fn unpin(&self, buf: PageBuffer, affinity: Affinity) {
        self.inner.buffer.unpin(buf, affinity)
    }

    pub fn unpin_dirty(&self, buf: PageBuffer, affinity: Affinity, lsn: Lsn) {
        self.inner.buffer.unpin_dirty(buf, affinity, lsn)
    }

    /// Demo-level generic mutation: overwrite the single byte at
    /// `PAGE_HEADER_SIZE`, logging the prior value as the undo payload.
    pub fn write_value(&self, trans: &Transaction, buf: &mut PageBuffer, value: u8) -> Result<Lsn, CoolDbError> {
        let prior = buf.read()[PAGE_HEADER_SIZE];
        let lsn = self.inner.logger.write_undo_redo(
            trans,
            buf,
            PAGE_TYPE_GENERIC,
            vec![LogData { id: GENERIC_VALUE_DATA_ID, bytes: vec![prior] }],
            vec![LogData { id: GENERIC_VALUE_DATA_ID, bytes: vec![value] }],
        )?;
        buf.write()[PAGE_HEADER_SIZE] = value;
        Ok(lsn)
    }

    pub fn read_value(&self, buf: &PageBuffer) -> u8 {
        buf.read()[PAGE_HEADER_SIZE]
    }

    pub fn commit(&self, trans: &Transaction) -> Result<(), CoolDbError> {
        self.inner.logger.write_commit_log(trans, &self.inner.txns)
    }

    /// Roll back every effect of `trans` and release its slot.
    pub fn abort(&self, trans: &Transaction) -> Result<(), CoolDbError> {
        trans.cancel();
        self.inner.logger.rollback(trans, UndoPointer::NULL, self.inner.as_ref())?;
        self.inner.txns.end_transaction(trans.trans_id);
        Ok(())
    }

    pub fn create_segment(&self, segment_id: FilePage, segment_type: u8, initial_size: u32, growth_rate: u32) {
        self.inner.space.create_segment(segment_id, segment_type, initial_size, growth_rate)
    }

    pub fn allocate_extent(&self, trans: &Transaction, segment_id: FilePage) -> Result<Extent, CoolDbError> {
        self.inner.space.allocate_next_extent(trans, segment_id, self.data_file_id())
    }

    pub fn drop_segment(&self, trans: &Transaction, segment_id: FilePage) -> Result<(), CoolDbError> {
        self.inner.space.drop_segment(trans, segment_id)
    }

    pub fn checkpoint_now(&self) -> Result<Lsn, CoolDbError> {
        self.inner.checkpoint.checkpoint()
    }

    pub fn data_file_id(&self) -> FileId {
        0
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
