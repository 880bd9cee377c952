use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Monotonically increasing log sequence number. `0` is the null sentinel —
/// no real record is ever assigned it.
pub type Lsn = u64;

/// Transaction identifier, monotonically allocated by the transaction pool.
pub type TransId = u64;

/// File identifier within the file manager's namespace.
pub type FileId = u16;

/// Page identifier within one file.
pub type PageNum = u32;

/// Default page size: 8 KiB, matching typical database page sizes.
pub const PAGE_SIZE: usize = 8192;

/// First 16 bytes of every page: `pageLSN` (8) + `undoNxtLSN` (8).
pub const PAGE_HEADER_SIZE: usize = 16;

/// A fixed-size page image, header included.
pub type PageBuf = [u8; PAGE_SIZE];

/// Return a zeroed page.
pub fn empty_page() -> PageBuf {
    [0u8; PAGE_SIZE]
}

/// Read the `pageLSN` header field (big-endian).
pub fn page_lsn(page: &PageBuf) -> Lsn {
    u64::from_be_bytes(page[0..8].try_into().unwrap())
}

/// Write the `pageLSN` header field.
pub fn set_page_lsn(page: &mut PageBuf, lsn: Lsn) {
    page[0..8].copy_from_slice(&lsn.to_be_bytes());
}

/// Read the `undoNxtLSN` header field.
pub fn page_undo_nxt_lsn(page: &PageBuf) -> Lsn {
    u64::from_be_bytes(page[8..16].try_into().unwrap())
}

/// Write the `undoNxtLSN` header field.
pub fn set_page_undo_nxt_lsn(page: &mut PageBuf, lsn: Lsn) {
    page[8..16].copy_from_slice(&lsn.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Identifies one page: `(fileId, pageId)`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilePage {
    pub file_id: FileId,
    pub page_num: PageNum,
}

impl FilePage {
    pub fn new(file_id: FileId, page_num: PageNum) -> Self {
        Self { file_id, page_num }
    }
}

impl fmt::Display for FilePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.file_id, self.page_num)
    }
}

/// The dedicated file id the undo log's logical pages are addressed under —
/// never a real data file, just a namespace for `UndoPointer.page`.
pub const UNDO_LOG_FILE_ID: FileId = u16::MAX;

/// Points at one undo record: which logical undo-log page it lives on, its
/// byte offset within that page, and the LSN of the redo record (a CLR, on
/// replay) that re-establishes the undo after a crash.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoPointer {
    pub page: FilePage,
    pub offset: u16,
    pub lsn: Lsn,
}

impl UndoPointer {
    pub const NULL: UndoPointer = UndoPointer {
        page: FilePage { file_id: UNDO_LOG_FILE_ID, page_num: 0 },
        offset: 0,
        lsn: 0,
    };

    pub fn is_null(&self) -> bool {
        self.lsn == 0
    }
}

impl Default for UndoPointer {
    fn default() -> Self {
        Self::NULL
    }
}

// ---------------------------------------------------------------------------
// Buffer pool hints
// ---------------------------------------------------------------------------

/// Buffer-pool affinity hint supplied on unpin: how much the caller wants
/// this page retained in cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Affinity {
    Hated,
    Liked,
    Loved,
}

/// Latch mode requested from the buffer pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
}

/// Lock mode requested from the lock manager. Shares the same shape as
/// `LatchMode` but is kept distinct: latches protect in-memory buffer slots,
/// locks protect logical resources for the lifetime of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

// ---------------------------------------------------------------------------
// Log record shapes
// ---------------------------------------------------------------------------

/// One tagged chunk of a redo/undo record's payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogData {
    pub id: u8,
    pub bytes: Vec<u8>,
}

/// Discriminates redo-log record kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    Update = 1,
    Clr = 2,
    Commit = 3,
    BeginCheckpoint = 4,
    EndCheckpoint = 5,
}

impl RecordType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Update),
            2 => Some(Self::Clr),
            3 => Some(Self::Commit),
            4 => Some(Self::BeginCheckpoint),
            5 => Some(Self::EndCheckpoint),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cross-crate trait seams
// ---------------------------------------------------------------------------

/// Implemented by the log manager; lets the buffer pool enforce the WAL
/// invariant (§3: `log.flushedLSN >= page.pageLSN` before a dirty page is
/// written to disk) without the buffer crate depending on the wal crate.
pub trait DurabilityCoordinator: Send + Sync {
    /// Block until the log's durable position is at least `lsn`.
    fn flush_to(&self, lsn: Lsn) -> Result<(), CoolDbError>;
}

/// Implemented by the top-level `Database`; lets the generic ARIES
/// traversal in `cooldb-wal::recovery` dispatch page-type-specific redo/undo
/// semantics without the wal crate depending on buffer/txn/space.
pub trait RecoveryContext: Send + Sync {
    /// Reapply one redo record (including CLRs) during the redo pass.
    fn redo(
        &self,
        page_type: u8,
        page: FilePage,
        lsn: Lsn,
        offset: u16,
        data: &[LogData],
    ) -> Result<(), CoolDbError>;

    /// Undo one update during the undo pass, returning the CLR payload to
    /// log in its place.
    fn undo(
        &self,
        page_type: u8,
        page: FilePage,
        trans_id: TransId,
        data: &[LogData],
    ) -> Result<Vec<LogData>, CoolDbError>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CoolDbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer not found for page {0}")]
    BufferNotFound(FilePage),

    #[error("log is exhausted: write would cross the firewall at LSN {firewall}")]
    LogExhausted { firewall: Lsn },

    #[error("LSN {0} is below the log firewall and can no longer be read")]
    LogNotFound(Lsn),

    #[error("transaction {0} was cancelled (deadlock victim or explicit abort)")]
    TransactionCancelled(TransId),

    #[error("transaction {0} was interrupted")]
    TransactionInterrupted(TransId),

    #[error("unique constraint violated")]
    UniqueConstraint,

    #[error("recovery failed: {0}")]
    Recovery(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("log corruption: {0}")]
    Corruption(String),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Byte-ordering codec
// ---------------------------------------------------------------------------
//
// Big-endian encoding such that byte-for-byte comparison preserves natural
// ordering. Unsigned integers need nothing special. Signed integers store
// the sign bit flipped so the all-zero encoding sorts below all others.
// The original source's single-call `intToBytes`/`longToBytes` helpers
// allocated a fixed 2-byte array regardless of the requested width; each
// function here allocates exactly the right width instead.

pub fn encode_u32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

pub fn decode_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes(b[0..4].try_into().unwrap())
}

pub fn encode_u64(v: u64) -> [u8; 8] {
    v.to_be_bytes()
}

pub fn decode_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes(b[0..8].try_into().unwrap())
}

pub fn encode_i32(v: i32) -> [u8; 4] {
    ((v as u32) ^ 0x8000_0000).to_be_bytes()
}

pub fn decode_i32(b: &[u8]) -> i32 {
    (decode_u32(b) ^ 0x8000_0000) as i32
}

pub fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

pub fn decode_i64(b: &[u8]) -> i64 {
    (decode_u64(b) ^ 0x8000_0000_0000_0000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_header_roundtrip() {
        let mut page = empty_page();
        set_page_lsn(&mut page, 42);
        set_page_undo_nxt_lsn(&mut page, 7);
        assert_eq!(page_lsn(&page), 42);
        assert_eq!(page_undo_nxt_lsn(&page), 7);
    }

    #[test]
    fn unsigned_order_preserved() {
        let pairs = [(0u32, 1u32), (1, 1000), (u32::MAX - 1, u32::MAX)];
        for (a, b) in pairs {
            assert!(encode_u32(a) < encode_u32(b));
            assert_eq!(decode_u32(&encode_u32(a)), a);
        }
    }

    #[test]
    fn signed_order_preserved() {
        let pairs: [(i32, i32); 4] = [(-5, -1), (-1, 0), (0, 1), (i32::MIN, i32::MAX)];
        for (a, b) in pairs {
            assert!(encode_i32(a) < encode_i32(b), "{} should sort before {}", a, b);
            assert_eq!(decode_i32(&encode_i32(a)), a);
        }
    }

    #[test]
    fn signed_i64_order_preserved() {
        assert!(encode_i64(i64::MIN) < encode_i64(0));
        assert!(encode_i64(0) < encode_i64(i64::MAX));
        assert_eq!(decode_i64(&encode_i64(-123456789)), -123456789);
    }

    #[test]
    fn undo_pointer_null_is_default() {
        assert!(UndoPointer::default().is_null());
        assert!(!UndoPointer { page: FilePage::new(0, 0), offset: 0, lsn: 1 }.is_null());
    }
}
