//! Write-ahead log and recovery: the redo log, undo log, log manager,
//! system key, and the ARIES-style analyze/redo/undo traversal.

pub mod log_manager;
pub mod record;
pub mod recovery;
pub mod redo;
pub mod system_key;
pub mod undo;

pub use log_manager::LogManager;
pub use record::LogRecord;
pub use recovery::{recover, AnalyzeResult, DirtyPageTable, TransactionTable, TxnTableEntry};
pub use redo::RedoLogWriter;
pub use system_key::{SystemKey, SystemKeyFile};
pub use undo::UndoLogWriter;
