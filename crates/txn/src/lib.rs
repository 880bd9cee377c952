//! Transaction lifecycle: lock manager, deadlock detector, transaction
//! pool (commit list), and the transaction logger that drives undo/redo
//! and rollback.

pub mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod txn_logger;
pub mod txn_pool;

pub use deadlock::DeadlockDetector;
pub use lock_manager::{LockManager, ResourceId};
pub use transaction::Transaction;
pub use txn_logger::TransactionLogger;
pub use txn_pool::{CommitList, TransactionPool};
