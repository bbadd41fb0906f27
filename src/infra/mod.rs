//! Infrastructure layer for the proof ledger
//!
//! Contains trait definitions and implementations for:
//! - Record storage (canonical SQLite store, display mirror, dual-write adapter)
//! - Ledger access (contract calls behind `LedgerClient`)
//! - Proving toolchain (child processes behind `ProofToolchain`)
//! - Progress reporting and cancellation

mod error;
pub mod process;
pub mod sqlite;
mod status;
mod storage;
mod traits;

pub use error::*;
pub use sqlite::{SqliteCanonicalStore, SqliteDisplayStore};
pub use status::{CancellationFlag, StatusReporter};
pub use storage::DualWriteStorage;
pub use traits::*;
