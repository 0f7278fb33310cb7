// lib.rs - fieldledger-sync: local durable store + background sync engine
// for an offline-first field-expense capture app.
//
// This crate is a library only: the UI, OCR, auth provider, and remote
// database/blob store are all out of scope and modeled as ports (see
// `ports`) that a host application implements.

pub mod backoff;
pub mod config;
pub mod error;
pub mod job_cache;
pub mod local_store;
pub mod ports;
pub mod read_merger;
pub mod stale_scanner;
pub mod storage_accountant;
pub mod sync;
pub mod types;
pub mod writers;

pub use config::EngineConfig;
pub use error::{Error, Result, SyncFailureKind};
pub use job_cache::JobCache;
pub use local_store::LocalStore;
pub use stale_scanner::{StaleCounts, StaleScanner};
pub use storage_accountant::{StorageAccountant, StorageEstimate};
pub use sync::{QueueStats, Status, SyncEngine, SyncQueue};
pub use writers::{ExpenseFilter, NewExpense, NewReceipt, Writers};
