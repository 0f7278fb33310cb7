// sync/status.rs - Status events broadcast by the engine.

use crate::error::SyncFailureKind;

/// Exactly one of these is broadcast at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Idle,
    /// `total` is the queue length observed at the start of the drain pass;
    /// `current` is the 1-based index of the item being processed.
    Syncing { current: u32, total: u32 },
    Error { kind: SyncFailureKind, message: String },
}
