// ports.rs - external collaborators the engine consumes
//
// These traits are the boundary of the core. A host application supplies
// concrete implementations; tests supply fakes. Modeled as object-safe
// async traits so each can be held behind an `Arc<dyn Trait>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Identity of the currently signed-in user, if any.
#[async_trait]
pub trait AuthContext: Send + Sync {
    async fn current_user_id(&self) -> Option<Uuid>;
}

/// A connectivity transition callback, invoked with no arguments.
pub type ConnectivityCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque handle returned by `Connectivity::subscribe`, passed back to
/// `unsubscribe` to tear the registration down.
pub type SubscriptionId = u64;

/// Device connectivity, polled and/or subscribed to.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;

    /// Register `on_online`/`on_offline` callbacks, invoked on the matching
    /// transition. Returns a handle `unsubscribe` can use to remove them.
    async fn subscribe(&self, on_online: ConnectivityCallback, on_offline: ConnectivityCallback) -> SubscriptionId;

    /// Remove a registration made by `subscribe`. A no-op if it was already
    /// removed or never existed.
    async fn unsubscribe(&self, id: SubscriptionId);
}

/// Time source, injected so tests can run backoff logic without real delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// A single row returned by `RecordStore::select`.
pub type RemoteRow = Value;

/// The remote, eventually-consistent authoritative database.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a row into `table`, returning the server-assigned id.
    async fn insert(&self, table: &str, row: Value) -> Result<String>;

    /// Select rows from `table` matching `filter` (an opaque, store-specific
    /// query value — e.g. a JSON filter document).
    async fn select(&self, table: &str, filter: Value) -> Result<Vec<RemoteRow>>;
}

/// The remote blob store backing receipt images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes` under `key`, returning the storage path assigned.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// Best-effort removal; callers must not treat failure here as fatal.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Derives the blob storage key for a receipt upload.
pub fn derived_path(user_id: Uuid, filename: &str) -> String {
    format!("{user_id}/{filename}")
}
