use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{ChannelId, ChannelRef, ChannelSource, DedupEntry, RawMessage, Recipient, RecipientId},
    DeliveryError, Result,
};

/// Factory for source-platform connections.
///
/// Owns the long-lived credentials; each `connect` call produces a
/// fresh authenticated connection. Teardown of the previous handle is
/// the session manager's job.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn SourceConnection>>;
}

/// One live connection to the source platform.
#[async_trait]
pub trait SourceConnection: Send + Sync {
    async fn check_authorized(&self) -> Result<bool>;

    /// Lightweight "who am I" round trip used as a health probe.
    async fn whoami(&self) -> Result<String>;

    async fn resolve_channel(&self, handle: &str) -> Result<ChannelRef>;

    /// Most-recent messages first, up to `limit`.
    async fn recent_messages(&self, channel: &ChannelRef, limit: usize) -> Result<Vec<RawMessage>>;

    async fn disconnect(&self);
}

/// Outbound notification transport. One method by design so tests can
/// inject an in-memory recorder.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_html(
        &self,
        recipient: RecipientId,
        html: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

/// External collaborator supplying the scan catalog. The core never
/// persists these entities itself.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<ChannelSource>>;

    /// Recipients already joined to subscription/topic data, with the
    /// expiry check applied at load time.
    async fn list_active_recipients(&self) -> Result<Vec<Recipient>>;

    async fn mark_channel_scanned(&self, channel: ChannelId, at: DateTime<Utc>) -> Result<()>;
}

/// Outcome of a ledger insert. A unique-constraint collision from a
/// concurrent insert surfaces as `AlreadyExists`, never as an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Storage behind the dedup ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find(&self, content_hash: &str) -> Result<Option<DedupEntry>>;

    async fn insert(&self, entry: DedupEntry) -> Result<InsertOutcome>;

    /// Bump seen-count and last-seen for an existing entry.
    async fn touch(&self, content_hash: &str, at: DateTime<Utc>) -> Result<()>;

    /// Remove entries whose last-seen is older than `cutoff`. Returns
    /// the number of rows removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
