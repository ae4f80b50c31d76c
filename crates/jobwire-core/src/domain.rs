use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog id of a scanned channel (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

/// Telegram chat id of a notification recipient (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientId(pub i64);

/// Source-platform message id within a channel (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// Opaque token produced by channel resolution and consumed by the
/// message fetch. Adapters decide what goes inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRef(pub String);

/// One channel from the scan catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSource {
    pub id: ChannelId,
    /// Public handle without the leading `@`.
    pub handle: String,
    pub topic_key: String,
    pub topic_label: String,
    pub keywords: Vec<String>,
    pub stop_words: Vec<String>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Kind of a rich-text span as reported by the source platform.
///
/// One renderer arm per variant; anything the renderer does not
/// recognize arrives as `Other` and degrades to escaped plain text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
    Pre,
    Hashtag,
    Url,
    TextUrl,
    Mention,
    Other,
}

/// A rich-text span over the message text.
///
/// `offset` and `length` are in characters, not bytes; adapters convert
/// from whatever unit their wire format uses before building these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextSpan {
    pub kind: SpanKind,
    pub offset: i32,
    pub length: i32,
    /// Link target for `TextUrl` spans.
    pub url: Option<String>,
}

/// One message fetched from a channel. Ephemeral, never persisted.
#[derive(Clone, Debug)]
pub struct RawMessage {
    pub id: MessageId,
    pub text: String,
    pub spans: Vec<TextSpan>,
    pub published_at: DateTime<Utc>,
}

/// An extracted, not-yet-deduplicated item derived from one message.
#[derive(Clone, Debug)]
pub struct CandidateRecord {
    pub topic_key: String,
    pub topic_label: String,
    /// Deterministic link back to the source post.
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub channel_id: ChannelId,
    pub message: RawMessage,
}

/// A recipient already joined to its subscription data.
///
/// Expiry is evaluated by the catalog at load time; within a cycle the
/// `active` flag is what the dispatcher checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub topic_key: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One row of the dedup ledger, keyed by content hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupEntry {
    /// Hex SHA-256 of the normalized text. Never derived from message
    /// id or timestamp.
    pub content_hash: String,
    /// Bounded excerpt of the original text, for diagnostics only.
    pub excerpt: String,
    pub channel_id: ChannelId,
    pub topic_key: String,
    pub seen_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
