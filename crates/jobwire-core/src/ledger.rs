//! Content-hash deduplication ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    domain::{ChannelId, DedupEntry},
    ports::{InsertOutcome, LedgerStore},
    Error, Result,
};

/// Punctuation kept during normalization; everything else outside word
/// characters and whitespace is stripped, so content differing only in
/// stripped punctuation or spacing collides.
pub const DEFAULT_PRESERVE_CHARS: &str = ".,!?():-@";

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub preserve_chars: String,
    pub retention_days: i64,
    pub excerpt_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            preserve_chars: DEFAULT_PRESERVE_CHARS.to_string(),
            retention_days: 7,
            excerpt_len: 200,
        }
    }
}

/// Duplicate suppression over a [`LedgerStore`].
///
/// Best-effort by contract: any store failure is treated as
/// not-duplicate (fail-open) so the pipeline never stalls on the
/// ledger.
pub struct DedupLedger {
    store: Arc<dyn LedgerStore>,
    strip: Regex,
    collapse: Regex,
    retention: Duration,
    excerpt_len: usize,
}

impl DedupLedger {
    pub fn new(store: Arc<dyn LedgerStore>, cfg: &LedgerConfig) -> Result<Self> {
        let strip = Regex::new(&format!(r"[^\w\s{}]", regex::escape(&cfg.preserve_chars)))
            .map_err(|e| Error::Config(format!("bad preserve set: {e}")))?;
        let collapse = Regex::new(r"\s+").map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            store,
            strip,
            collapse,
            retention: Duration::days(cfg.retention_days),
            excerpt_len: cfg.excerpt_len,
        })
    }

    /// Lowercase, strip characters outside word/whitespace/preserve set,
    /// collapse whitespace runs, trim.
    pub fn normalize(&self, text: &str) -> String {
        let lower = text.to_lowercase();
        let stripped = self.strip.replace_all(&lower, "");
        let collapsed = self.collapse.replace_all(&stripped, " ");
        collapsed.trim().to_string()
    }

    /// Hex SHA-256 of the normalized text. A function of the text only,
    /// never of message id or timestamp.
    pub fn content_hash(&self, text: &str) -> String {
        let normalized = self.normalize(text);
        let digest = Sha256::digest(normalized.as_bytes());
        hex::encode(digest)
    }

    /// Record the text and report whether it was already seen.
    ///
    /// First sight inserts an entry with seen-count 1; repeats bump the
    /// counter and last-seen. A concurrent-insert collision takes the
    /// update path. Store errors fail open as not-duplicate.
    pub async fn check_and_mark(
        &self,
        text: &str,
        channel: ChannelId,
        topic_key: &str,
    ) -> bool {
        let hash = self.content_hash(text);
        let now = Utc::now();

        match self.store.find(&hash).await {
            Ok(Some(_)) => {
                if let Err(e) = self.store.touch(&hash, now).await {
                    warn!("ledger touch failed: {e}");
                }
                true
            }
            Ok(None) => {
                let entry = DedupEntry {
                    content_hash: hash.clone(),
                    excerpt: excerpt(text, self.excerpt_len),
                    channel_id: channel,
                    topic_key: topic_key.to_string(),
                    seen_count: 1,
                    first_seen: now,
                    last_seen: now,
                };
                match self.store.insert(entry).await {
                    Ok(InsertOutcome::Inserted) => false,
                    Ok(InsertOutcome::AlreadyExists) => {
                        // Lost the insert race; someone else saw it first.
                        if let Err(e) = self.store.touch(&hash, now).await {
                            warn!("ledger touch failed: {e}");
                        }
                        true
                    }
                    Err(e) => {
                        warn!("ledger insert failed, treating as new: {e}");
                        false
                    }
                }
            }
            Err(e) => {
                warn!("ledger lookup failed, treating as new: {e}");
                false
            }
        }
    }

    /// Purge entries whose last-seen fell out of the retention window.
    /// Maintenance operation, not part of the per-cycle path.
    pub async fn sweep(&self) -> u64 {
        let cutoff = Utc::now() - self.retention;
        match self.store.purge_older_than(cutoff).await {
            Ok(n) => {
                debug!("ledger sweep removed {n} entries");
                n
            }
            Err(e) => {
                warn!("ledger sweep failed: {e}");
                0
            }
        }
    }
}

/// First line of the text, capped to `max` characters.
fn excerpt(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    first_line.chars().take(max).collect()
}

/// In-memory ledger store: the test double, also useful as a fallback
/// when running without a database.
#[derive(Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<HashMap<String, DedupEntry>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find(&self, content_hash: &str) -> Result<Option<DedupEntry>> {
        Ok(self.entries.lock().await.get(content_hash).cloned())
    }

    async fn insert(&self, entry: DedupEntry) -> Result<InsertOutcome> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&entry.content_hash) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        entries.insert(entry.content_hash.clone(), entry);
        Ok(InsertOutcome::Inserted)
    }

    async fn touch(&self, content_hash: &str, at: DateTime<Utc>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(content_hash) {
            entry.seen_count += 1;
            entry.last_seen = at;
        }
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.last_seen >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> DedupLedger {
        DedupLedger::new(Arc::new(MemoryLedgerStore::new()), &LedgerConfig::default())
            .expect("valid config")
    }

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        let l = ledger();
        assert_eq!(l.normalize("  Нужен   ВЕБ-разработчик  "), "нужен веб-разработчик");
    }

    #[test]
    fn texts_differing_in_stripped_punctuation_collide() {
        let l = ledger();
        // `#` and `*` are outside the preserve set; `-` is inside.
        assert_eq!(
            l.content_hash("Нужен #веб-разработчик"),
            l.content_hash("нужен  веб-разработчик*")
        );
    }

    #[test]
    fn hash_ignores_spacing_but_not_words() {
        let l = ledger();
        assert_eq!(l.content_hash("a  b"), l.content_hash("a b"));
        assert_ne!(l.content_hash("a b"), l.content_hash("a c"));
    }

    #[tokio::test]
    async fn first_sight_then_duplicate() {
        let l = ledger();
        let ch = ChannelId(1);
        assert!(!l.check_and_mark("Нужен веб-разработчик", ch, "web").await);
        assert!(l.check_and_mark("Нужен веб-разработчик", ch, "web").await);
        // Spacing/case/stripped-punctuation variation is still a duplicate.
        assert!(l.check_and_mark("нужен   ВЕБ-разработчик##", ch, "web").await);
    }

    #[tokio::test]
    async fn insert_race_is_treated_as_duplicate() {
        struct RacyStore {
            inner: MemoryLedgerStore,
        }

        #[async_trait::async_trait]
        impl LedgerStore for RacyStore {
            async fn find(&self, _hash: &str) -> Result<Option<DedupEntry>> {
                // Simulate a concurrent writer landing between lookup
                // and insert.
                Ok(None)
            }
            async fn insert(&self, entry: DedupEntry) -> Result<InsertOutcome> {
                self.inner.insert(entry).await
            }
            async fn touch(&self, hash: &str, at: DateTime<Utc>) -> Result<()> {
                self.inner.touch(hash, at).await
            }
            async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
                self.inner.purge_older_than(cutoff).await
            }
        }

        let store = Arc::new(RacyStore {
            inner: MemoryLedgerStore::new(),
        });
        let l = DedupLedger::new(store, &LedgerConfig::default()).unwrap();
        assert!(!l.check_and_mark("same text", ChannelId(1), "web").await);
        assert!(l.check_and_mark("same text", ChannelId(2), "web").await);
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl LedgerStore for BrokenStore {
            async fn find(&self, _hash: &str) -> Result<Option<DedupEntry>> {
                Err(Error::Ledger("storage offline".into()))
            }
            async fn insert(&self, _entry: DedupEntry) -> Result<InsertOutcome> {
                Err(Error::Ledger("storage offline".into()))
            }
            async fn touch(&self, _hash: &str, _at: DateTime<Utc>) -> Result<()> {
                Err(Error::Ledger("storage offline".into()))
            }
            async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
                Err(Error::Ledger("storage offline".into()))
            }
        }

        let l = DedupLedger::new(Arc::new(BrokenStore), &LedgerConfig::default()).unwrap();
        assert!(!l.check_and_mark("anything", ChannelId(1), "web").await);
        assert!(!l.check_and_mark("anything", ChannelId(1), "web").await);
        assert_eq!(l.sweep().await, 0);
    }

    #[tokio::test]
    async fn sweep_purges_only_expired_entries() {
        let store = Arc::new(MemoryLedgerStore::new());
        let l = DedupLedger::new(store.clone(), &LedgerConfig::default()).unwrap();

        assert!(!l.check_and_mark("fresh entry", ChannelId(1), "web").await);

        let old = DedupEntry {
            content_hash: "stale".into(),
            excerpt: "stale".into(),
            channel_id: ChannelId(1),
            topic_key: "web".into(),
            seen_count: 1,
            first_seen: Utc::now() - Duration::days(10),
            last_seen: Utc::now() - Duration::days(10),
        };
        store.insert(old).await.unwrap();

        assert_eq!(l.sweep().await, 1);
        assert!(l.check_and_mark("fresh entry", ChannelId(1), "web").await);
    }

    #[test]
    fn excerpt_takes_first_line_bounded() {
        assert_eq!(excerpt("first line\nsecond", 100), "first line");
        assert_eq!(excerpt("abcdef", 3), "abc");
    }
}
