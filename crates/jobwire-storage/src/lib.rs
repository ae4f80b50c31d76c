//! SQLite storage (sqlx): the dedup ledger and the channel/recipient
//! catalog.
//!
//! One writer connection by design; the worker is single-process and
//! strictly sequential, so pooling buys nothing and SQLite prefers it.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use tracing::info;

use jobwire_core::{
    domain::{ChannelId, ChannelSource, DedupEntry, Recipient, RecipientId},
    ports::{Catalog, InsertOutcome, LedgerStore},
    Error, Result,
};

pub async fn connect(url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .map_err(|e| Error::Config(format!("bad database url: {e}")))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .map_err(|e| Error::Config(format!("database connect failed: {e}")))?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dedup_entries (
            content_hash TEXT PRIMARY KEY,
            excerpt      TEXT NOT NULL,
            channel_id   INTEGER NOT NULL,
            topic_key    TEXT NOT NULL,
            seen_count   INTEGER NOT NULL DEFAULT 1,
            first_seen   TEXT NOT NULL,
            last_seen    TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(ledger_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id              INTEGER PRIMARY KEY,
            handle          TEXT NOT NULL UNIQUE,
            topic_key       TEXT NOT NULL,
            topic_label     TEXT NOT NULL,
            keywords        TEXT NOT NULL DEFAULT '[]',
            stop_words      TEXT NOT NULL DEFAULT '[]',
            last_scanned_at TEXT,
            is_active       INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(catalog_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            recipient_id INTEGER NOT NULL,
            topic_key    TEXT NOT NULL,
            is_active    INTEGER NOT NULL DEFAULT 1,
            expires_at   TEXT,
            PRIMARY KEY (recipient_id, topic_key)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(catalog_err)?;

    info!("database schema ready");
    Ok(())
}

fn ledger_err(e: sqlx::Error) -> Error {
    Error::Ledger(e.to_string())
}

fn catalog_err(e: sqlx::Error) -> Error {
    Error::Catalog(e.to_string())
}

pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn find(&self, content_hash: &str) -> Result<Option<DedupEntry>> {
        let row = sqlx::query(
            "SELECT content_hash, excerpt, channel_id, topic_key, seen_count, first_seen, last_seen \
             FROM dedup_entries WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_err)?;

        row.map(|r| -> Result<DedupEntry> {
            Ok(DedupEntry {
                content_hash: r.try_get("content_hash").map_err(ledger_err)?,
                excerpt: r.try_get("excerpt").map_err(ledger_err)?,
                channel_id: ChannelId(r.try_get("channel_id").map_err(ledger_err)?),
                topic_key: r.try_get("topic_key").map_err(ledger_err)?,
                seen_count: r.try_get("seen_count").map_err(ledger_err)?,
                first_seen: r.try_get("first_seen").map_err(ledger_err)?,
                last_seen: r.try_get("last_seen").map_err(ledger_err)?,
            })
        })
        .transpose()
    }

    async fn insert(&self, entry: DedupEntry) -> Result<InsertOutcome> {
        let res = sqlx::query(
            "INSERT INTO dedup_entries \
             (content_hash, excerpt, channel_id, topic_key, seen_count, first_seen, last_seen) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.content_hash)
        .bind(&entry.excerpt)
        .bind(entry.channel_id.0)
        .bind(&entry.topic_key)
        .bind(entry.seen_count)
        .bind(entry.first_seen)
        .bind(entry.last_seen)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(ledger_err(e)),
        }
    }

    async fn touch(&self, content_hash: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE dedup_entries SET seen_count = seen_count + 1, last_seen = ? \
             WHERE content_hash = ?",
        )
        .bind(at)
        .bind(content_hash)
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query("DELETE FROM dedup_entries WHERE last_seen < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        Ok(res.rows_affected())
    }
}

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_words(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| Error::Catalog(format!("bad word list: {e}")))
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn list_channels(&self) -> Result<Vec<ChannelSource>> {
        let rows = sqlx::query(
            "SELECT id, handle, topic_key, topic_label, keywords, stop_words, \
             last_scanned_at, is_active FROM channels ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        rows.into_iter()
            .map(|r| -> Result<ChannelSource> {
                let keywords: String = r.try_get("keywords").map_err(catalog_err)?;
                let stop_words: String = r.try_get("stop_words").map_err(catalog_err)?;
                Ok(ChannelSource {
                    id: ChannelId(r.try_get("id").map_err(catalog_err)?),
                    handle: r.try_get("handle").map_err(catalog_err)?,
                    topic_key: r.try_get("topic_key").map_err(catalog_err)?,
                    topic_label: r.try_get("topic_label").map_err(catalog_err)?,
                    keywords: parse_words(&keywords)?,
                    stop_words: parse_words(&stop_words)?,
                    last_scanned_at: r.try_get("last_scanned_at").map_err(catalog_err)?,
                    active: r.try_get::<i64, _>("is_active").map_err(catalog_err)? != 0,
                })
            })
            .collect()
    }

    async fn list_active_recipients(&self) -> Result<Vec<Recipient>> {
        let rows = sqlx::query(
            "SELECT recipient_id, topic_key, expires_at FROM subscriptions \
             WHERE is_active = 1 AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        rows.into_iter()
            .map(|r| -> Result<Recipient> {
                Ok(Recipient {
                    id: RecipientId(r.try_get("recipient_id").map_err(catalog_err)?),
                    topic_key: r.try_get("topic_key").map_err(catalog_err)?,
                    active: true,
                    expires_at: r.try_get("expires_at").map_err(catalog_err)?,
                })
            })
            .collect()
    }

    async fn mark_channel_scanned(&self, channel: ChannelId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE channels SET last_scanned_at = ? WHERE id = ?")
            .bind(at)
            .bind(channel.0)
            .execute(&self.pool)
            .await
            .map_err(catalog_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn pool() -> SqlitePool {
        connect("sqlite::memory:").await.unwrap()
    }

    fn entry(hash: &str, at: DateTime<Utc>) -> DedupEntry {
        DedupEntry {
            content_hash: hash.to_string(),
            excerpt: "нужен веб-разработчик".to_string(),
            channel_id: ChannelId(1),
            topic_key: "web".to_string(),
            seen_count: 1,
            first_seen: at,
            last_seen: at,
        }
    }

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let store = SqliteLedgerStore::new(pool().await);
        let now = Utc::now();

        assert_eq!(
            store.insert(entry("abc123", now)).await.unwrap(),
            InsertOutcome::Inserted
        );
        let found = store.find("abc123").await.unwrap().unwrap();
        assert_eq!(found.excerpt, "нужен веб-разработчик");
        assert_eq!(found.seen_count, 1);
        assert!(store.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn double_insert_reports_already_exists() {
        let store = SqliteLedgerStore::new(pool().await);
        let now = Utc::now();

        store.insert(entry("abc123", now)).await.unwrap();
        assert_eq!(
            store.insert(entry("abc123", now)).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn touch_bumps_count_and_last_seen() {
        let store = SqliteLedgerStore::new(pool().await);
        let first = Utc::now() - Duration::hours(1);
        let later = Utc::now();

        store.insert(entry("abc123", first)).await.unwrap();
        store.touch("abc123", later).await.unwrap();

        let found = store.find("abc123").await.unwrap().unwrap();
        assert_eq!(found.seen_count, 2);
        assert!(found.last_seen > found.first_seen);
    }

    #[tokio::test]
    async fn purge_removes_only_stale_entries() {
        let store = SqliteLedgerStore::new(pool().await);
        let old = Utc::now() - Duration::days(8);
        let fresh = Utc::now();

        store.insert(entry("old", old)).await.unwrap();
        store.insert(entry("fresh", fresh)).await.unwrap();

        let removed = store
            .purge_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.find("old").await.unwrap().is_none());
        assert!(store.find("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn catalog_lists_channels_with_parsed_word_lists() {
        let p = pool().await;
        sqlx::query(
            "INSERT INTO channels (id, handle, topic_key, topic_label, keywords, stop_words) \
             VALUES (1, 'freelance_feed', 'web', 'Веб-разработка', \
             '[\"веб\",\"сайт\"]', '[\"тест\"]')",
        )
        .execute(&p)
        .await
        .unwrap();

        let catalog = SqliteCatalog::new(p);
        let channels = catalog.list_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].handle, "freelance_feed");
        assert_eq!(channels[0].keywords, vec!["веб", "сайт"]);
        assert_eq!(channels[0].stop_words, vec!["тест"]);
        assert!(channels[0].active);
        assert!(channels[0].last_scanned_at.is_none());
    }

    #[tokio::test]
    async fn expired_and_inactive_subscriptions_are_filtered() {
        let p = pool().await;
        let future = Utc::now() + Duration::days(30);
        let past = Utc::now() - Duration::days(1);
        for (id, active, expires) in [
            (100i64, 1i64, None::<DateTime<Utc>>),
            (200, 1, Some(future)),
            (300, 1, Some(past)),
            (400, 0, None),
        ] {
            sqlx::query(
                "INSERT INTO subscriptions (recipient_id, topic_key, is_active, expires_at) \
                 VALUES (?, 'web', ?, ?)",
            )
            .bind(id)
            .bind(active)
            .bind(expires)
            .execute(&p)
            .await
            .unwrap();
        }

        let catalog = SqliteCatalog::new(p);
        let mut ids: Vec<i64> = catalog
            .list_active_recipients()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.0)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![100, 200]);
    }

    #[tokio::test]
    async fn mark_channel_scanned_sets_timestamp() {
        let p = pool().await;
        sqlx::query(
            "INSERT INTO channels (id, handle, topic_key, topic_label) \
             VALUES (1, 'freelance_feed', 'web', 'Веб-разработка')",
        )
        .execute(&p)
        .await
        .unwrap();

        let catalog = SqliteCatalog::new(p);
        let at = Utc::now();
        catalog.mark_channel_scanned(ChannelId(1), at).await.unwrap();

        let channels = catalog.list_channels().await.unwrap();
        assert!(channels[0].last_scanned_at.is_some());
    }
}
