//! Per-channel scanning: fetch, window filter, keyword filter, extract.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::{
    domain::{CandidateRecord, ChannelSource, RawMessage},
    ports::SourceConnection,
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Upper bound on fetched messages; the look-back window is applied
    /// client-side afterwards (the source API only supports a count
    /// limit).
    pub message_limit: usize,
    pub lookback: Duration,
    pub resolve_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Yield between messages so one channel cannot monopolize the
    /// connection.
    pub message_pause: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            message_limit: 100,
            lookback: Duration::from_secs(30 * 60),
            resolve_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(20),
            message_pause: Duration::from_millis(100),
        }
    }
}

pub struct Scanner {
    cfg: ScanConfig,
}

impl Scanner {
    pub fn new(cfg: ScanConfig) -> Self {
        Self { cfg }
    }

    /// Scan one channel and extract candidate records.
    ///
    /// Resolve and fetch timeouts surface as connection-class errors;
    /// the caller reacts by invalidating session health. A message that
    /// fails any filter is skipped silently.
    pub async fn scan(
        &self,
        conn: &dyn SourceConnection,
        channel: &ChannelSource,
    ) -> Result<Vec<CandidateRecord>> {
        let channel_ref = timeout(
            self.cfg.resolve_timeout,
            conn.resolve_channel(&channel.handle),
        )
        .await
        .map_err(|_| Error::Timeout(format!("resolving @{}", channel.handle)))??;

        let messages = timeout(
            self.cfg.fetch_timeout,
            conn.recent_messages(&channel_ref, self.cfg.message_limit),
        )
        .await
        .map_err(|_| Error::Timeout(format!("fetching @{}", channel.handle)))??;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.cfg.lookback)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));

        let mut out = Vec::new();
        for (i, message) in messages.into_iter().enumerate() {
            if i > 0 && !self.cfg.message_pause.is_zero() {
                sleep(self.cfg.message_pause).await;
            }

            if message.published_at < cutoff {
                continue;
            }
            if message.text.trim().is_empty() {
                continue;
            }
            if !matches_filters(&message.text, &channel.keywords, &channel.stop_words) {
                continue;
            }

            out.push(build_candidate(channel, message));
        }

        debug!(
            channel = %channel.handle,
            candidates = out.len(),
            "channel scan complete"
        );
        Ok(out)
    }
}

/// Case-insensitive substring filter: at least one keyword present and
/// no stop-word present. An empty keyword list matches nothing.
pub fn matches_filters(text: &str, keywords: &[String], stop_words: &[String]) -> bool {
    let lower = text.to_lowercase();
    if !keywords.iter().any(|k| lower.contains(&k.to_lowercase())) {
        return false;
    }
    !stop_words.iter().any(|w| lower.contains(&w.to_lowercase()))
}

fn build_candidate(channel: &ChannelSource, message: RawMessage) -> CandidateRecord {
    CandidateRecord {
        topic_key: channel.topic_key.clone(),
        topic_label: channel.topic_label.clone(),
        url: format!("https://t.me/{}/{}", channel.handle, message.id.0),
        published_at: message.published_at,
        channel_id: channel.id,
        message,
    }
}
