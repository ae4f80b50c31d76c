//! The periodic ingest → dedup → fan-out cycle.
//!
//! Channels are scanned strictly sequentially and recipients notified
//! strictly sequentially: one outbound source connection, one bot, no
//! second cycle in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    dispatch::Dispatcher,
    domain::ChannelSource,
    ledger::DedupLedger,
    ports::Catalog,
    scan::Scanner,
    session::SessionManager,
};

#[derive(Clone, Debug)]
pub struct CycleConfig {
    pub period: Duration,
    /// Pause between consecutive channel scans.
    pub channel_pause: Duration,
    /// How often the ledger retention sweep runs.
    pub sweep_interval: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30 * 60),
            channel_pause: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Per-cycle counters, logged and returned for inspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub channels_scanned: usize,
    pub fresh_candidates: usize,
    pub duplicates: usize,
    pub notifications_sent: usize,
}

pub struct CycleRunner {
    session: Arc<SessionManager>,
    catalog: Arc<dyn Catalog>,
    scanner: Scanner,
    ledger: Arc<DedupLedger>,
    dispatcher: Dispatcher,
    cfg: CycleConfig,
}

impl CycleRunner {
    pub fn new(
        session: Arc<SessionManager>,
        catalog: Arc<dyn Catalog>,
        scanner: Scanner,
        ledger: Arc<DedupLedger>,
        dispatcher: Dispatcher,
        cfg: CycleConfig,
    ) -> Self {
        Self {
            session,
            catalog,
            scanner,
            ledger,
            dispatcher,
            cfg,
        }
    }

    /// Fire `run_cycle` on the configured period until cancelled.
    ///
    /// The interval is awaited on the same task as the cycle, so a slow
    /// cycle delays the next firing instead of overlapping it.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.cfg.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sweep = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested, stopping cycle loop");
                    break;
                }
                _ = tick.tick() => {
                    self.run_cycle().await;
                    if last_sweep.elapsed() >= self.cfg.sweep_interval {
                        self.ledger.sweep().await;
                        last_sweep = Instant::now();
                    }
                }
            }
        }
    }

    /// One full pass: health check, catalog load, sequential scans,
    /// dedup, fan-out. Never panics the worker; every failure degrades
    /// to fewer notifications this cycle.
    pub async fn run_cycle(&self) -> CycleStats {
        let started = Instant::now();
        let mut stats = CycleStats::default();

        if !self.session.ensure_healthy().await {
            warn!("source session unhealthy, skipping cycle");
            return stats;
        }

        let channels = match self.catalog.list_channels().await {
            Ok(v) => v,
            Err(e) => {
                error!("failed to load channels: {e}");
                return stats;
            }
        };
        let recipients = match self.catalog.list_active_recipients().await {
            Ok(v) => v,
            Err(e) => {
                error!("failed to load recipients: {e}");
                return stats;
            }
        };

        info!(
            channels = channels.len(),
            recipients = recipients.len(),
            "cycle started"
        );

        let mut first = true;
        for channel in channels.iter().filter(|c| c.active) {
            if !first && !self.cfg.channel_pause.is_zero() {
                sleep(self.cfg.channel_pause).await;
            }
            first = false;

            if !self.scan_channel(channel, &recipients, &mut stats).await {
                error!("reconnect exhausted, aborting remaining cycle");
                break;
            }
        }

        info!(
            channels_scanned = stats.channels_scanned,
            fresh = stats.fresh_candidates,
            duplicates = stats.duplicates,
            sent = stats.notifications_sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle finished"
        );
        stats
    }

    /// Returns false only when the session could not be re-established,
    /// which aborts the remaining cycle.
    async fn scan_channel(
        &self,
        channel: &ChannelSource,
        recipients: &[crate::domain::Recipient],
        stats: &mut CycleStats,
    ) -> bool {
        let Some(conn) = self.session.connection().await else {
            return self.session.ensure_healthy().await;
        };

        match self.scanner.scan(conn.as_ref(), channel).await {
            Ok(candidates) => {
                for record in candidates {
                    let duplicate = self
                        .ledger
                        .check_and_mark(&record.message.text, record.channel_id, &record.topic_key)
                        .await;
                    if duplicate {
                        stats.duplicates += 1;
                        continue;
                    }
                    stats.fresh_candidates += 1;
                    stats.notifications_sent +=
                        self.dispatcher.fan_out(&record, recipients).await;
                }
                stats.channels_scanned += 1;

                if let Err(e) = self
                    .catalog
                    .mark_channel_scanned(channel.id, Utc::now())
                    .await
                {
                    warn!("failed to mark @{} scanned: {e}", channel.handle);
                }
                true
            }
            Err(e) if e.is_connection_class() => {
                warn!("connection error scanning @{}: {e}", channel.handle);
                self.session.invalidate().await;
                self.session.ensure_healthy().await
            }
            Err(e) => {
                warn!("scan of @{} failed, skipping channel: {e}", channel.handle);
                true
            }
        }
    }
}
