//! Source-platform session lifecycle: health caching and reconnection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use crate::ports::{SourceConnection, SourceConnector};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How long a successful probe keeps the health flag valid.
    pub health_ttl: Duration,
    /// Deadline for the whoami round trip.
    pub probe_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            health_ttl: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(10_000),
        }
    }
}

#[derive(Default)]
struct SessionState {
    conn: Option<Arc<dyn SourceConnection>>,
    healthy_until: Option<Instant>,
}

/// Owns the single mutable connection handle and its health timestamp.
///
/// Only the pipeline's execution context calls in here; the mutex is
/// never held across a network await.
pub struct SessionManager {
    connector: Arc<dyn SourceConnector>,
    cfg: SessionConfig,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn SourceConnector>, cfg: SessionConfig) -> Self {
        Self {
            connector,
            cfg,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Cached health check with probe + reconnect fallback.
    ///
    /// Within the validity window this returns without any network
    /// call. Otherwise an existing connection is probed; probe failure
    /// (including timeout) falls through to reconnection with bounded
    /// exponential backoff. Returns false once reconnection attempts
    /// are exhausted.
    pub async fn ensure_healthy(&self) -> bool {
        let existing = {
            let st = self.state.lock().await;
            if let (Some(_), Some(until)) = (&st.conn, st.healthy_until) {
                if Instant::now() < until {
                    return true;
                }
            }
            st.conn.clone()
        };

        if let Some(conn) = existing {
            match timeout(self.cfg.probe_timeout, conn.whoami()).await {
                Ok(Ok(_)) => {
                    self.mark_healthy().await;
                    return true;
                }
                Ok(Err(e)) => warn!("health probe failed: {e}"),
                Err(_) => warn!("health probe timed out"),
            }
            self.invalidate().await;
        }

        self.reconnect().await
    }

    /// Drop the cached health flag and tear down the current handle.
    /// Called by the pipeline after a connection-class error.
    pub async fn invalidate(&self) {
        let old = {
            let mut st = self.state.lock().await;
            st.healthy_until = None;
            st.conn.take()
        };
        if let Some(conn) = old {
            conn.disconnect().await;
        }
    }

    /// Current connection handle, if one is established.
    pub async fn connection(&self) -> Option<Arc<dyn SourceConnection>> {
        self.state.lock().await.conn.clone()
    }

    async fn mark_healthy(&self) {
        let mut st = self.state.lock().await;
        st.healthy_until = Some(Instant::now() + self.cfg.health_ttl);
    }

    async fn reconnect(&self) -> bool {
        self.invalidate().await;

        for attempt in 0..self.cfg.reconnect_attempts {
            match self.try_connect().await {
                Ok(conn) => {
                    {
                        let mut st = self.state.lock().await;
                        st.conn = Some(conn);
                        st.healthy_until = Some(Instant::now() + self.cfg.health_ttl);
                    }
                    info!("source session established");
                    return true;
                }
                Err(e) => warn!("connect attempt {} failed: {e}", attempt + 1),
            }

            if attempt + 1 < self.cfg.reconnect_attempts {
                let delay = self
                    .cfg
                    .reconnect_base_delay
                    .saturating_mul(1u32 << attempt.min(16))
                    .min(self.cfg.reconnect_max_delay);
                sleep(delay).await;
            }
        }

        warn!(
            "reconnect gave up after {} attempts",
            self.cfg.reconnect_attempts
        );
        false
    }

    async fn try_connect(&self) -> crate::Result<Arc<dyn SourceConnection>> {
        let conn = self.connector.connect().await?;
        if !conn.check_authorized().await? {
            conn.disconnect().await;
            return Err(crate::Error::Connection(
                "source session is not authorized".into(),
            ));
        }
        Ok(conn)
    }
}
