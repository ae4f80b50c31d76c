use std::{env, path::PathBuf, time::Duration};

use crate::{
    cycle::CycleConfig,
    dispatch::DispatchConfig,
    errors::Error,
    ledger::LedgerConfig,
    scan::ScanConfig,
    session::SessionConfig,
    Result,
};

/// Typed worker configuration, loaded from the environment.
///
/// A `.env` file next to the binary is honored but never overrides
/// variables already set in the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // MTProto credentials
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,

    // Bot API
    pub bot_token: String,

    // Catalog + ledger storage
    pub database_url: Option<String>,

    // Pipeline tuning
    pub session: SessionConfig,
    pub scan: ScanConfig,
    pub dispatch: DispatchConfig,
    pub cycle: CycleConfig,
    pub ledger: LedgerConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_id = env_str("TELEGRAM_API_ID")
            .and_then(non_empty)
            .ok_or_else(|| required("TELEGRAM_API_ID"))?
            .trim()
            .parse::<i32>()
            .map_err(|_| Error::Config("TELEGRAM_API_ID must be an integer".to_string()))?;

        let api_hash = env_str("TELEGRAM_API_HASH")
            .and_then(non_empty)
            .ok_or_else(|| required("TELEGRAM_API_HASH"))?;

        let bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| required("TELEGRAM_BOT_TOKEN"))?;

        let session_file = PathBuf::from(
            env_str("SESSION_FILE").unwrap_or_else(|| "jobwire.session".to_string()),
        );

        let database_url = env_str("DATABASE_URL").and_then(non_empty);

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            health_ttl: secs("SESSION_HEALTH_TTL_SECS", defaults.health_ttl),
            probe_timeout: secs("SESSION_PROBE_TIMEOUT_SECS", defaults.probe_timeout),
            reconnect_attempts: env_u32("RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.reconnect_attempts),
            reconnect_base_delay: millis("RECONNECT_BASE_DELAY_MS", defaults.reconnect_base_delay),
            reconnect_max_delay: millis("RECONNECT_MAX_DELAY_MS", defaults.reconnect_max_delay),
        };

        let defaults = ScanConfig::default();
        let scan = ScanConfig {
            message_limit: env_usize("SCAN_MESSAGE_LIMIT").unwrap_or(defaults.message_limit),
            lookback: secs("SCAN_LOOKBACK_SECS", defaults.lookback),
            resolve_timeout: secs("SCAN_RESOLVE_TIMEOUT_SECS", defaults.resolve_timeout),
            fetch_timeout: secs("SCAN_FETCH_TIMEOUT_SECS", defaults.fetch_timeout),
            message_pause: millis("SCAN_MESSAGE_PAUSE_MS", defaults.message_pause),
        };

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            recipient_pause: millis("DISPATCH_RECIPIENT_PAUSE_MS", defaults.recipient_pause),
        };

        let defaults = CycleConfig::default();
        let cycle = CycleConfig {
            period: secs("CYCLE_PERIOD_SECS", defaults.period),
            channel_pause: secs("CYCLE_CHANNEL_PAUSE_SECS", defaults.channel_pause),
            sweep_interval: secs("LEDGER_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
        };

        let defaults = LedgerConfig::default();
        let ledger = LedgerConfig {
            preserve_chars: env_str("LEDGER_PRESERVE_CHARS")
                .and_then(non_empty)
                .unwrap_or(defaults.preserve_chars),
            retention_days: env_u64("LEDGER_RETENTION_DAYS")
                .map(|d| d as i64)
                .unwrap_or(defaults.retention_days),
            excerpt_len: env_usize("LEDGER_EXCERPT_LEN").unwrap_or(defaults.excerpt_len),
        };

        Ok(Self {
            api_id,
            api_hash,
            session_file,
            bot_token,
            database_url,
            session,
            scan,
            dispatch,
            cycle,
            ledger,
        })
    }
}

fn required(key: &str) -> Error {
    Error::Config(format!("{key} environment variable is required"))
}

fn secs(key: &str, default: Duration) -> Duration {
    env_u64(key).map(Duration::from_secs).unwrap_or(default)
}

fn millis(key: &str, default: Duration) -> Duration {
    env_u64(key).map(Duration::from_millis).unwrap_or(default)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so everything lives in one test.
    #[test]
    fn load_applies_overrides_over_defaults() {
        env::set_var("TELEGRAM_API_ID", "12345");
        env::set_var("TELEGRAM_API_HASH", "abcdef");
        env::set_var("TELEGRAM_BOT_TOKEN", "123:token");
        env::set_var("RECONNECT_ATTEMPTS", "5");
        env::set_var("LEDGER_PRESERVE_CHARS", ".@");
        env::set_var("LEDGER_EXCERPT_LEN", "80");

        let cfg = Config::load().unwrap();
        assert_eq!(cfg.api_id, 12345);
        assert_eq!(cfg.session.reconnect_attempts, 5);
        assert_eq!(cfg.ledger.preserve_chars, ".@");
        assert_eq!(cfg.ledger.excerpt_len, 80);
        // Untouched tunables keep their defaults.
        assert_eq!(cfg.session.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.ledger.retention_days, 7);

        for key in [
            "TELEGRAM_API_ID",
            "TELEGRAM_API_HASH",
            "TELEGRAM_BOT_TOKEN",
            "RECONNECT_ATTEMPTS",
            "LEDGER_PRESERVE_CHARS",
            "LEDGER_EXCERPT_LEN",
        ] {
            env::remove_var(key);
        }
    }
}
