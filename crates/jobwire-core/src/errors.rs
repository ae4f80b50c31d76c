/// Core error type.
///
/// Adapter crates map their library errors into this type so the
/// pipeline can classify failures consistently (connection-class errors
/// trigger reconnection; everything else degrades in place).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Connection-class failure: timeout, network migrate, private
    /// channel, uninitialized connection. Invalidates session health.
    #[error("connection error: {0}")]
    Connection(String),

    /// A network call exceeded its deadline. Treated as connection-class.
    #[error("timed out {0}")]
    Timeout(String),

    /// Channel-scoped failure (entity not found, fetch rejected) that
    /// does not indicate a broken connection.
    #[error("source error: {0}")]
    Source(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that should invalidate cached session health and
    /// trigger reconnection before the next channel.
    pub fn is_connection_class(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-recipient delivery failure, classified by the notifier adapter.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient blocked the bot or is otherwise unreachable.
    /// Expected; swallowed without an error log.
    #[error("recipient unreachable")]
    Blocked,

    #[error("delivery failed: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_classification() {
        assert!(Error::Connection("network migrate".into()).is_connection_class());
        assert!(Error::Timeout("resolving @chan".into()).is_connection_class());
        assert!(!Error::Source("entity not found".into()).is_connection_class());
        assert!(!Error::Ledger("down".into()).is_connection_class());
    }
}
