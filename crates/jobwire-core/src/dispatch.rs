//! Fan-out of one candidate record to every matching recipient.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    domain::{CandidateRecord, Recipient},
    ports::Notifier,
    render, DeliveryError,
};

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Spacing between sends. Backpressure against the outbound API's
    /// rate limits, not a correctness requirement.
    pub recipient_pause: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            recipient_pause: Duration::from_millis(50),
        }
    }
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    cfg: DispatchConfig,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, cfg: DispatchConfig) -> Self {
        Self { notifier, cfg }
    }

    /// Deliver `record` to every recipient with a matching topic key
    /// and an active subscription. Delivery is independent per
    /// recipient: a blocked recipient is expected and silent, any other
    /// failure is logged and skipped. Returns the delivered count.
    pub async fn fan_out(&self, record: &CandidateRecord, recipients: &[Recipient]) -> usize {
        let body = render::render_spans(&record.message.text, &record.message.spans);
        let html = render::format_notification(&record.topic_label, &record.url, &body);

        let mut sent = 0usize;
        let mut first = true;
        for recipient in recipients
            .iter()
            .filter(|r| r.active && r.topic_key == record.topic_key)
        {
            if !first && !self.cfg.recipient_pause.is_zero() {
                sleep(self.cfg.recipient_pause).await;
            }
            first = false;

            match self.notifier.send_html(recipient.id, &html).await {
                Ok(()) => sent += 1,
                Err(DeliveryError::Blocked) => {
                    debug!("recipient {} unreachable, skipping", recipient.id.0);
                }
                Err(DeliveryError::Other(e)) => {
                    warn!("delivery to {} failed: {e}", recipient.id.0);
                }
            }
        }

        sent
    }
}
