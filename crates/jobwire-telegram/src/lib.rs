//! Telegram Bot API adapter (teloxide).
//!
//! Implements the `jobwire-core` Notifier port: delivers rendered HTML
//! notifications to individual recipients.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode, ApiError, RequestError};
use tokio::time::sleep;
use tracing::debug;

use jobwire_core::{domain::RecipientId, ports::Notifier, DeliveryError};

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    fn tg_chat(recipient: RecipientId) -> ChatId {
        ChatId(recipient.0)
    }

    /// A recipient who blocked the bot or deleted their account is a
    /// normal outcome, not a delivery error.
    fn classify(e: RequestError) -> DeliveryError {
        match e {
            RequestError::Api(ApiError::BotBlocked | ApiError::UserDeactivated) => {
                DeliveryError::Blocked
            }
            other => DeliveryError::Other(format!("telegram error: {other}")),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_html(
        &self,
        recipient: RecipientId,
        html: &str,
    ) -> std::result::Result<(), DeliveryError> {
        // One retry on 429, honoring the server-provided delay.
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            let sent = self
                .bot
                .send_message(Self::tg_chat(recipient), html.to_string())
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
                .await;
            match sent {
                Ok(_) => return Ok(()),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    debug!("rate limited, retrying in {d:?}");
                    sleep(d).await;
                }
                Err(e) => return Err(Self::classify(e)),
            }
        }
    }
}
