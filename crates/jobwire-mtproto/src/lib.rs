//! MTProto source adapter (grammers).
//!
//! Implements the `jobwire-core` SourceConnector/SourceConnection ports
//! over a user session, which is what channel history reads require.
//! Entity offsets arrive in UTF-16 code units and are converted to
//! character offsets before they leave this crate.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use grammers_client::{types::Chat, Client, Config, InitParams};
use grammers_session::Session;
use grammers_tl_types as tl;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use jobwire_core::{
    domain::{ChannelRef, MessageId, RawMessage, SpanKind, TextSpan},
    ports::{SourceConnection, SourceConnector},
    Error, Result,
};

pub struct MtprotoConnector {
    api_id: i32,
    api_hash: String,
    session_file: PathBuf,
}

impl MtprotoConnector {
    pub fn new(api_id: i32, api_hash: String, session_file: PathBuf) -> Self {
        Self {
            api_id,
            api_hash,
            session_file,
        }
    }
}

#[async_trait]
impl SourceConnector for MtprotoConnector {
    async fn connect(&self) -> Result<Arc<dyn SourceConnection>> {
        let session = Session::load_file_or_create(&self.session_file)
            .map_err(|e| Error::Connection(format!("session file: {e}")))?;

        let client = Client::connect(Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| Error::Connection(format!("connect failed: {e}")))?;

        Ok(Arc::new(MtprotoConnection {
            client,
            session_file: self.session_file.clone(),
            chats: Mutex::new(HashMap::new()),
        }))
    }
}

pub struct MtprotoConnection {
    client: Client,
    session_file: PathBuf,
    /// Resolved channels by bare handle. A `ChannelRef` handed out by
    /// `resolve_channel` is only valid against this cache.
    chats: Mutex<HashMap<String, Chat>>,
}

#[async_trait]
impl SourceConnection for MtprotoConnection {
    async fn check_authorized(&self) -> Result<bool> {
        self.client.is_authorized().await.map_err(map_invocation)
    }

    async fn whoami(&self) -> Result<String> {
        let me = self.client.get_me().await.map_err(map_invocation)?;
        Ok(me
            .username()
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| me.full_name()))
    }

    async fn resolve_channel(&self, handle: &str) -> Result<ChannelRef> {
        let handle = handle.trim_start_matches('@').to_string();
        {
            let chats = self.chats.lock().await;
            if chats.contains_key(&handle) {
                return Ok(ChannelRef(handle));
            }
        }

        let chat = self
            .client
            .resolve_username(&handle)
            .await
            .map_err(map_invocation)?
            .ok_or_else(|| Error::Source(format!("channel @{handle} not found")))?;
        debug!("resolved @{handle}");

        self.chats.lock().await.insert(handle.clone(), chat);
        Ok(ChannelRef(handle))
    }

    async fn recent_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<RawMessage>> {
        let chat = self
            .chats
            .lock()
            .await
            .get(&channel.0)
            .cloned()
            .ok_or_else(|| Error::Source(format!("channel @{} not resolved", channel.0)))?;

        let mut iter = self.client.iter_messages(chat.pack()).limit(limit);
        let mut out = Vec::new();
        while let Some(msg) = iter.next().await.map_err(map_invocation)? {
            let text = msg.text().to_string();
            let spans = msg
                .fmt_entities()
                .map(|entities| convert_entities(&text, entities))
                .unwrap_or_default();
            out.push(RawMessage {
                id: MessageId(msg.id()),
                text,
                spans,
                published_at: msg.date(),
            });
        }
        Ok(out)
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.session().save_to_file(&self.session_file) {
            warn!("failed to save session: {e}");
        }
    }
}

/// RPC errors that indicate a broken or migrated connection invalidate
/// session health; channel-scoped refusals do not.
fn map_invocation(e: grammers_client::InvocationError) -> Error {
    use grammers_client::InvocationError;
    match e {
        InvocationError::Rpc(rpc) => {
            let name = rpc.name.clone();
            if name.contains("MIGRATE") || name.starts_with("AUTH_KEY") {
                Error::Connection(format!("rpc {name}"))
            } else {
                Error::Source(format!("rpc {name}"))
            }
        }
        other => Error::Connection(other.to_string()),
    }
}

fn convert_entities(text: &str, entities: &[tl::enums::MessageEntity]) -> Vec<TextSpan> {
    entities
        .iter()
        .filter_map(|e| convert_entity(text, e))
        .collect()
}

fn convert_entity(text: &str, entity: &tl::enums::MessageEntity) -> Option<TextSpan> {
    use tl::enums::MessageEntity as E;

    let (kind, offset, length, url) = match entity {
        E::Bold(e) => (SpanKind::Bold, e.offset, e.length, None),
        E::Italic(e) => (SpanKind::Italic, e.offset, e.length, None),
        E::Underline(e) => (SpanKind::Underline, e.offset, e.length, None),
        E::Strike(e) => (SpanKind::Strikethrough, e.offset, e.length, None),
        E::Code(e) => (SpanKind::Code, e.offset, e.length, None),
        E::Pre(e) => (SpanKind::Pre, e.offset, e.length, None),
        E::Hashtag(e) => (SpanKind::Hashtag, e.offset, e.length, None),
        E::Url(e) => (SpanKind::Url, e.offset, e.length, None),
        E::TextUrl(e) => (SpanKind::TextUrl, e.offset, e.length, Some(e.url.clone())),
        E::Mention(e) => (SpanKind::Mention, e.offset, e.length, None),
        E::Spoiler(e) => (SpanKind::Other, e.offset, e.length, None),
        E::Blockquote(e) => (SpanKind::Other, e.offset, e.length, None),
        E::Phone(e) => (SpanKind::Other, e.offset, e.length, None),
        E::Email(e) => (SpanKind::Other, e.offset, e.length, None),
        E::Cashtag(e) => (SpanKind::Other, e.offset, e.length, None),
        E::BotCommand(e) => (SpanKind::Other, e.offset, e.length, None),
        E::BankCard(e) => (SpanKind::Other, e.offset, e.length, None),
        E::MentionName(e) => (SpanKind::Other, e.offset, e.length, None),
        E::CustomEmoji(e) => (SpanKind::Other, e.offset, e.length, None),
        _ => return None,
    };

    let (char_offset, char_length) = utf16_range_to_chars(text, offset, length)?;
    Some(TextSpan {
        kind,
        offset: char_offset,
        length: char_length,
        url,
    })
}

/// Convert a UTF-16 code-unit range to a character range.
///
/// Returns None when the range does not land on character boundaries or
/// runs past the text, in which case the span is dropped rather than
/// rendered misaligned.
fn utf16_range_to_chars(text: &str, offset: i32, length: i32) -> Option<(i32, i32)> {
    if offset < 0 || length <= 0 {
        return None;
    }
    let start_u16 = offset as usize;
    let end_u16 = start_u16 + length as usize;

    let mut u16_pos = 0usize;
    let mut char_start = None;
    let mut char_end = None;

    for (char_idx, c) in text.chars().enumerate() {
        if u16_pos == start_u16 {
            char_start = Some(char_idx);
        }
        if u16_pos == end_u16 {
            char_end = Some(char_idx);
            break;
        }
        u16_pos += c.len_utf16();
    }
    // Range may end exactly at the end of the text.
    if char_end.is_none() && u16_pos == end_u16 {
        char_end = Some(text.chars().count());
    }

    let start = char_start?;
    let end = char_end?;
    if end <= start {
        return None;
    }
    Some((start as i32, (end - start) as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_offsets_pass_through() {
        assert_eq!(utf16_range_to_chars("hello world", 6, 5), Some((6, 5)));
    }

    #[test]
    fn cyrillic_is_one_unit_per_char() {
        // Every Cyrillic letter is a single UTF-16 unit and a single char.
        assert_eq!(utf16_range_to_chars("нужен веб", 6, 3), Some((6, 3)));
    }

    #[test]
    fn surrogate_pairs_shift_offsets() {
        // The emoji occupies two UTF-16 units but one char.
        let text = "🔥 hot lead";
        assert_eq!(utf16_range_to_chars(text, 3, 3), Some((2, 3)));
    }

    #[test]
    fn range_ending_at_text_end() {
        assert_eq!(utf16_range_to_chars("abc", 0, 3), Some((0, 3)));
    }

    #[test]
    fn out_of_bounds_is_dropped() {
        assert_eq!(utf16_range_to_chars("abc", 1, 10), None);
        assert_eq!(utf16_range_to_chars("abc", -1, 2), None);
        assert_eq!(utf16_range_to_chars("abc", 0, 0), None);
    }

    #[test]
    fn mid_surrogate_offset_is_dropped() {
        // Offset pointing inside the emoji's surrogate pair.
        assert_eq!(utf16_range_to_chars("🔥abc", 1, 2), None);
    }

    #[test]
    fn text_url_carries_its_target() {
        let text = "see details";
        let entities = vec![tl::enums::MessageEntity::TextUrl(
            tl::types::MessageEntityTextUrl {
                offset: 4,
                length: 7,
                url: "https://example.com/post".to_string(),
            },
        )];
        let spans = convert_entities(text, &entities);
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].kind, SpanKind::TextUrl));
        assert_eq!(spans[0].url.as_deref(), Some("https://example.com/post"));
    }

    #[test]
    fn unstyled_entities_map_to_other() {
        let text = "/start now";
        let entities = vec![tl::enums::MessageEntity::BotCommand(
            tl::types::MessageEntityBotCommand {
                offset: 0,
                length: 6,
            },
        )];
        let spans = convert_entities(text, &entities);
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].kind, SpanKind::Other));
    }
}
