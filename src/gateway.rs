use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, CreateMessage, GetMessages, MessageId};
use serenity::http::Http;
use std::sync::Arc;
use tracing::debug;

/// First second of 2015, the epoch Discord snowflakes count from.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// One message event as delivered by the gateway, shared between live
/// ingestion and history replay so both paths store identical shapes.
#[derive(Clone, Debug)]
pub struct GatewayMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl GatewayMessage {
    pub fn from_discord(message: &serenity::model::channel::Message) -> Self {
        Self {
            id: message.id.get(),
            channel_id: message.channel_id.get(),
            author_id: message.author.id.to_string(),
            author_name: message.author.name.clone(),
            content: extract_message_text(message),
            created_at: DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
                .unwrap_or_default(),
        }
    }
}

/// Paginated channel-history access, one page per call. Pages are returned
/// oldest-first; an empty page means the history is drained.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        channel_id: u64,
        after: u64,
        limit: u8,
    ) -> anyhow::Result<Vec<GatewayMessage>>;
}

/// Outbound message delivery to a channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, channel_id: u64, text: &str) -> anyhow::Result<()>;
}

/// The real gateway, backed by the serenity HTTP client.
pub struct DiscordGateway {
    http: Arc<Http>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HistoryFetcher for DiscordGateway {
    async fn fetch_page(
        &self,
        channel_id: u64,
        after: u64,
        limit: u8,
    ) -> anyhow::Result<Vec<GatewayMessage>> {
        let builder = GetMessages::new()
            .after(MessageId::new(after.max(1)))
            .limit(limit);
        let mut page = ChannelId::new(channel_id)
            .messages(&self.http, builder)
            .await?;

        // Discord returns newest-first; replay wants chronological order.
        page.sort_by_key(|m| m.id);
        debug!("Fetched {} history messages after {}", page.len(), after);

        Ok(page.iter().map(GatewayMessage::from_discord).collect())
    }
}

#[async_trait]
impl ChannelSink for DiscordGateway {
    async fn send(&self, channel_id: u64, text: &str) -> anyhow::Result<()> {
        let builder = CreateMessage::new().content(text);
        ChannelId::new(channel_id)
            .send_message(&self.http, builder)
            .await?;
        Ok(())
    }
}

/// Snowflake id of the (hypothetical) first message created at `instant`.
/// Used as an `after` cursor so "fetch history since timestamp T" maps onto
/// Discord's id-based pagination.
pub fn snowflake_at(instant: DateTime<Utc>) -> u64 {
    let ms = instant.timestamp_millis() - DISCORD_EPOCH_MS;
    if ms <= 0 {
        return 1;
    }
    (ms as u64) << 22
}

/// Flatten message text plus any embed content into one stored string.
/// RSS-style feed posts in particular carry everything in embeds.
pub fn extract_message_text(message: &serenity::model::channel::Message) -> String {
    let mut parts = Vec::new();

    let content = message.content.trim();
    if !content.is_empty() {
        parts.push(content.to_string());
    }

    for embed in &message.embeds {
        if let Some(title) = embed.title.as_deref() {
            let title = title.trim();
            if !title.is_empty() {
                parts.push(title.to_string());
            }
        }

        if let Some(description) = embed.description.as_deref() {
            let description = description.trim();
            if !description.is_empty() {
                parts.push(description.to_string());
            }
        }

        for field in &embed.fields {
            let name = field.name.trim();
            let value = field.value.trim();
            match (name.is_empty(), value.is_empty()) {
                (true, true) => {}
                (true, false) => parts.push(value.to_string()),
                (false, true) => parts.push(name.to_string()),
                (false, false) => parts.push(format!("{}: {}", name, value)),
            }
        }

        if let Some(url) = embed.url.as_deref() {
            parts.push(format!("Source: {}", url));
        }
    }

    for attachment in &message.attachments {
        parts.push(format!("Attachment: {}", attachment.filename));
    }

    parts.join("\n")
}
