use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{Database, StoredMessage};
use crate::error::SummaryError;
use crate::gateway::ChannelSink;
use crate::llm::SummaryBackend;

pub const SUMMARY_HEADER: &str = "**Daily Channel Summary**";
pub const NO_ACTIVITY_TEXT: &str = "No messages to summarize for this period.";

/// Collects a period's retained messages, turns them into a digest via the
/// summarization backend, and posts the result. Does not retry on backend
/// failure; the caller owns that policy, which keeps one call a cleanly
/// retryable unit.
pub struct SummaryGenerator {
    db: Database,
    backend: Arc<dyn SummaryBackend>,
    max_tokens: u32,
}

impl SummaryGenerator {
    pub fn new(db: Database, backend: Arc<dyn SummaryBackend>, max_tokens: u32) -> Self {
        Self {
            db,
            backend,
            max_tokens,
        }
    }

    /// Digest of the retained messages in `[period_start, period_end)`.
    /// An empty window produces the fixed no-activity text without touching
    /// the backend.
    pub async fn generate(
        &self,
        channel_id: u64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<String, SummaryError> {
        let messages =
            self.db
                .messages_between(&channel_id.to_string(), period_start, period_end)?;

        if messages.is_empty() {
            info!(
                "No retained messages in [{}, {}); skipping backend call",
                period_start, period_end
            );
            return Ok(format!("{SUMMARY_HEADER}\n{NO_ACTIVITY_TEXT}"));
        }

        info!(
            "Summarizing {} messages in [{}, {})",
            messages.len(),
            period_start,
            period_end
        );
        let prompt = build_prompt(&messages);
        let summary = self.backend.summarize(&prompt, self.max_tokens).await?;

        Ok(format!(
            "{SUMMARY_HEADER}\n*Summary period: {} to {} UTC*\n\n{}",
            period_start.format("%Y-%m-%d %H:%M"),
            period_end.format("%Y-%m-%d %H:%M"),
            summary.trim()
        ))
    }

}

/// Post a digest to every subscriber channel, chunked to the platform
/// message limit. A failed channel is logged and skipped; the others still
/// receive their copy.
pub async fn deliver(sink: &dyn ChannelSink, channels: &[u64], text: &str) {
    let chunks = split_chunks(text, crate::config::DISCORD_MESSAGE_LIMIT);
    for &channel in channels {
        for chunk in &chunks {
            if let Err(e) = sink.send(channel, chunk).await {
                error!("Failed to send summary to channel {}: {}", channel, e);
                break;
            }
        }
    }
}

/// Render the message window into one prompt, chronological, one line per
/// message.
fn build_prompt(messages: &[StoredMessage]) -> String {
    let mut lines = String::new();
    for msg in messages {
        lines.push_str(&format!(
            "[{}] {}: {}\n",
            msg.created_at.format("%H:%M"),
            msg.author_name,
            msg.content
        ));
    }

    format!(
        "Act as a professional news editor. The following are news articles and updates \
         shared in a Discord news channel. Create a concise news summary in the style of \
         a professional news briefing.\n\n\
         News Articles and Updates:\n{lines}\n\
         Provide a short summary (2-4 paragraphs) in a neutral, objective tone, most \
         significant stories first. Include links to the source articles where present."
    )
}

/// Split `text` into pieces of at most `limit` characters, preferring line
/// boundaries and never cutting inside a UTF-8 character.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.split('\n') {
        let mut rest = line;
        loop {
            let rest_chars = rest.chars().count();
            let (piece, piece_chars, remainder) = if rest_chars > limit {
                let cut = rest
                    .char_indices()
                    .nth(limit)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                (&rest[..cut], limit, &rest[cut..])
            } else {
                (rest, rest_chars, "")
            };

            let separator = usize::from(!current.is_empty());
            if current_chars + separator + piece_chars > limit && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if !current.is_empty() {
                current.push('\n');
                current_chars += 1;
            }
            current.push_str(piece);
            current_chars += piece_chars;

            if remainder.is_empty() {
                break;
            }
            rest = remainder;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
