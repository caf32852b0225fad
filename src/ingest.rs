use tracing::debug;

use crate::db::Database;
use crate::gateway::GatewayMessage;
use crate::whitelist::Whitelist;

/// Single retention path for gateway messages: whitelist check, then the
/// deduplicated append. Live ingestion and history replay both go through
/// here, so they can never diverge in what gets kept.
///
/// Returns `true` when a new row was stored.
pub fn retain(
    db: &Database,
    whitelist: &Whitelist,
    message: &GatewayMessage,
) -> anyhow::Result<bool> {
    if !whitelist.is_allowed(&message.author_id) {
        debug!(
            "Ignoring message {} from non-whitelisted user {}",
            message.id, message.author_id
        );
        return Ok(false);
    }

    if message.content.trim().is_empty() {
        debug!("Message {} has no storable content", message.id);
        return Ok(false);
    }

    db.append_message(
        &message.id.to_string(),
        &message.channel_id.to_string(),
        &message.author_id,
        &message.author_name,
        &message.content,
        message.created_at,
    )
}
