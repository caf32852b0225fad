use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::summary::split_chunks;
use crate::{Context, Error};
use tracing::{info, warn};

/// Generate an on-demand digest of the last 24 hours
#[poise::command(slash_command)]
pub async fn summary(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();

    // Manual triggers are scoped to the same users whose messages we retain.
    let invoker = ctx.author().id.to_string();
    if !data.whitelist.is_allowed(&invoker) {
        warn!("Rejected manual summary request from non-whitelisted user {}", invoker);
        ctx.say("You are not permitted to request summaries.").await?;
        return Ok(());
    }

    info!("Manual summary requested by {}", ctx.author().name);
    ctx.defer().await?;

    // Serialized behind any in-progress scheduled run; never advances the
    // daily schedule state.
    match data.scheduler.run_manual().await {
        Ok(text) => {
            for chunk in split_chunks(&text, DISCORD_MESSAGE_LIMIT) {
                ctx.say(chunk).await?;
            }
        }
        Err(e) => {
            ctx.say(format!("Failed to generate summary: {}", e)).await?;
        }
    }

    Ok(())
}
