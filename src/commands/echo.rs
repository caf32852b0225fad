use crate::{Context, Error};

/// Liveness probe: repeats your input back
#[poise::command(slash_command)]
pub async fn echo(
    ctx: Context<'_>,
    #[description = "Text to echo"] text: String,
) -> Result<(), Error> {
    ctx.say(format!(
        "Hello, {}.\nYou just said:\n```\n{}\n```",
        ctx.author().name,
        text
    ))
    .await?;
    Ok(())
}
