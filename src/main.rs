use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tidings::commands::{echo, summary};
use tidings::config::Config;
use tidings::{gateway, ingest, recovery, scheduler, Data};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![summary::summary(), echo::echo()],
            event_handler: |_ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::Message { new_message } = event {
                        if !new_message.author.bot
                            && new_message.channel_id.get() == data.config.monitor_channel
                        {
                            let message = gateway::GatewayMessage::from_discord(new_message);
                            match ingest::retain(&data.db, &data.whitelist, &message) {
                                Ok(true) => info!(
                                    "Stored message {} from {}",
                                    message.id, message.author_name
                                ),
                                Ok(false) => {}
                                Err(e) => {
                                    error!("Failed to store message {}: {}", message.id, e)
                                }
                            }
                        }
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                info!("Bot is ready!");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let db = tidings::db::Database::new(&config.database_url)?;
                db.execute_init()?;

                let whitelist =
                    tidings::whitelist::Whitelist::new(config.whitelist_users.clone())?;
                if config.subscriber_channels.is_empty() {
                    warn!("No subscriber channels configured; daily digests will not be posted anywhere");
                }

                let discord = Arc::new(gateway::DiscordGateway::new(ctx.http.clone()));

                // Replay missed history before any live event is handled;
                // poise holds events until this setup closure returns, which
                // is the startup barrier. A failed replay aborts startup.
                let coordinator = recovery::RecoveryCoordinator::new(
                    db.clone(),
                    whitelist.clone(),
                    discord.clone(),
                    recovery::RecoverySettings {
                        channel_id: config.monitor_channel,
                        lookback_hours: config.backfill_lookback_hours,
                        max_messages: config.backfill_max_messages,
                        retry_attempts: config.history_retry_attempts,
                        retry_backoff: std::time::Duration::from_secs(
                            config.history_retry_backoff_secs,
                        ),
                    },
                );
                coordinator.run().await?;

                let backend = Arc::new(tidings::llm::LlmClient::new(&config));
                let generator = tidings::summary::SummaryGenerator::new(
                    db.clone(),
                    backend,
                    config.summary_max_tokens,
                );
                let daily = Arc::new(scheduler::SummaryScheduler::new(
                    db.clone(),
                    generator,
                    discord,
                    scheduler::SchedulerSettings {
                        monitor_channel: config.monitor_channel,
                        subscriber_channels: config.subscriber_channels.clone(),
                        summary_time: config.summary_time,
                        timezone: config.timezone,
                        retry_attempts: config.summary_retry_attempts,
                        retry_backoff: std::time::Duration::from_secs(
                            config.summary_retry_backoff_secs,
                        ),
                    },
                ));

                let scheduler_task = daily.clone();
                tokio::spawn(async move {
                    // The scheduler loop only errors on storage failure,
                    // which the process cannot run correctly without.
                    if let Err(e) = scheduler_task.run().await {
                        error!("Summary scheduler stopped: {}", e);
                        std::process::exit(1);
                    }
                });

                Ok(Data {
                    config,
                    db,
                    whitelist,
                    scheduler: daily,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
