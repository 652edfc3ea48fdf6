// This is the entry point of the comment relay bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite)
// - `discord/` = Discord-specific adapters (transport, commands, buttons)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Spawn the notification worker and the retry sweep
// 4. Set up the Discord framework

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{ModerationService, ModerationStore};
use crate::core::notifications::{
    BuilderOptions, DispatchWorker, MessageBuilder, NotificationDispatcher, NotificationQueue,
};
use crate::discord::sender::DiscordSender;
use crate::discord::{Data, Error};
use crate::infra::database;
use crate::infra::moderation::SqliteModerationStore;
use crate::infra::notifications::SqliteNotificationStore;
use anyhow::Context as _;
use dashmap::DashSet;
use poise::serenity_prelude as serenity;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Process configuration, read once from the environment.
struct Config {
    token: String,
    data_dir: String,
    site_url: String,
    retry_interval: Duration,
    delivery_timeout: Duration,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let token = lookup("DISCORD_TOKEN").context(
            "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
        )?;
        let setting = |name: &str, default: u64| env_or(&lookup, name, default);
        Ok(Self {
            token,
            data_dir: env_or(&lookup, "RELAY_DATA_DIR", "data".to_string())?,
            site_url: env_or(
                &lookup,
                "RELAY_SITE_URL",
                "http://localhost:3000".to_string(),
            )?,
            // Zero would spin the sweep loop or time out every send.
            retry_interval: Duration::from_secs(
                setting("RELAY_RETRY_INTERVAL_SECS", 60)?.max(1),
            ),
            delivery_timeout: Duration::from_secs(
                setting("RELAY_DELIVERY_TIMEOUT_SECS", 10)?.max(1),
            ),
        })
    }
}

fn env_or<T>(lookup: impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        None => Ok(default),
    }
}

/// Event handler for non-command Discord events.
/// Only button clicks on relayed notifications matter here.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::InteractionCreate {
        interaction: serenity::Interaction::Component(component),
    } = event
    {
        if let Err(e) = discord::interactions::handle_component(ctx, data, component).await {
            tracing::error!("Error handling button interaction: {}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let db_path = format!("{}/relay.db", config.data_dir);
    let pool = database::connect(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let moderation_store = SqliteModerationStore::new(pool.clone());
    moderation_store
        .migrate()
        .await
        .context("Failed to migrate moderation tables")?;
    let notification_store = SqliteNotificationStore::new(pool);
    notification_store
        .migrate()
        .await
        .context("Failed to migrate notification tables")?;

    let settings = moderation_store
        .get_settings()
        .await
        .context("Failed to load relay settings")?;
    let (queue, queue_rx) = NotificationQueue::new(settings);

    // REST-only client for the worker; it does not wait for the gateway.
    let http = Arc::new(serenity::Http::new(&config.token));
    let dispatcher = NotificationDispatcher::new(
        notification_store.clone(),
        DiscordSender::new(http),
        MessageBuilder::new(BuilderOptions {
            site_url: config.site_url.clone(),
        }),
    )
    .with_delivery_timeout(config.delivery_timeout);
    tokio::spawn(DispatchWorker::new(queue_rx, dispatcher).run());

    // Periodic retry sweep. It goes through the worker queue like everything else.
    let sweep_queue = queue.clone();
    let retry_interval = config.retry_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(retry_interval);
        loop {
            ticker.tick().await;
            match sweep_queue.trigger_retry_sweep().await {
                Ok(summary) if summary.attempted > 0 => tracing::info!(
                    attempted = summary.attempted,
                    succeeded = summary.succeeded,
                    still_failed = summary.still_failed,
                    "Retry sweep completed"
                ),
                Ok(_) => tracing::debug!("Retry sweep found nothing due"),
                Err(e) => {
                    tracing::warn!("Stopping retry sweeps: {}", e);
                    break;
                }
            }
        }
    });

    let moderation_service = Arc::new(ModerationService::new(moderation_store, queue.clone()));

    // Create the data structure that will be shared across all commands
    let data = Data {
        moderation: moderation_service,
        notifications: notification_store,
        queue,
        in_flight: DashSet::new(),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    // Interactions arrive without privileged intents.
    let intents = serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::commands::relay()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered, bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[("DISCORD_TOKEN", "t")]).unwrap();
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.retry_interval, Duration::from_secs(60));
        assert_eq!(config.delivery_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_durations_are_raised_to_one_second() {
        let config = config(&[
            ("DISCORD_TOKEN", "t"),
            ("RELAY_RETRY_INTERVAL_SECS", "0"),
            ("RELAY_DELIVERY_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.delivery_timeout, Duration::from_secs(1));
    }

    #[test]
    fn missing_token_and_bad_numbers_are_errors() {
        assert!(config(&[]).is_err());
        assert!(config(&[
            ("DISCORD_TOKEN", "t"),
            ("RELAY_DELIVERY_TIMEOUT_SECS", "soon")
        ])
        .is_err());
    }
}
