// `/relay` - notification relay administration.
//
// Thin layer: read options, call the store or queue, format the reply.

use crate::core::notifications::{
    CommunityChannelConfig, DeliveryStatus, EventCategory, NotificationStore,
};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum CategoryChoice {
    #[name = "Comments (posted/edited)"]
    PrimaryActivity,
    #[name = "Votes"]
    Engagement,
    #[name = "Moderation"]
    Moderation,
}

impl From<CategoryChoice> for EventCategory {
    fn from(choice: CategoryChoice) -> Self {
        match choice {
            CategoryChoice::PrimaryActivity => EventCategory::PrimaryActivity,
            CategoryChoice::Engagement => EventCategory::Engagement,
            CategoryChoice::Moderation => EventCategory::Moderation,
        }
    }
}

/// Manage where platform notifications are relayed.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("status", "retry", "channel", "disable", "notifications")
)]
pub async fn relay(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show delivery counts and this server's relay configuration.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let store = &ctx.data().notifications;

    let counts = store.count_by_status().await?;
    let config = find_config(ctx, guild_id).await?;
    let settings = ctx.data().queue.settings();

    let deliveries = DeliveryStatus::ALL
        .iter()
        .map(|status| format!("{}: {}", status, counts.get(status).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join("\n");

    let channels = match &config {
        Some(cfg) if !cfg.channels.is_empty() => cfg
            .channels
            .iter()
            .map(|(category, channel_id)| format!("{}: <#{}>", category, channel_id))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "Not set".to_string(),
    };
    let active = if config.as_ref().is_some_and(|cfg| cfg.active) {
        "Enabled"
    } else {
        "Disabled"
    };

    let embed = serenity::CreateEmbed::default()
        .title("Notification Relay")
        .color(serenity::Color::BLURPLE)
        .field("Status", active, true)
        .field(
            "Notifications",
            if settings.notifications_enabled { "On" } else { "Off" },
            true,
        )
        .field("Channels", channels, false)
        .field("Deliveries", deliveries, false)
        .field(
            "Escalation",
            format!(
                "Auto-mute at {} warnings, auto-ban at {}",
                settings.auto_mute_threshold, settings.auto_ban_threshold
            ),
            false,
        )
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Guild ID: {}",
            guild_id
        )))
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Retry failed deliveries that are due now.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn retry(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let summary = ctx.data().queue.trigger_retry_sweep().await?;
    ctx.say(format!(
        "🔁 Retried {} notification(s): {} delivered, {} still failing.",
        summary.attempted, summary.succeeded, summary.still_failed
    ))
    .await?;
    Ok(())
}

/// Relay one category of events to a channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn channel(
    ctx: Context<'_>,
    #[description = "Which events"] category: CategoryChoice,
    #[description = "Channel to post to"] channel: serenity::Channel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let channel_id = channel.id().get();
    let category = EventCategory::from(category);

    let mut config = find_config(ctx, guild_id).await?.unwrap_or(CommunityChannelConfig {
        community_id: guild_id,
        channels: BTreeMap::new(),
        active: true,
    });
    config.channels.insert(category, channel_id);
    config.active = true;
    ctx.data().notifications.save_channel_config(config).await?;

    tracing::info!(guild_id, channel_id, category = %category, "Relay channel configured");
    ctx.say(format!("✅ {} events will be posted to <#{}>.", category, channel_id))
        .await?;
    Ok(())
}

/// Stop relaying notifications to this server.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();

    match find_config(ctx, guild_id).await? {
        Some(mut config) if config.active => {
            config.active = false;
            ctx.data().notifications.save_channel_config(config).await?;
            ctx.say("✅ Notification relay disabled.").await?;
        }
        _ => {
            ctx.say("ℹ️ Notification relay is already disabled.").await?;
        }
    }
    Ok(())
}

/// Turn platform-wide notifications on or off (site super admins only).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn notifications(
    ctx: Context<'_>,
    #[description = "Whether events are relayed at all"] enabled: bool,
) -> Result<(), Error> {
    let moderation = &ctx.data().moderation;
    let Some(actor) = moderation.find_discord_actor(ctx.author().id.get()).await? else {
        ctx.say("🔗 Your Discord account is not linked to a site account.")
            .await?;
        return Ok(());
    };

    let mut settings = moderation.get_settings().await?;
    settings.notifications_enabled = enabled;
    match moderation.update_settings(&actor.user_id, settings).await {
        Ok(_) => {
            let state = if enabled { "on" } else { "off" };
            ctx.say(format!("✅ Notifications turned {}.", state)).await?;
        }
        Err(e) => {
            ctx.say(format!("🚫 {}", e)).await?;
        }
    }
    Ok(())
}

async fn find_config(
    ctx: Context<'_>,
    guild_id: u64,
) -> Result<Option<CommunityChannelConfig>, Error> {
    let configs = ctx.data().notifications.get_channel_configs().await?;
    Ok(configs.into_iter().find(|cfg| cfg.community_id == guild_id))
}
