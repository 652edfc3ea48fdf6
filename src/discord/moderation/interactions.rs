// Button clicks on notification messages.
//
// **Flow:**
// 1. Decode the button's custom id into (action, target)
// 2. Resolve the clicking Discord account to a platform user
// 3. Call the core moderation service (it does every permission check)
// 4. Reply ephemerally with the outcome

use crate::core::moderation::{ActionParams, ModerationError, StateChange};
use crate::core::notifications::parse_action_custom_id;
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

/// Handle a component interaction. Clicks on buttons we did not create are ignored.
pub async fn handle_component(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
) -> Result<(), Error> {
    let Some((action, target)) = parse_action_custom_id(&interaction.data.custom_id) else {
        return Ok(());
    };

    // One in-flight click per button.
    let guard_key = format!("{}:{}", interaction.message.id, interaction.data.custom_id);
    if !data.in_flight.insert(guard_key.clone()) {
        return reply(
            ctx,
            interaction,
            "⏳ That action is already being processed.",
        )
        .await;
    }

    let content = match data.moderation.find_discord_actor(interaction.user.id.get()).await {
        Ok(Some(actor)) => {
            let params = ActionParams {
                reason: Some(format!("Via Discord by {}", interaction.user.name)),
                ..Default::default()
            };
            let result = data
                .moderation
                .apply_action(&actor.user_id, action, &target, params)
                .await;
            if let Err(e) = &result {
                tracing::warn!(
                    discord_user = interaction.user.id.get(),
                    action = %action,
                    target_id = %target.id,
                    error = %e,
                    "Moderation button rejected"
                );
            }
            describe_outcome(&result)
        }
        Ok(None) => "🔗 Your Discord account is not linked to a site account.".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve Discord actor");
            "❌ Something went wrong, please try again later.".to_string()
        }
    };

    data.in_flight.remove(&guard_key);
    reply(ctx, interaction, &content).await
}

async fn reply(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    content: &str,
) -> Result<(), Error> {
    interaction
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Message(
                serenity::CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

/// Human readable reply for the clicking moderator.
pub fn describe_outcome(result: &Result<StateChange, ModerationError>) -> String {
    match result {
        Ok(change) => {
            let mut text = format!("✅ `{}` applied to {}.", change.action, change.target.id);
            if change.escalation.is_some() {
                text.push_str(" Warning threshold reached, escalation applied.");
            }
            text
        }
        Err(ModerationError::Permission(reason)) => format!("🚫 {}", reason),
        Err(ModerationError::AlreadyInState(reason)) => format!("ℹ️ Nothing to do: {}", reason),
        Err(ModerationError::NotFound(what)) => format!("❓ {} no longer exists.", what),
        Err(ModerationError::Validation(reason)) => format!("⚠️ {}", reason),
        Err(ModerationError::Storage(_)) => {
            "❌ Something went wrong, please try again later.".to_string()
        }
    }
}
