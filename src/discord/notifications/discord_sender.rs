// Discord transport for rendered notifications.
//
// Translates the channel-agnostic `RenderedMessage` into an embed plus
// button rows and posts it over the REST client. No business logic here.

use crate::core::notifications::{
    Accent, ActionButton, ButtonKind, ButtonStyle, ContentBlock, DeliveryError, MessageSender,
    RenderedMessage,
};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

// Discord rejects the whole message when any of these is exceeded.
const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;
const FIELD_NAME_LIMIT: usize = 256;
const FIELD_VALUE_LIMIT: usize = 1024;
const FOOTER_LIMIT: usize = 2048;
const BUTTON_LABEL_LIMIT: usize = 80;
const CUSTOM_ID_LIMIT: usize = 100;

pub struct DiscordSender {
    http: Arc<serenity::Http>,
}

impl DiscordSender {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageSender for DiscordSender {
    async fn send(
        &self,
        channel_id: u64,
        message: &RenderedMessage,
    ) -> Result<String, DeliveryError> {
        if channel_id == 0 {
            return Err(DeliveryError::Transport("invalid channel id 0".to_string()));
        }

        let (embed, components) = render(message);
        let mut create = serenity::CreateMessage::new().embed(embed);
        if !components.is_empty() {
            create = create.components(components);
        }

        serenity::ChannelId::new(channel_id)
            .send_message(&self.http, create)
            .await
            .map(|sent| sent.id.get().to_string())
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

/// Build the embed and component rows for a rendered message.
///
/// Text is clipped to Discord's limits. Action buttons whose custom id is too
/// long to send are left out.
pub fn render(
    message: &RenderedMessage,
) -> (serenity::CreateEmbed, Vec<serenity::CreateActionRow>) {
    let mut embed = serenity::CreateEmbed::new().timestamp(serenity::Timestamp::now());
    let mut description = Vec::new();

    for block in &message.blocks {
        match block {
            ContentBlock::Header { title, accent } => {
                embed = embed
                    .title(clip(title, TITLE_LIMIT))
                    .color(accent_colour(*accent));
            }
            ContentBlock::Summary(text) => description.push(text.clone()),
            ContentBlock::Excerpt(text) => {
                embed = embed.field("Excerpt", clip(text, FIELD_VALUE_LIMIT), false)
            }
            ContentBlock::Fields(fields) => {
                for field in fields {
                    embed = embed.field(
                        clip(&field.name, FIELD_NAME_LIMIT),
                        clip(&field.value, FIELD_VALUE_LIMIT),
                        field.inline,
                    );
                }
            }
            ContentBlock::Context(text) => {
                embed = embed.footer(serenity::CreateEmbedFooter::new(clip(text, FOOTER_LIMIT)));
            }
        }
    }
    if !description.is_empty() {
        embed = embed.description(clip(&description.join("\n\n"), DESCRIPTION_LIMIT));
    }

    let rows = message
        .actions
        .iter()
        .map(|row| row.buttons.iter().filter_map(button).collect::<Vec<_>>())
        .filter(|buttons| !buttons.is_empty())
        .map(serenity::CreateActionRow::Buttons)
        .collect();

    (embed, rows)
}

fn button(button: &ActionButton) -> Option<serenity::CreateButton> {
    let created = match &button.kind {
        ButtonKind::Action { custom_id, style } => {
            if custom_id.chars().count() > CUSTOM_ID_LIMIT {
                tracing::warn!(
                    custom_id = %custom_id,
                    "Skipping button with an over-long custom id"
                );
                return None;
            }
            serenity::CreateButton::new(custom_id).style(button_style(*style))
        }
        ButtonKind::Link { url } => serenity::CreateButton::new_link(url),
    };
    Some(
        created
            .label(clip(&button.label, BUTTON_LABEL_LIMIT))
            .disabled(button.disabled),
    )
}

/// Cut `text` to at most `limit` characters, marking the cut with `…`.
fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit - 1).collect();
    out.push('…');
    out
}

fn button_style(style: ButtonStyle) -> serenity::ButtonStyle {
    match style {
        ButtonStyle::Primary => serenity::ButtonStyle::Primary,
        ButtonStyle::Secondary => serenity::ButtonStyle::Secondary,
        ButtonStyle::Success => serenity::ButtonStyle::Success,
        ButtonStyle::Danger => serenity::ButtonStyle::Danger,
    }
}

fn accent_colour(accent: Accent) -> serenity::Colour {
    match accent {
        Accent::Info => serenity::Colour::BLURPLE,
        Accent::Success => serenity::Colour::DARK_GREEN,
        Accent::Warning => serenity::Colour::ORANGE,
        Accent::Danger => serenity::Colour::RED,
        Accent::Neutral => serenity::Colour::LIGHT_GREY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notifications::{ActionRow, Field};

    #[test]
    fn renders_header_fields_and_button_rows() {
        let message = RenderedMessage {
            blocks: vec![
                ContentBlock::Header {
                    title: "User banned".to_string(),
                    accent: Accent::Danger,
                },
                ContentBlock::Summary("alice was banned".to_string()),
                ContentBlock::Fields(vec![Field {
                    name: "Warnings".to_string(),
                    value: "10".to_string(),
                    inline: true,
                }]),
            ],
            actions: vec![
                ActionRow {
                    buttons: vec![ActionButton {
                        label: "Unban".to_string(),
                        kind: ButtonKind::Action {
                            custom_id: "mod:unban:user:alice".to_string(),
                            style: ButtonStyle::Success,
                        },
                        disabled: false,
                    }],
                },
                ActionRow::default(),
            ],
        };

        let (embed, rows) = render(&message);
        let json = serde_json::to_value(&embed).unwrap();
        assert_eq!(json["title"], "User banned");
        assert_eq!(json["color"], serenity::Colour::RED.0);
        assert_eq!(json["description"], "alice was banned");
        assert_eq!(json["fields"][0]["name"], "Warnings");

        // Empty rows are dropped.
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn long_text_is_clipped_to_discord_limits() {
        let message = RenderedMessage {
            blocks: vec![
                ContentBlock::Summary("s".repeat(5000)),
                ContentBlock::Fields(vec![Field {
                    name: "Reason".to_string(),
                    value: "ü".repeat(2000),
                    inline: false,
                }]),
                ContentBlock::Context("c".repeat(3000)),
            ],
            actions: vec![ActionRow {
                buttons: vec![ActionButton {
                    label: "Warn".to_string(),
                    kind: ButtonKind::Action {
                        custom_id: format!("mod:warn:user:{}", "x".repeat(120)),
                        style: ButtonStyle::Secondary,
                    },
                    disabled: false,
                }],
            }],
        };

        let (embed, rows) = render(&message);
        let json = serde_json::to_value(&embed).unwrap();

        let value = json["fields"][0]["value"].as_str().unwrap();
        assert_eq!(value.chars().count(), FIELD_VALUE_LIMIT);
        assert!(value.ends_with('…'));
        let description = json["description"].as_str().unwrap();
        assert_eq!(description.chars().count(), DESCRIPTION_LIMIT);
        let footer = json["footer"]["text"].as_str().unwrap();
        assert_eq!(footer.chars().count(), FOOTER_LIMIT);

        // A button Discord would refuse takes its now-empty row with it.
        assert!(rows.is_empty());
    }
}
