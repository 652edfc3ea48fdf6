// Message builder - turns a `NotificationEvent` into a channel-agnostic message.
//
// Pure: no I/O, no clock. Everything it renders comes from the event payload,
// including the button states (a "Ban" button is disabled when the snapshot
// says the author is already banned).

use super::notification_models::{
    CommentSnapshot, EventKind, ModerationEvent, NotificationEvent, ReportSnapshot,
    TargetSnapshot, UserSnapshot, VoteSnapshot,
};
use crate::core::moderation::{MediaInfo, ModerationAction, ModerationTarget, Severity, TargetType};
use chrono::{DateTime, Utc};

/// Longest excerpt we render, ellipsis included.
pub const EXCERPT_CHAR_LIMIT: usize = 300;
/// Chat platforms cap interactive components per row and rows per message.
pub const MAX_BUTTONS_PER_ROW: usize = 5;
pub const MAX_ACTION_ROWS: usize = 5;

const CUSTOM_ID_PREFIX: &str = "mod";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    Info,
    Success,
    Warning,
    Danger,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Field {
    fn inline(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline: true,
        }
    }

    fn block(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Header { title: String, accent: Accent },
    Summary(String),
    Excerpt(String),
    Fields(Vec<Field>),
    Context(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonKind {
    /// Triggers a moderation action through the interaction handler.
    Action { custom_id: String, style: ButtonStyle },
    /// Opens a URL.
    Link { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub kind: ButtonKind,
    pub disabled: bool,
}

impl ActionButton {
    fn link(label: &str, url: String) -> Self {
        Self {
            label: label.to_string(),
            kind: ButtonKind::Link { url },
            disabled: false,
        }
    }

    fn action(
        label: &str,
        action: ModerationAction,
        target: &ModerationTarget,
        style: ButtonStyle,
        disabled: bool,
    ) -> Self {
        Self {
            label: label.to_string(),
            kind: ButtonKind::Action {
                custom_id: action_custom_id(action, target),
                style,
            },
            disabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRow {
    pub buttons: Vec<ActionButton>,
}

/// Channel-agnostic rendered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedMessage {
    pub blocks: Vec<ContentBlock>,
    pub actions: Vec<ActionRow>,
}

impl RenderedMessage {
    pub fn header(&self) -> Option<(&str, Accent)> {
        self.blocks.iter().find_map(|block| match block {
            ContentBlock::Header { title, accent } => Some((title.as_str(), *accent)),
            _ => None,
        })
    }

    pub fn buttons(&self) -> impl Iterator<Item = &ActionButton> {
        self.actions.iter().flat_map(|row| row.buttons.iter())
    }
}

/// `mod:<action>:<target-type>:<target-id>`
pub fn action_custom_id(action: ModerationAction, target: &ModerationTarget) -> String {
    format!(
        "{}:{}:{}:{}",
        CUSTOM_ID_PREFIX,
        action.as_str(),
        target.target_type.as_str(),
        target.id
    )
}

/// Inverse of [`action_custom_id`]. Target ids may themselves contain `:`.
pub fn parse_action_custom_id(custom_id: &str) -> Option<(ModerationAction, ModerationTarget)> {
    let mut parts = custom_id.splitn(4, ':');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let action = ModerationAction::parse(parts.next()?)?;
    let target_type = TargetType::parse(parts.next()?)?;
    let id = parts.next()?;
    if id.is_empty() {
        return None;
    }
    Some((
        action,
        ModerationTarget {
            target_type,
            id: id.to_string(),
        },
    ))
}

/// Cap `content` at [`EXCERPT_CHAR_LIMIT`] characters, ellipsis included.
pub fn excerpt(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return "*No content*".to_string();
    }
    if trimmed.chars().count() <= EXCERPT_CHAR_LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(EXCERPT_CHAR_LIMIT - 1).collect();
    out.push('…');
    out
}

#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Base URL of the discussion site, used for deep links.
    pub site_url: String,
}

pub struct MessageBuilder {
    options: BuilderOptions,
}

impl MessageBuilder {
    pub fn new(options: BuilderOptions) -> Self {
        Self { options }
    }

    pub fn build(&self, event: &NotificationEvent) -> RenderedMessage {
        let (title, accent) = header_for(event);
        let occurred_at = event.occurred_at();
        let mut blocks = vec![ContentBlock::Header {
            title: title.to_string(),
            accent,
        }];

        let actions = match event {
            NotificationEvent::CommentPosted(comment) => {
                blocks.extend(self.comment_blocks(
                    format!("**{}** {}", comment.author.display_name, posted_phrase(comment)),
                    comment,
                    Vec::new(),
                ));
                self.comment_actions(comment, occurred_at)
            }
            NotificationEvent::CommentEdited(comment) => {
                blocks.extend(self.comment_blocks(
                    format!("**{}** edited their comment", comment.author.display_name),
                    comment,
                    Vec::new(),
                ));
                self.comment_actions(comment, occurred_at)
            }
            NotificationEvent::CommentReported(report) => {
                blocks.extend(self.report_blocks(report));
                self.comment_actions(&report.comment, occurred_at)
            }
            NotificationEvent::VoteCast(vote) => {
                blocks.extend(self.vote_blocks(vote));
                into_rows(vec![vec![self.comment_link(&vote.comment)]])
            }
            NotificationEvent::Moderation(moderation) => {
                blocks.extend(self.moderation_blocks(moderation));
                self.moderation_actions(moderation)
            }
        };

        RenderedMessage { blocks, actions }
    }

    fn comment_blocks(
        &self,
        summary: String,
        comment: &CommentSnapshot,
        mut fields: Vec<Field>,
    ) -> Vec<ContentBlock> {
        if let Some(media) = &comment.media {
            fields.insert(0, Field::inline("Media", media_label(media)));
        }
        fields.push(Field::inline("Author", user_label(&comment.author)));

        vec![
            ContentBlock::Summary(summary),
            ContentBlock::Excerpt(excerpt(&comment.content)),
            ContentBlock::Fields(fields),
            ContentBlock::Context(format!("Comment ID: {}", comment.comment_id)),
        ]
    }

    fn report_blocks(&self, report: &ReportSnapshot) -> Vec<ContentBlock> {
        self.comment_blocks(
            format!(
                "**{}** reported a comment by **{}**",
                report.reporter_name, report.comment.author.display_name
            ),
            &report.comment,
            vec![Field::block("Reason", report.reason.clone())],
        )
    }

    fn vote_blocks(&self, vote: &VoteSnapshot) -> Vec<ContentBlock> {
        let verb = if vote.value >= 0 { "upvoted" } else { "downvoted" };
        self.comment_blocks(
            format!(
                "**{}** {} a comment by **{}**",
                vote.voter_name, verb, vote.comment.author.display_name
            ),
            &vote.comment,
            vec![Field::inline("Score", vote.score.to_string())],
        )
    }

    fn moderation_blocks(&self, event: &ModerationEvent) -> Vec<ContentBlock> {
        let mut fields = Vec::new();
        if let Some(reason) = event.reason.as_deref().filter(|r| !r.trim().is_empty()) {
            fields.push(Field::block("Reason", reason));
        }
        fields.push(Field::inline("Severity", severity_label(event.severity)));

        let subject = match &event.target {
            TargetSnapshot::User(user) => {
                fields.push(Field::inline("Warnings", user.warning_count.to_string()));
                if let Some(until) = user.muted_until.filter(|u| *u > event.occurred_at) {
                    fields.push(Field::inline("Muted until", format_time(until)));
                }
                fields.push(Field::inline("Role", user.role.to_string()));
                format!("**{}**", user.display_name)
            }
            TargetSnapshot::Comment(comment) => {
                if let Some(media) = &comment.media {
                    fields.push(Field::inline("Media", media_label(media)));
                }
                fields.push(Field::inline("Author", user_label(&comment.author)));
                format!("a comment by **{}**", comment.author.display_name)
            }
        };

        let mut blocks = vec![ContentBlock::Summary(format!(
            "**{}** ({}) {} {}",
            event.actor_name,
            event.actor_role,
            verb_for(event.kind),
            subject
        ))];
        if let TargetSnapshot::Comment(comment) = &event.target {
            blocks.push(ContentBlock::Excerpt(excerpt(&comment.content)));
        }
        blocks.push(ContentBlock::Fields(fields));
        blocks.push(ContentBlock::Context(format!(
            "{} {} · {}",
            event.target_type().as_str(),
            event.target_id(),
            format_time(event.occurred_at)
        )));
        blocks
    }

    fn comment_link(&self, comment: &CommentSnapshot) -> ActionButton {
        ActionButton::link(
            "Open comment",
            format!(
                "{}/comments/{}",
                self.options.site_url.trim_end_matches('/'),
                comment.comment_id
            ),
        )
    }

    fn profile_link(&self, user: &UserSnapshot) -> ActionButton {
        ActionButton::link(
            "View profile",
            format!(
                "{}/users/{}",
                self.options.site_url.trim_end_matches('/'),
                user.user_id
            ),
        )
    }

    fn comment_actions(&self, comment: &CommentSnapshot, now: DateTime<Utc>) -> Vec<ActionRow> {
        into_rows(vec![
            vec![self.comment_link(comment), self.profile_link(&comment.author)],
            comment_buttons(comment),
            user_buttons(&comment.author, now),
        ])
    }

    fn moderation_actions(&self, event: &ModerationEvent) -> Vec<ActionRow> {
        match &event.target {
            TargetSnapshot::User(user) => into_rows(vec![
                vec![self.profile_link(user)],
                user_buttons(user, event.occurred_at),
            ]),
            TargetSnapshot::Comment(comment) => self.comment_actions(comment, event.occurred_at),
        }
    }
}

/// Pin/lock/delete buttons reflecting the comment's current flags.
fn comment_buttons(comment: &CommentSnapshot) -> Vec<ActionButton> {
    let target = ModerationTarget::comment(comment.comment_id.clone());
    let deleted = comment.flags.deleted;

    let pin = if comment.flags.pinned {
        ActionButton::action(
            "Unpin",
            ModerationAction::Unpin,
            &target,
            ButtonStyle::Secondary,
            deleted,
        )
    } else {
        ActionButton::action(
            "Pin",
            ModerationAction::Pin,
            &target,
            ButtonStyle::Primary,
            deleted,
        )
    };
    let lock = if comment.flags.locked {
        ActionButton::action(
            "Unlock",
            ModerationAction::Unlock,
            &target,
            ButtonStyle::Secondary,
            deleted,
        )
    } else {
        ActionButton::action(
            "Lock",
            ModerationAction::Lock,
            &target,
            ButtonStyle::Primary,
            deleted,
        )
    };
    let delete = ActionButton::action(
        if deleted { "Deleted" } else { "Delete" },
        ModerationAction::Delete,
        &target,
        ButtonStyle::Danger,
        deleted,
    );

    vec![pin, lock, delete]
}

/// Warn/mute/ban buttons reflecting the user's current state.
fn user_buttons(user: &UserSnapshot, now: DateTime<Utc>) -> Vec<ActionButton> {
    let target = ModerationTarget::user(user.user_id.clone());
    let mut buttons = vec![ActionButton::action(
        "Warn",
        ModerationAction::Warn,
        &target,
        ButtonStyle::Secondary,
        user.banned,
    )];

    buttons.push(if user.is_muted_at(now) {
        ActionButton::action(
            "Unmute",
            ModerationAction::Unmute,
            &target,
            ButtonStyle::Success,
            false,
        )
    } else {
        ActionButton::action(
            "Mute",
            ModerationAction::Mute,
            &target,
            ButtonStyle::Secondary,
            user.banned,
        )
    });

    buttons.push(ActionButton::action(
        if user.banned { "Banned" } else { "Ban" },
        ModerationAction::Ban,
        &target,
        ButtonStyle::Danger,
        user.banned,
    ));
    buttons.push(ActionButton::action(
        if user.shadow_banned { "Shadow-banned" } else { "Shadow-ban" },
        ModerationAction::ShadowBan,
        &target,
        ButtonStyle::Danger,
        user.shadow_banned,
    ));

    if user.banned || user.shadow_banned {
        buttons.push(ActionButton::action(
            "Unban",
            ModerationAction::Unban,
            &target,
            ButtonStyle::Success,
            false,
        ));
    }

    buttons
}

/// Lay groups out as rows: each group starts a new row, long groups wrap,
/// and anything past the row cap is dropped.
fn into_rows(groups: Vec<Vec<ActionButton>>) -> Vec<ActionRow> {
    groups
        .into_iter()
        .filter(|group| !group.is_empty())
        .flat_map(|group| {
            group
                .chunks(MAX_BUTTONS_PER_ROW)
                .map(|chunk| ActionRow {
                    buttons: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .take(MAX_ACTION_ROWS)
        .collect()
}

fn header_for(event: &NotificationEvent) -> (&'static str, Accent) {
    match event {
        NotificationEvent::VoteCast(vote) if vote.value < 0 => ("👎 Downvote", Accent::Neutral),
        NotificationEvent::Moderation(moderation) if moderation.severity == Severity::High => {
            (kind_title(moderation.kind), Accent::Danger)
        }
        _ => (kind_title(event.kind()), kind_accent(event.kind())),
    }
}

fn kind_title(kind: EventKind) -> &'static str {
    match kind {
        EventKind::CommentPosted => "💬 New comment",
        EventKind::CommentEdited => "✏️ Comment edited",
        EventKind::CommentReported => "🚩 Comment reported",
        EventKind::VoteCast => "👍 Upvote",
        EventKind::UserWarned => "⚠️ User warned",
        EventKind::UserMuted => "🔇 User muted",
        EventKind::UserUnmuted => "🔊 User unmuted",
        EventKind::UserBanned => "⛔ User banned",
        EventKind::UserShadowBanned => "👻 User shadow-banned",
        EventKind::UserUnbanned => "✅ User unbanned",
        EventKind::UserAutoMuted => "🤖 User auto-muted",
        EventKind::UserAutoBanned => "🤖 User auto-banned",
        EventKind::UserPromoted => "⬆️ User promoted",
        EventKind::UserDemoted => "⬇️ User demoted",
        EventKind::CommentPinned => "📌 Comment pinned",
        EventKind::CommentUnpinned => "📍 Comment unpinned",
        EventKind::CommentLocked => "🔒 Comment locked",
        EventKind::CommentUnlocked => "🔓 Comment unlocked",
        EventKind::CommentDeleted => "🗑️ Comment deleted",
    }
}

fn kind_accent(kind: EventKind) -> Accent {
    match kind {
        EventKind::CommentPosted | EventKind::UserPromoted | EventKind::CommentPinned => {
            Accent::Info
        }
        EventKind::VoteCast
        | EventKind::UserUnmuted
        | EventKind::UserUnbanned
        | EventKind::CommentUnlocked => Accent::Success,
        EventKind::CommentReported
        | EventKind::UserWarned
        | EventKind::UserMuted
        | EventKind::UserAutoMuted
        | EventKind::CommentLocked => Accent::Warning,
        EventKind::UserBanned
        | EventKind::UserShadowBanned
        | EventKind::UserAutoBanned
        | EventKind::CommentDeleted => Accent::Danger,
        EventKind::CommentEdited | EventKind::UserDemoted | EventKind::CommentUnpinned => {
            Accent::Neutral
        }
    }
}

fn verb_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::UserWarned => "warned",
        EventKind::UserMuted => "muted",
        EventKind::UserUnmuted => "unmuted",
        EventKind::UserBanned => "banned",
        EventKind::UserShadowBanned => "shadow-banned",
        EventKind::UserUnbanned => "unbanned",
        EventKind::UserAutoMuted => "triggered an auto-mute for",
        EventKind::UserAutoBanned => "triggered an auto-ban for",
        EventKind::UserPromoted => "promoted",
        EventKind::UserDemoted => "demoted",
        EventKind::CommentPinned => "pinned",
        EventKind::CommentUnpinned => "unpinned",
        EventKind::CommentLocked => "locked",
        EventKind::CommentUnlocked => "unlocked",
        EventKind::CommentDeleted => "deleted",
        EventKind::CommentPosted => "posted",
        EventKind::CommentEdited => "edited",
        EventKind::CommentReported => "reported",
        EventKind::VoteCast => "voted on",
    }
}

fn posted_phrase(comment: &CommentSnapshot) -> String {
    match &comment.media {
        Some(media) => format!("commented on **{}**", media.title),
        None => "posted a comment".to_string(),
    }
}

fn media_label(media: &MediaInfo) -> String {
    let mut label = media.title.clone();
    if let Some(media_type) = &media.media_type {
        label.push_str(&format!(" ({media_type})"));
    }
    if let Some(episode) = media.episode {
        label.push_str(&format!(" · Episode {episode}"));
    }
    label
}

fn user_label(user: &UserSnapshot) -> String {
    format!("{} (`{}`)", user.display_name, user.user_id)
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "Low",
        Severity::Medium => "Medium",
        Severity::High => "High",
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}
