// Moderation domain models - roles, actions, and per-user/per-comment state.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer turns button clicks into `ModerationAction`s and the
// notification pipeline renders the resulting events.

use crate::core::notifications::EventKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Platform roles, ordered from least to most privileged.
///
/// The derived `Ord` is the single source of truth for hierarchy checks:
/// `Role::User < Role::Moderator < Role::Admin < Role::SuperAdmin < Role::Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Moderator,
    Admin,
    SuperAdmin,
    Owner,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::User,
        Role::Moderator,
        Role::Admin,
        Role::SuperAdmin,
        Role::Owner,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }

    /// An actor may only act on targets strictly below them.
    pub fn outranks(self, target: Role) -> bool {
        self > target
    }

    /// Next role up, `None` for the owner.
    pub fn promoted(self) -> Option<Role> {
        Role::ALL.get(self.level() as usize + 1).copied()
    }

    /// Next role down, `None` for a plain user.
    pub fn demoted(self) -> Option<Role> {
        (self.level() as usize)
            .checked_sub(1)
            .and_then(|idx| Role::ALL.get(idx).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
            Role::Owner => "owner",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a moderation event is. Drives header colour in notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// What kind of entity an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    User,
    Comment,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::User => "user",
            TargetType::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Option<TargetType> {
        match value {
            "user" => Some(TargetType::User),
            "comment" => Some(TargetType::Comment),
            _ => None,
        }
    }
}

/// The entity a moderation action is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationTarget {
    pub target_type: TargetType,
    pub id: String,
}

impl ModerationTarget {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::User,
            id: id.into(),
        }
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Comment,
            id: id.into(),
        }
    }
}

/// Every action the policy engine knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Warn,
    Mute,
    Unmute,
    Ban,
    ShadowBan,
    Unban,
    Promote,
    Demote,
    Pin,
    Unpin,
    Lock,
    Unlock,
    Delete,
}

impl ModerationAction {
    pub const ALL: [ModerationAction; 13] = [
        ModerationAction::Warn,
        ModerationAction::Mute,
        ModerationAction::Unmute,
        ModerationAction::Ban,
        ModerationAction::ShadowBan,
        ModerationAction::Unban,
        ModerationAction::Promote,
        ModerationAction::Demote,
        ModerationAction::Pin,
        ModerationAction::Unpin,
        ModerationAction::Lock,
        ModerationAction::Unlock,
        ModerationAction::Delete,
    ];

    /// Minimum role an actor needs before hierarchy is even considered.
    pub fn required_role(self) -> Role {
        match self {
            ModerationAction::Warn
            | ModerationAction::Mute
            | ModerationAction::Unmute
            | ModerationAction::Pin
            | ModerationAction::Unpin
            | ModerationAction::Lock
            | ModerationAction::Unlock
            | ModerationAction::Delete => Role::Moderator,
            ModerationAction::Ban
            | ModerationAction::ShadowBan
            | ModerationAction::Unban
            | ModerationAction::Promote
            | ModerationAction::Demote => Role::Admin,
        }
    }

    pub fn target_type(self) -> TargetType {
        match self {
            ModerationAction::Pin
            | ModerationAction::Unpin
            | ModerationAction::Lock
            | ModerationAction::Unlock
            | ModerationAction::Delete => TargetType::Comment,
            _ => TargetType::User,
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            ModerationAction::Ban | ModerationAction::ShadowBan | ModerationAction::Delete => {
                Severity::High
            }
            ModerationAction::Warn | ModerationAction::Mute | ModerationAction::Lock => {
                Severity::Medium
            }
            _ => Severity::Low,
        }
    }

    /// Event kind emitted when this action succeeds.
    pub fn event_kind(self) -> EventKind {
        match self {
            ModerationAction::Warn => EventKind::UserWarned,
            ModerationAction::Mute => EventKind::UserMuted,
            ModerationAction::Unmute => EventKind::UserUnmuted,
            ModerationAction::Ban => EventKind::UserBanned,
            ModerationAction::ShadowBan => EventKind::UserShadowBanned,
            ModerationAction::Unban => EventKind::UserUnbanned,
            ModerationAction::Promote => EventKind::UserPromoted,
            ModerationAction::Demote => EventKind::UserDemoted,
            ModerationAction::Pin => EventKind::CommentPinned,
            ModerationAction::Unpin => EventKind::CommentUnpinned,
            ModerationAction::Lock => EventKind::CommentLocked,
            ModerationAction::Unlock => EventKind::CommentUnlocked,
            ModerationAction::Delete => EventKind::CommentDeleted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Warn => "warn",
            ModerationAction::Mute => "mute",
            ModerationAction::Unmute => "unmute",
            ModerationAction::Ban => "ban",
            ModerationAction::ShadowBan => "shadow_ban",
            ModerationAction::Unban => "unban",
            ModerationAction::Promote => "promote",
            ModerationAction::Demote => "demote",
            ModerationAction::Pin => "pin",
            ModerationAction::Unpin => "unpin",
            ModerationAction::Lock => "lock",
            ModerationAction::Unlock => "unlock",
            ModerationAction::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<ModerationAction> {
        ModerationAction::ALL
            .into_iter()
            .find(|a| a.as_str() == value)
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional parameters supplied with an action.
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    pub reason: Option<String>,
    /// Compact duration token such as `3d`; only read by `Mute`.
    pub duration: Option<String>,
    pub severity: Option<Severity>,
}

/// Long-lived moderation state of one user.
///
/// `banned` and `shadow_banned` are never both set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModerationState {
    pub banned: bool,
    pub shadow_banned: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub warning_count: u32,
}

impl UserModerationState {
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| until > now)
    }
}

/// A user as the datastore knows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub state: UserModerationState,
}

/// Toggleable flags of a single comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentFlags {
    pub pinned: bool,
    pub locked: bool,
    pub deleted: bool,
}

/// Subject the comment was posted under (an anime, an episode...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub media_id: String,
    pub title: String,
    pub media_type: Option<String>,
    pub episode: Option<u32>,
}

/// A comment as the datastore knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub comment_id: String,
    pub author_id: String,
    pub content: String,
    pub media: Option<MediaInfo>,
    pub flags: CommentFlags,
    pub created_at: DateTime<Utc>,
}

/// Persisted moderation and notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    pub auto_mute_threshold: u32,
    pub auto_ban_threshold: u32,
    pub default_mute_duration_hours: u32,
    pub notifications_enabled: bool,
    pub enabled_event_kinds: BTreeSet<EventKind>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            auto_mute_threshold: 5,
            auto_ban_threshold: 10,
            default_mute_duration_hours: 24,
            notifications_enabled: true,
            enabled_event_kinds: EventKind::ALL.into_iter().collect(),
        }
    }
}

impl RelaySettings {
    pub fn default_mute_duration(&self) -> Duration {
        Duration::hours(i64::from(self.default_mute_duration_hours))
    }

    /// Whether an event of `kind` should be queued at all.
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.notifications_enabled && self.enabled_event_kinds.contains(&kind)
    }
}

/// Snapshot of the target before and after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    User {
        role: Role,
        state: UserModerationState,
    },
    Comment(CommentFlags),
}

/// Automatic follow-up applied after a warning crossed a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoEscalation {
    Muted { until: DateTime<Utc> },
    Banned,
}

/// Result of a successful `apply_action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub action: ModerationAction,
    pub target: ModerationTarget,
    pub previous: TargetState,
    pub current: TargetState,
    pub escalation: Option<AutoEscalation>,
    /// How many events made it past the enqueue filter.
    pub events_enqueued: usize,
}

/// Parse a compact duration token: digits followed by `h`, `d` or `w`.
///
/// Returns `None` for anything else, including zero and overflowing values.
pub fn parse_duration_token(token: &str) -> Option<Duration> {
    let token = token.trim().to_ascii_lowercase();
    let unit = token.chars().last()?;
    let digits = &token[..token.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let amount: i64 = digits.parse().ok()?;
    if amount == 0 {
        return None;
    }
    let hours = match unit {
        'h' => amount,
        'd' => amount.checked_mul(24)?,
        'w' => amount.checked_mul(24 * 7)?,
        _ => return None,
    };
    // chrono panics past ~i64::MAX milliseconds
    if hours > 24 * 365 * 100 {
        return None;
    }
    Some(Duration::hours(hours))
}
