// Notification domain models - events, routing config, and delivery records.
//
// Events are denormalized snapshots: they carry every field the message
// builder needs (including the target's current flags) so rendering never
// has to query state.

use crate::core::moderation::{CommentFlags, MediaInfo, Role, Severity, TargetType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Flat list of every event kind the relay knows about.
///
/// Used for the enabled-kinds allow-list and for category routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CommentPosted,
    CommentEdited,
    CommentReported,
    VoteCast,
    UserWarned,
    UserMuted,
    UserUnmuted,
    UserBanned,
    UserShadowBanned,
    UserUnbanned,
    UserAutoMuted,
    UserAutoBanned,
    UserPromoted,
    UserDemoted,
    CommentPinned,
    CommentUnpinned,
    CommentLocked,
    CommentUnlocked,
    CommentDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::CommentPosted,
        EventKind::CommentEdited,
        EventKind::CommentReported,
        EventKind::VoteCast,
        EventKind::UserWarned,
        EventKind::UserMuted,
        EventKind::UserUnmuted,
        EventKind::UserBanned,
        EventKind::UserShadowBanned,
        EventKind::UserUnbanned,
        EventKind::UserAutoMuted,
        EventKind::UserAutoBanned,
        EventKind::UserPromoted,
        EventKind::UserDemoted,
        EventKind::CommentPinned,
        EventKind::CommentUnpinned,
        EventKind::CommentLocked,
        EventKind::CommentUnlocked,
        EventKind::CommentDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CommentPosted => "comment_posted",
            EventKind::CommentEdited => "comment_edited",
            EventKind::CommentReported => "comment_reported",
            EventKind::VoteCast => "vote_cast",
            EventKind::UserWarned => "user_warned",
            EventKind::UserMuted => "user_muted",
            EventKind::UserUnmuted => "user_unmuted",
            EventKind::UserBanned => "user_banned",
            EventKind::UserShadowBanned => "user_shadow_banned",
            EventKind::UserUnbanned => "user_unbanned",
            EventKind::UserAutoMuted => "user_auto_muted",
            EventKind::UserAutoBanned => "user_auto_banned",
            EventKind::UserPromoted => "user_promoted",
            EventKind::UserDemoted => "user_demoted",
            EventKind::CommentPinned => "comment_pinned",
            EventKind::CommentUnpinned => "comment_unpinned",
            EventKind::CommentLocked => "comment_locked",
            EventKind::CommentUnlocked => "comment_unlocked",
            EventKind::CommentDeleted => "comment_deleted",
        }
    }

    pub fn parse(value: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which family of channels an event goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    PrimaryActivity,
    Engagement,
    Moderation,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::PrimaryActivity => "primary_activity",
            EventCategory::Engagement => "engagement",
            EventCategory::Moderation => "moderation",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user as seen at the moment the event was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub banned: bool,
    pub shadow_banned: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub warning_count: u32,
}

impl UserSnapshot {
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| until > now)
    }
}

/// A comment plus its author, as seen at the moment the event was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSnapshot {
    pub comment_id: String,
    pub author: UserSnapshot,
    pub content: String,
    pub media: Option<MediaInfo>,
    pub flags: CommentFlags,
    pub created_at: DateTime<Utc>,
    /// Set on edit events.
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSnapshot {
    pub comment: CommentSnapshot,
    pub voter_id: String,
    pub voter_name: String,
    /// +1 or -1.
    pub value: i8,
    /// Comment score after this vote.
    pub score: i64,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub comment: CommentSnapshot,
    pub reporter_id: String,
    pub reporter_name: String,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TargetSnapshot {
    User(UserSnapshot),
    Comment(CommentSnapshot),
}

/// Emitted by the policy engine for every successful action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub kind: EventKind,
    pub target: TargetSnapshot,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_role: Role,
    pub reason: Option<String>,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
}

impl ModerationEvent {
    pub fn target_type(&self) -> TargetType {
        match &self.target {
            TargetSnapshot::User(_) => TargetType::User,
            TargetSnapshot::Comment(_) => TargetType::Comment,
        }
    }

    pub fn target_id(&self) -> &str {
        match &self.target {
            TargetSnapshot::User(user) => &user.user_id,
            TargetSnapshot::Comment(comment) => &comment.comment_id,
        }
    }
}

/// Everything that can be pushed through the notification queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NotificationEvent {
    CommentPosted(CommentSnapshot),
    CommentEdited(CommentSnapshot),
    CommentReported(ReportSnapshot),
    VoteCast(VoteSnapshot),
    Moderation(ModerationEvent),
}

impl NotificationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NotificationEvent::CommentPosted(_) => EventKind::CommentPosted,
            NotificationEvent::CommentEdited(_) => EventKind::CommentEdited,
            NotificationEvent::CommentReported(_) => EventKind::CommentReported,
            NotificationEvent::VoteCast(_) => EventKind::VoteCast,
            NotificationEvent::Moderation(event) => event.kind,
        }
    }

    /// Identifier of the underlying entity, when the event has one.
    ///
    /// Records are upserted by this key, so a comment edit replaces the
    /// record of the original post.
    pub fn natural_key(&self) -> Option<String> {
        match self {
            NotificationEvent::CommentPosted(comment)
            | NotificationEvent::CommentEdited(comment) => {
                Some(format!("comment:{}", comment.comment_id))
            }
            NotificationEvent::CommentReported(report) => Some(format!(
                "report:{}:{}",
                report.comment.comment_id, report.reporter_id
            )),
            NotificationEvent::VoteCast(_) | NotificationEvent::Moderation(_) => None,
        }
    }

    /// When the event itself happened, which is what rendered state is judged against.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            NotificationEvent::CommentPosted(comment) => comment.created_at,
            NotificationEvent::CommentEdited(comment) => {
                comment.edited_at.unwrap_or(comment.created_at)
            }
            NotificationEvent::CommentReported(report) => report.reported_at,
            NotificationEvent::VoteCast(vote) => vote.cast_at,
            NotificationEvent::Moderation(event) => event.occurred_at,
        }
    }
}

/// Per-community mapping of categories to destination channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityChannelConfig {
    pub community_id: u64,
    pub channels: BTreeMap<EventCategory, u64>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Partial,
    Failed,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 4] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Sent,
        DeliveryStatus::Partial,
        DeliveryStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Partial => "partial",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<DeliveryStatus> {
        DeliveryStatus::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Aggregate status of one fan-out.
    pub fn aggregate(results: &[DeliveryResult]) -> DeliveryStatus {
        let succeeded = results.iter().filter(|r| r.success).count();
        if succeeded == 0 {
            DeliveryStatus::Failed
        } else if succeeded == results.len() {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Partial
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored outcome of the latest delivery attempt for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub key: String,
    pub event_kind: EventKind,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of sending one message to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub community_id: u64,
    pub channel_id: u64,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// Counters returned by a retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub still_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool) -> DeliveryResult {
        DeliveryResult {
            community_id: 1,
            channel_id: 2,
            success,
            message_id: None,
            error: None,
        }
    }

    #[test]
    fn aggregate_status() {
        assert_eq!(DeliveryStatus::aggregate(&[]), DeliveryStatus::Failed);
        assert_eq!(
            DeliveryStatus::aggregate(&[result(true), result(true)]),
            DeliveryStatus::Sent
        );
        assert_eq!(
            DeliveryStatus::aggregate(&[result(true), result(false)]),
            DeliveryStatus::Partial
        );
        assert_eq!(
            DeliveryStatus::aggregate(&[result(false), result(false)]),
            DeliveryStatus::Failed
        );
    }

    #[test]
    fn names_parse_back() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
            // serde and as_str agree, the allow-list is stored as JSON
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        for status in DeliveryStatus::ALL {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
    }
}
