// Moderation policy engine - core business logic for moderation actions.
//
// This service handles:
// - Role-gated permission checks (one ordered `Role`, one comparison)
// - State changes for users (warn/mute/ban/...) and comments (pin/lock/delete)
// - Warning escalation (warn -> auto-mute -> auto-ban)
// - Emitting one event per successful action into the notification queue
//
// NO Discord dependencies here - just pure domain logic.

use super::moderation_models::{
    parse_duration_token, ActionParams, AutoEscalation, CommentFlags, CommentRecord,
    ModerationAction, ModerationTarget, RelaySettings, Role, Severity, StateChange, TargetState,
    TargetType, UserModerationState, UserRecord,
};
use crate::core::notifications::{
    CommentSnapshot, EventKind, ModerationEvent, NotificationEvent, NotificationQueue,
    TargetSnapshot, UserSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModerationError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already in state: {0}")]
    AlreadyInState(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Datastore operations the engine needs. Users and comments are owned by
/// the wider platform; the engine only reads them and writes moderation state.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, ModerationError>;

    /// Platform user linked to a Discord account, if any.
    async fn find_user_by_discord_id(
        &self,
        discord_id: u64,
    ) -> Result<Option<UserRecord>, ModerationError>;

    /// Writes the ban and mute fields. The warning counter is left alone.
    async fn save_user_state(
        &self,
        user_id: &str,
        state: &UserModerationState,
    ) -> Result<(), ModerationError>;

    /// Atomically bump the warning counter and return the new total.
    async fn add_warning(&self, user_id: &str) -> Result<u32, ModerationError>;

    async fn set_user_role(&self, user_id: &str, role: Role) -> Result<(), ModerationError>;

    async fn get_comment(&self, comment_id: &str) -> Result<Option<CommentRecord>, ModerationError>;

    async fn save_comment_flags(
        &self,
        comment_id: &str,
        flags: CommentFlags,
    ) -> Result<(), ModerationError>;

    /// Stored settings, or defaults when none were saved yet.
    async fn get_settings(&self) -> Result<RelaySettings, ModerationError>;

    async fn save_settings(&self, settings: &RelaySettings) -> Result<(), ModerationError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Who is performing an action, as far as the engine is concerned.
#[derive(Debug, Clone)]
struct Actor {
    id: String,
    name: String,
    role: Role,
}

pub struct ModerationService<S: ModerationStore> {
    store: S,
    queue: NotificationQueue,
    // Actions on the same target run one at a time.
    target_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: ModerationStore> ModerationService<S> {
    pub fn new(store: S, queue: NotificationQueue) -> Self {
        Self {
            store,
            queue,
            target_locks: DashMap::new(),
        }
    }

    /// Apply `action` to `target` on behalf of the verified `actor_id`.
    ///
    /// On success the new state is persisted and the resulting event(s) are
    /// queued. Queueing is best-effort: a dropped event never undoes the change.
    pub async fn apply_action(
        &self,
        actor_id: &str,
        action: ModerationAction,
        target: &ModerationTarget,
        params: ActionParams,
    ) -> Result<StateChange, ModerationError> {
        if target.id.trim().is_empty() {
            return Err(ModerationError::Validation(
                "target id is empty".to_string(),
            ));
        }
        if action.target_type() != target.target_type {
            return Err(ModerationError::Validation(format!(
                "{} cannot be applied to a {}",
                action,
                target.target_type.as_str()
            )));
        }

        let actor = self.load_actor(actor_id).await?;

        let lock_key = format!("{}:{}", target.target_type.as_str(), target.id);
        let lock = self
            .target_locks
            .entry(lock_key.clone())
            .or_default()
            .clone();
        let guard = lock.lock().await;

        let now = Utc::now();
        let applied = match target.target_type {
            TargetType::User => self.apply_user_action(&actor, action, target, &params, now).await,
            TargetType::Comment => {
                self.apply_comment_action(&actor, action, target, &params, now)
                    .await
            }
        };
        // Enqueue before releasing so events for one target keep their order.
        let applied = applied.map(|(change, events)| {
            let enqueued = events
                .into_iter()
                .map(|event| self.queue.enqueue(NotificationEvent::Moderation(event)))
                .filter(|enqueued| *enqueued)
                .count();
            (change, enqueued)
        });

        drop(guard);
        drop(lock);
        self.target_locks
            .remove_if(&lock_key, |_, lock| Arc::strong_count(lock) == 1);

        let (change, events_enqueued) = applied?;

        tracing::info!(
            actor_id = %actor.id,
            action = %action,
            target_id = %target.id,
            escalation = ?change.escalation,
            "Moderation action applied"
        );

        Ok(StateChange {
            events_enqueued,
            ..change
        })
    }

    /// Fire-and-forget hook for platform events that carry no moderation semantics.
    pub fn enqueue_notification(&self, event: NotificationEvent) -> bool {
        self.queue.enqueue(event)
    }

    pub async fn get_settings(&self) -> Result<RelaySettings, ModerationError> {
        self.store.get_settings().await
    }

    /// Config-level change: super admins and owners only.
    pub async fn update_settings(
        &self,
        actor_id: &str,
        settings: RelaySettings,
    ) -> Result<RelaySettings, ModerationError> {
        let actor = self.load_actor(actor_id).await?;
        if actor.role < Role::SuperAdmin {
            return Err(ModerationError::Permission(format!(
                "changing settings requires {} or higher",
                Role::SuperAdmin
            )));
        }
        if settings.auto_mute_threshold == 0
            || settings.auto_ban_threshold == 0
            || settings.default_mute_duration_hours == 0
        {
            return Err(ModerationError::Validation(
                "thresholds and default mute duration must be at least 1".to_string(),
            ));
        }

        self.store.save_settings(&settings).await?;
        self.queue.apply_settings(settings.clone());
        tracing::info!(actor_id = %actor.id, "Relay settings updated");
        Ok(settings)
    }

    /// Map a Discord account to the platform user that owns it.
    pub async fn find_discord_actor(
        &self,
        discord_id: u64,
    ) -> Result<Option<UserRecord>, ModerationError> {
        self.store.find_user_by_discord_id(discord_id).await
    }

    async fn load_actor(&self, actor_id: &str) -> Result<Actor, ModerationError> {
        // Unknown but authenticated actors are plain users.
        Ok(match self.store.get_user(actor_id).await? {
            Some(user) => Actor {
                id: user.user_id,
                name: user.display_name,
                role: user.role,
            },
            None => Actor {
                id: actor_id.to_string(),
                name: actor_id.to_string(),
                role: Role::User,
            },
        })
    }

    async fn apply_user_action(
        &self,
        actor: &Actor,
        action: ModerationAction,
        target: &ModerationTarget,
        params: &ActionParams,
        now: DateTime<Utc>,
    ) -> Result<(StateChange, Vec<ModerationEvent>), ModerationError> {
        let user = self
            .store
            .get_user(&target.id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("user {}", target.id)))?;
        check_permission(actor, action, user.role, false)?;

        let settings = self.store.get_settings().await?;
        let mut state = user.state.clone();
        let mut role = user.role;
        let mut escalation = None;

        match action {
            ModerationAction::Warn => {
                state.warning_count = self.store.add_warning(&user.user_id).await?;
                escalation = escalate(&mut state, &settings, now);
            }
            ModerationAction::Mute => {
                let duration = match params.duration.as_deref() {
                    Some(raw) => parse_duration_token(raw).unwrap_or_else(|| {
                        tracing::warn!(duration = raw, "Unparsable mute duration, using default");
                        settings.default_mute_duration()
                    }),
                    None => settings.default_mute_duration(),
                };
                state.muted_until = Some(now + duration);
            }
            ModerationAction::Unmute => {
                if !state.is_muted_at(now) {
                    return Err(ModerationError::AlreadyInState(
                        "user is not muted".to_string(),
                    ));
                }
                state.muted_until = None;
            }
            ModerationAction::Ban => {
                if state.banned {
                    return Err(ModerationError::AlreadyInState(
                        "user is already banned".to_string(),
                    ));
                }
                apply_ban(&mut state);
            }
            ModerationAction::ShadowBan => {
                if state.shadow_banned {
                    return Err(ModerationError::AlreadyInState(
                        "user is already shadow-banned".to_string(),
                    ));
                }
                state.shadow_banned = true;
                state.banned = false;
            }
            ModerationAction::Unban => {
                if !state.banned && !state.shadow_banned && state.muted_until.is_none() {
                    return Err(ModerationError::AlreadyInState(
                        "user has no ban or mute to clear".to_string(),
                    ));
                }
                state.banned = false;
                state.shadow_banned = false;
                state.muted_until = None;
            }
            ModerationAction::Promote => {
                let next = role.promoted().ok_or_else(|| {
                    ModerationError::AlreadyInState(
                        "user already holds the highest role".to_string(),
                    )
                })?;
                if !actor.role.outranks(next) {
                    return Err(ModerationError::Permission(format!(
                        "{} cannot promote to {}",
                        actor.role, next
                    )));
                }
                role = next;
            }
            ModerationAction::Demote => {
                role = role.demoted().ok_or_else(|| {
                    ModerationError::AlreadyInState(
                        "user already holds the lowest role".to_string(),
                    )
                })?;
            }
            ModerationAction::Pin
            | ModerationAction::Unpin
            | ModerationAction::Lock
            | ModerationAction::Unlock
            | ModerationAction::Delete => {
                return Err(ModerationError::Validation(format!(
                    "{action} cannot be applied to a user"
                )));
            }
        }

        if role != user.role {
            self.store.set_user_role(&user.user_id, role).await?;
        }
        if state != user.state {
            self.store.save_user_state(&user.user_id, &state).await?;
        }

        let snapshot = TargetSnapshot::User(user_snapshot(&user, role, &state));
        let mut events = vec![self.event(
            actor,
            action.event_kind(),
            snapshot.clone(),
            params.reason.clone(),
            params.severity.unwrap_or_else(|| action.default_severity()),
            now,
        )];
        if let Some(escalated) = escalation {
            let (kind, severity) = match escalated {
                AutoEscalation::Muted { .. } => (EventKind::UserAutoMuted, Severity::Medium),
                AutoEscalation::Banned => (EventKind::UserAutoBanned, Severity::High),
            };
            events.push(self.event(
                actor,
                kind,
                snapshot,
                Some(format!("Reached {} warnings", state.warning_count)),
                severity,
                now,
            ));
        }

        let change = StateChange {
            action,
            target: target.clone(),
            previous: TargetState::User {
                role: user.role,
                state: user.state.clone(),
            },
            current: TargetState::User { role, state },
            escalation,
            events_enqueued: 0,
        };
        Ok((change, events))
    }

    async fn apply_comment_action(
        &self,
        actor: &Actor,
        action: ModerationAction,
        target: &ModerationTarget,
        params: &ActionParams,
        now: DateTime<Utc>,
    ) -> Result<(StateChange, Vec<ModerationEvent>), ModerationError> {
        let comment = self
            .store
            .get_comment(&target.id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("comment {}", target.id)))?;
        let author = self.store.get_user(&comment.author_id).await?;
        let author_role = author.as_ref().map(|a| a.role).unwrap_or(Role::User);
        check_permission(actor, action, author_role, comment.author_id == actor.id)?;

        let mut flags = comment.flags;
        if flags.deleted {
            let what = if action == ModerationAction::Delete {
                "comment is already deleted"
            } else {
                "comment is deleted"
            };
            return Err(ModerationError::AlreadyInState(what.to_string()));
        }

        match action {
            ModerationAction::Pin => {
                set_flag(&mut flags.pinned, true, "comment is already pinned")?
            }
            ModerationAction::Unpin => {
                set_flag(&mut flags.pinned, false, "comment is not pinned")?
            }
            ModerationAction::Lock => {
                set_flag(&mut flags.locked, true, "comment is already locked")?
            }
            ModerationAction::Unlock => {
                set_flag(&mut flags.locked, false, "comment is not locked")?
            }
            ModerationAction::Delete => flags.deleted = true,
            _ => {
                return Err(ModerationError::Validation(format!(
                    "{action} cannot be applied to a comment"
                )));
            }
        }

        self.store.save_comment_flags(&comment.comment_id, flags).await?;

        let snapshot = TargetSnapshot::Comment(comment_snapshot(&comment, author.as_ref(), flags));
        let event = self.event(
            actor,
            action.event_kind(),
            snapshot,
            params.reason.clone(),
            params.severity.unwrap_or_else(|| action.default_severity()),
            now,
        );

        let change = StateChange {
            action,
            target: target.clone(),
            previous: TargetState::Comment(comment.flags),
            current: TargetState::Comment(flags),
            escalation: None,
            events_enqueued: 0,
        };
        Ok((change, vec![event]))
    }

    fn event(
        &self,
        actor: &Actor,
        kind: EventKind,
        target: TargetSnapshot,
        reason: Option<String>,
        severity: Severity,
        occurred_at: DateTime<Utc>,
    ) -> ModerationEvent {
        ModerationEvent {
            kind,
            target,
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            actor_role: actor.role,
            reason,
            severity,
            occurred_at,
        }
    }
}

/// The single permission check used for every action.
///
/// Authors deleting their own comment skip both the role floor and the
/// hierarchy; everything else needs the action's minimum role and a role
/// strictly above the target's.
fn check_permission(
    actor: &Actor,
    action: ModerationAction,
    target_role: Role,
    is_own_content: bool,
) -> Result<(), ModerationError> {
    if is_own_content && action == ModerationAction::Delete {
        return Ok(());
    }
    let required = action.required_role();
    if actor.role < required {
        return Err(ModerationError::Permission(format!(
            "{action} requires {required} or higher"
        )));
    }
    if !actor.role.outranks(target_role) {
        return Err(ModerationError::Permission(format!(
            "{} cannot {} a {}",
            actor.role, action, target_role
        )));
    }
    Ok(())
}

/// Apply threshold escalation after a warning. Ban wins over mute.
pub fn escalate(
    state: &mut UserModerationState,
    settings: &RelaySettings,
    now: DateTime<Utc>,
) -> Option<AutoEscalation> {
    if state.warning_count >= settings.auto_ban_threshold && !state.banned {
        apply_ban(state);
        Some(AutoEscalation::Banned)
    } else if state.warning_count >= settings.auto_mute_threshold
        && !state.banned
        && !state.is_muted_at(now)
    {
        let until = now + settings.default_mute_duration();
        state.muted_until = Some(until);
        Some(AutoEscalation::Muted { until })
    } else {
        None
    }
}

/// A ban supersedes both a shadow-ban and a running mute.
fn apply_ban(state: &mut UserModerationState) {
    state.banned = true;
    state.shadow_banned = false;
    state.muted_until = None;
}

fn set_flag(flag: &mut bool, value: bool, conflict: &str) -> Result<(), ModerationError> {
    if *flag == value {
        return Err(ModerationError::AlreadyInState(conflict.to_string()));
    }
    *flag = value;
    Ok(())
}

fn user_snapshot(user: &UserRecord, role: Role, state: &UserModerationState) -> UserSnapshot {
    UserSnapshot {
        user_id: user.user_id.clone(),
        display_name: user.display_name.clone(),
        role,
        banned: state.banned,
        shadow_banned: state.shadow_banned,
        muted_until: state.muted_until,
        warning_count: state.warning_count,
    }
}

fn comment_snapshot(
    comment: &CommentRecord,
    author: Option<&UserRecord>,
    flags: CommentFlags,
) -> CommentSnapshot {
    let author = match author {
        Some(user) => user_snapshot(user, user.role, &user.state),
        None => UserSnapshot {
            user_id: comment.author_id.clone(),
            display_name: comment.author_id.clone(),
            role: Role::User,
            banned: false,
            shadow_banned: false,
            muted_until: None,
            warning_count: 0,
        },
    };
    CommentSnapshot {
        comment_id: comment.comment_id.clone(),
        author,
        content: comment.content.clone(),
        media: comment.media.clone(),
        flags,
        created_at: comment.created_at,
        edited_at: None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
