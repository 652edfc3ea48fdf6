// Discord layer - commands, message transport and event handlers.

#[path = "notifications/commands.rs"]
pub mod commands;

#[path = "moderation/interactions.rs"]
pub mod interactions;

#[path = "notifications/discord_sender.rs"]
pub mod sender;

use crate::core::moderation::ModerationService;
use crate::core::notifications::NotificationQueue;
use crate::infra::moderation::SqliteModerationStore;
use crate::infra::notifications::SqliteNotificationStore;
use dashmap::DashSet;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands and event handlers.
pub struct Data {
    pub moderation: Arc<ModerationService<SqliteModerationStore>>,
    pub notifications: SqliteNotificationStore,
    pub queue: NotificationQueue,
    /// Button clicks currently being processed, keyed by message and custom id.
    pub in_flight: DashSet<String>,
}
