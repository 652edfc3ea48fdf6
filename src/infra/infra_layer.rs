// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "database.rs"]
pub mod database;

#[path = "moderation/sqlite_moderation_store.rs"]
pub mod moderation;

#[path = "notifications/sqlite_notification_store.rs"]
pub mod notifications;
