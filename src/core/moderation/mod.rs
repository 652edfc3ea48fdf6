// Core moderation module - role-gated actions and warning escalation.
// Following the same pattern as the notifications module.

pub mod moderation_models;
pub mod moderation_service;

pub use moderation_models::*;
pub use moderation_service::*;
