// Core notification module - queue, dispatcher, routing and rendering.
// Platform-agnostic: the Discord layer only supplies a `MessageSender`.

pub mod channel_router;
pub mod dispatcher;
pub mod message_builder;
pub mod notification_models;
pub mod notification_queue;

pub use dispatcher::*;
pub use message_builder::*;
pub use notification_models::*;
pub use notification_queue::*;
