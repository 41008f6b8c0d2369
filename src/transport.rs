//! Chat transport seam: what the bot receives and how it answers.
use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Command, Coordinates, RenderedMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message,
    Callback { callback_id: String },
}

/// Transport independent view of one inbound update.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEvent {
    pub kind: EventKind,
    pub chat_id: i64,
    pub username: Option<String>,
    /// Message the update refers to: the user's message, or the bot message
    /// whose button was pressed.
    pub message_id: i32,
    pub text: Option<String>,
    pub contact_phone: Option<String>,
    pub location: Option<Coordinates>,
    pub callback_data: Option<String>,
    /// Whether `message_id` carries a photo.
    pub has_photo: bool,
}

impl IncomingEvent {
    pub fn is_callback(&self) -> bool {
        matches!(self.kind, EventKind::Callback { .. })
    }

    /// Trimmed text, if any.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim)
    }
}

/// Buttons attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Keyboard {
    #[default]
    None,
    /// Callback buttons, one per command with a code.
    Inline(Vec<Command>),
    /// One-shot reply keyboard asking for the user's phone number.
    RequestContact(String),
    /// One-shot reply keyboard asking for a location.
    RequestLocation(String),
}

impl Keyboard {
    pub fn inline(buttons: &[Command]) -> Self {
        if buttons.is_empty() {
            Keyboard::None
        } else {
            Keyboard::Inline(buttons.to_vec())
        }
    }
}

/// Where a message ended up, for later edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryHandle {
    pub chat_id: i64,
    pub message_id: i32,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a new message to a chat.
    async fn send(
        &self,
        chat_id: i64,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle>;

    /// Answer the message behind `event`.
    async fn reply(
        &self,
        event: &IncomingEvent,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle>;

    /// Replace the message whose button was pressed, falling back to a new
    /// message when it cannot be edited in place.
    async fn update_on_callback(
        &self,
        event: &IncomingEvent,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle>;

    /// Strip inline buttons from a delivered message.
    async fn clear_buttons(&self, handle: &DeliveryHandle) -> Result<()>;

    /// Remove a persistent reply keyboard from the chat.
    async fn clear_reply_keyboard(&self, event: &IncomingEvent) -> Result<()>;
}
