//! Telegram adapter: update conversion, dispatcher endpoints and a
//! `Transport` over `teloxide::Bot`.
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia,
    InputMediaPhoto, KeyboardButton, KeyboardMarkup, KeyboardRemove, MessageId, ParseMode,
    ReplyMarkup,
};
use teloxide::RequestError;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::handlers::{self, BotContext};
use crate::model::{Command, Coordinates, RenderedMessage};
use crate::transport::{DeliveryHandle, EventKind, IncomingEvent, Keyboard, Transport};

const KEYBOARD_REMOVAL_TEXT: &str = "⏳";

fn transport_err(err: RequestError) -> Error {
    Error::Transport(err.to_string())
}

/// View of a user message. Contacts are only accepted from their owner.
pub fn event_from_message(msg: &Message) -> IncomingEvent {
    let sender = msg.from().map(|user| user.id);
    let contact_phone = msg
        .contact()
        .filter(|contact| match (contact.user_id, sender) {
            (Some(owner), Some(sender)) => owner == sender,
            _ => true,
        })
        .map(|contact| contact.phone_number.clone());

    IncomingEvent {
        kind: EventKind::Message,
        chat_id: msg.chat.id.0,
        username: msg.chat.username().map(str::to_owned),
        message_id: msg.id.0,
        text: msg.text().map(str::to_owned),
        contact_phone,
        location: msg.location().map(|location| Coordinates {
            latitude: location.latitude,
            longitude: location.longitude,
        }),
        callback_data: None,
        has_photo: msg.photo().is_some(),
    }
}

/// View of a button press on one of the bot's messages.
pub fn event_from_callback(query: &CallbackQuery) -> Option<IncomingEvent> {
    let msg = query.message.as_ref()?;
    Some(IncomingEvent {
        kind: EventKind::Callback {
            callback_id: query.id.clone(),
        },
        chat_id: msg.chat.id.0,
        username: msg.chat.username().map(str::to_owned),
        message_id: msg.id.0,
        text: None,
        contact_phone: None,
        location: None,
        callback_data: query.data.clone(),
        has_photo: msg.photo().is_some(),
    })
}

pub async fn on_message(
    msg: Message,
    ctx: Arc<BotContext>,
    transport: Arc<TelegramTransport>,
) -> ResponseResult<()> {
    let event = event_from_message(&msg);
    if let Err(err) = handlers::handle_event(&ctx, transport.as_ref(), &event).await {
        error!(?err, chat_id = event.chat_id, "failed to handle message");
    }
    respond(())
}

pub async fn on_callback(
    query: CallbackQuery,
    ctx: Arc<BotContext>,
    transport: Arc<TelegramTransport>,
) -> ResponseResult<()> {
    if let Some(event) = event_from_callback(&query) {
        if let Err(err) = handlers::handle_event(&ctx, transport.as_ref(), &event).await {
            error!(?err, chat_id = event.chat_id, "failed to handle callback");
        }
    } else {
        debug!(id = %query.id, "callback without a message");
    }
    if let Err(err) = transport.bot.answer_callback_query(query.id).await {
        warn!(?err, "failed to answer callback query");
    }
    respond(())
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    row_width: usize,
}

impl TelegramTransport {
    pub fn new(bot: Bot, row_width: usize) -> Self {
        Self {
            bot,
            row_width: row_width.max(1),
        }
    }

    /// Callback buttons laid out `row_width` per row. Commands without a
    /// code cannot be pressed and are left out.
    pub fn inline_markup(&self, buttons: &[Command]) -> InlineKeyboardMarkup {
        let buttons: Vec<InlineKeyboardButton> = buttons
            .iter()
            .filter_map(|command| {
                command
                    .code
                    .as_ref()
                    .map(|code| InlineKeyboardButton::callback(command.text.clone(), code.clone()))
            })
            .collect();
        InlineKeyboardMarkup::new(buttons.chunks(self.row_width).map(|row| row.to_vec()))
    }

    fn reply_markup(&self, keyboard: &Keyboard) -> Option<ReplyMarkup> {
        match keyboard {
            Keyboard::None => None,
            Keyboard::Inline(buttons) => {
                let markup = self.inline_markup(buttons);
                (!markup.inline_keyboard.is_empty()).then(|| markup.into())
            }
            Keyboard::RequestContact(text) => Some(
                one_time_keyboard(KeyboardButton::new(text.clone()).request(ButtonRequest::Contact))
                    .into(),
            ),
            Keyboard::RequestLocation(text) => Some(
                one_time_keyboard(
                    KeyboardButton::new(text.clone()).request(ButtonRequest::Location),
                )
                .into(),
            ),
        }
    }

    fn inline_only(&self, keyboard: &Keyboard) -> Option<InlineKeyboardMarkup> {
        match keyboard {
            Keyboard::Inline(buttons) => Some(self.inline_markup(buttons)),
            _ => None,
        }
    }

    async fn deliver(
        &self,
        chat_id: ChatId,
        message: &RenderedMessage,
        keyboard: &Keyboard,
        reply_to: Option<MessageId>,
    ) -> Result<Message> {
        let markup = self.reply_markup(keyboard);
        let sent = match message.image_url.as_deref() {
            Some(image_url) => {
                let url = Url::parse(image_url)
                    .map_err(|e| Error::Transport(format!("invalid image url: {}", e)))?;
                let mut request = self
                    .bot
                    .send_photo(chat_id, InputFile::url(url))
                    .caption(message.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                if let Some(reply_to) = reply_to {
                    request = request
                        .reply_to_message_id(reply_to)
                        .allow_sending_without_reply(true);
                }
                request.await
            }
            None => {
                let mut request = self
                    .bot
                    .send_message(chat_id, message.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                if let Some(reply_to) = reply_to {
                    request = request
                        .reply_to_message_id(reply_to)
                        .allow_sending_without_reply(true);
                }
                request.await
            }
        };
        sent.map_err(transport_err)
    }

    /// Delete a message, or at least strip its buttons when it is too old to delete.
    async fn delete_or_strip(&self, chat_id: ChatId, message_id: MessageId) {
        if let Err(err) = self.bot.delete_message(chat_id, message_id).await {
            debug!(?err, "delete failed; clearing buttons instead");
            if let Err(err) = self.bot.edit_message_reply_markup(chat_id, message_id).await {
                debug!(?err, "could not clear buttons");
            }
        }
    }
}

fn one_time_keyboard(button: KeyboardButton) -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![button]])
        .resize_keyboard(true)
        .one_time_keyboard(true)
}

fn handle_of(msg: &Message) -> DeliveryHandle {
    DeliveryHandle {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

fn handle_of_event(event: &IncomingEvent) -> DeliveryHandle {
    DeliveryHandle {
        chat_id: event.chat_id,
        message_id: event.message_id,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(
        &self,
        chat_id: i64,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle> {
        let sent = self.deliver(ChatId(chat_id), message, keyboard, None).await?;
        Ok(handle_of(&sent))
    }

    async fn reply(
        &self,
        event: &IncomingEvent,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle> {
        let sent = self
            .deliver(
                ChatId(event.chat_id),
                message,
                keyboard,
                Some(MessageId(event.message_id)),
            )
            .await?;
        Ok(handle_of(&sent))
    }

    async fn update_on_callback(
        &self,
        event: &IncomingEvent,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle> {
        let chat_id = ChatId(event.chat_id);
        let message_id = MessageId(event.message_id);

        match (event.has_photo, message.image_url.as_deref()) {
            (true, Some(image_url)) => {
                let url = Url::parse(image_url)
                    .map_err(|e| Error::Transport(format!("invalid image url: {}", e)))?;
                let media = InputMedia::Photo(
                    InputMediaPhoto::new(InputFile::url(url))
                        .caption(message.text.clone())
                        .parse_mode(ParseMode::Html),
                );
                let mut request = self.bot.edit_message_media(chat_id, message_id, media);
                if let Some(markup) = self.inline_only(keyboard) {
                    request = request.reply_markup(markup);
                }
                if let Err(err) = request.await {
                    debug!(?err, "photo message left unchanged");
                }
                Ok(handle_of_event(event))
            }
            (true, None) => {
                self.delete_or_strip(chat_id, message_id).await;
                let sent = self.deliver(chat_id, message, keyboard, None).await?;
                Ok(handle_of(&sent))
            }
            (false, Some(_)) => {
                self.delete_or_strip(chat_id, message_id).await;
                let sent = self
                    .deliver(chat_id, message, keyboard, Some(message_id))
                    .await?;
                Ok(handle_of(&sent))
            }
            (false, None) => {
                let mut request = self
                    .bot
                    .edit_message_text(chat_id, message_id, message.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = self.inline_only(keyboard) {
                    request = request.reply_markup(markup);
                }
                if let Err(err) = request.await {
                    debug!(?err, "text message left unchanged");
                }
                Ok(handle_of_event(event))
            }
        }
    }

    async fn clear_buttons(&self, handle: &DeliveryHandle) -> Result<()> {
        self.bot
            .edit_message_reply_markup(ChatId(handle.chat_id), MessageId(handle.message_id))
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    async fn clear_reply_keyboard(&self, event: &IncomingEvent) -> Result<()> {
        let chat_id = ChatId(event.chat_id);
        let sent = self
            .bot
            .send_message(chat_id, KEYBOARD_REMOVAL_TEXT)
            .reply_markup(KeyboardRemove::new())
            .await
            .map_err(transport_err)?;
        self.bot
            .delete_message(chat_id, sent.id)
            .await
            .map_err(transport_err)?;
        Ok(())
    }
}
