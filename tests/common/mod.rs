#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use wedding_guest_bot::db::Pool;
use wedding_guest_bot::geocoder::Geocoder;
use wedding_guest_bot::messages::MessageFactory;
use wedding_guest_bot::model::{Coordinates, RenderedMessage};
use wedding_guest_bot::storage::BlobStore;
use wedding_guest_bot::template::JinjaRenderer;
use wedding_guest_bot::transport::{DeliveryHandle, IncomingEvent, Keyboard, Transport};
use wedding_guest_bot::{Error, Result};

pub const BASE_FILES_URL: &str = "https://files.test/wedding/";

pub async fn setup_pool() -> Pool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub async fn insert_guest(pool: &Pool, first_name: &str, phone: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO guests (first_name, last_name, phone_number, birth_date, gender, category) \
         VALUES (?, 'Petrova', ?, '1993-08-01', 'F', 'relative') RETURNING guest_id",
    )
    .bind(first_name)
    .bind(phone)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Command row; `tag` is `("form_stage" | "initial_command", value)`.
pub async fn insert_command(
    pool: &Pool,
    text: &str,
    code: Option<&str>,
    tag: Option<(&str, &str)>,
    is_restricted: bool,
    is_negative_feedback: bool,
) -> i64 {
    let (form_stage, initial_command) = match tag {
        Some(("form_stage", value)) => (Some(value), None),
        Some(("initial_command", value)) => (None, Some(value)),
        Some((other, _)) => panic!("unknown tag {other}"),
        None => (None, None),
    };
    sqlx::query_scalar(
        "INSERT INTO commands (text, code, form_stage, initial_command, is_restricted, \
         is_negative_feedback) VALUES (?, ?, ?, ?, ?, ?) RETURNING command_id",
    )
    .bind(text)
    .bind(code)
    .bind(form_stage)
    .bind(initial_command)
    .bind(is_restricted)
    .bind(is_negative_feedback)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Callback message keyed by one of its lookup columns.
pub async fn insert_message(
    pool: &Pool,
    key_column: &str,
    key: &str,
    text_filepath: &str,
    required_data: Option<&str>,
) {
    let sql = format!(
        "INSERT INTO callback_messages ({}, text_filepath, required_data) VALUES (?, ?, ?)",
        key_column
    );
    sqlx::query(&sql)
        .bind(key)
        .bind(text_filepath)
        .bind(required_data)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_notification(pool: &Pool, code: &str, is_personal: bool) -> i64 {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO notifications (code, is_personal) VALUES (?, ?) RETURNING notification_id",
    )
    .bind(code)
    .bind(is_personal)
    .fetch_one(pool)
    .await
    .unwrap();
    insert_message(pool, "notification_id", &id.to_string(), &format!("n/{code}.html"), None)
        .await;
    id
}

pub async fn link_telegram_user(pool: &Pool, guest_id: i64, user_id: i64) {
    sqlx::query("INSERT INTO telegram_users (user_id, guest_id) VALUES (?, ?)")
        .bind(user_id)
        .bind(guest_id)
        .execute(pool)
        .await
        .unwrap();
}

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub async fn with(entries: &[(&str, &str)]) -> Self {
        let store = Self::default();
        for (key, body) in entries {
            store.put(key, body.as_bytes().to_vec()).await.unwrap();
        }
        store
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("missing {key}")))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn healthcheck(&self) -> Result<()> {
        Ok(())
    }
}

pub fn factory(store: MemoryBlobStore) -> MessageFactory {
    MessageFactory::new(
        Arc::new(store),
        Arc::new(JinjaRenderer::default()),
        BASE_FILES_URL.parse().unwrap(),
    )
}

pub struct StaticGeocoder(pub &'static str);

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn reverse_geocode(&self, _: Coordinates, _: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send { chat_id: i64, text: String },
    Reply { chat_id: i64, text: String, keyboard: Keyboard },
    Update { chat_id: i64, text: String },
    ClearButtons { message_id: i32 },
    ClearReplyKeyboard { chat_id: i64 },
}

#[derive(Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<Call>>>,
    failing_chat: Option<i64>,
}

impl RecordingTransport {
    pub fn failing_for(chat_id: i64) -> Self {
        Self {
            failing_chat: Some(chat_id),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    /// Text of every message that reached a chat, in order.
    pub async fn texts(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { text, .. } | Call::Reply { text, .. } | Call::Update { text, .. } => {
                    Some(text)
                }
                _ => None,
            })
            .collect()
    }

    pub async fn last_keyboard(&self) -> Option<Keyboard> {
        self.calls().await.into_iter().rev().find_map(|call| match call {
            Call::Reply { keyboard, .. } => Some(keyboard),
            _ => None,
        })
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }

    async fn record(&self, chat_id: i64, call: Call) -> Result<DeliveryHandle> {
        if self.failing_chat == Some(chat_id) {
            return Err(Error::Transport("chat unavailable".into()));
        }
        let mut calls = self.calls.lock().await;
        calls.push(call);
        Ok(DeliveryHandle {
            chat_id,
            message_id: calls.len() as i32 + 100,
        })
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        chat_id: i64,
        message: &RenderedMessage,
        _keyboard: &Keyboard,
    ) -> Result<DeliveryHandle> {
        let text = message.text.clone();
        self.record(chat_id, Call::Send { chat_id, text }).await
    }

    async fn reply(
        &self,
        event: &IncomingEvent,
        message: &RenderedMessage,
        keyboard: &Keyboard,
    ) -> Result<DeliveryHandle> {
        let call = Call::Reply {
            chat_id: event.chat_id,
            text: message.text.clone(),
            keyboard: keyboard.clone(),
        };
        self.record(event.chat_id, call).await
    }

    async fn update_on_callback(
        &self,
        event: &IncomingEvent,
        message: &RenderedMessage,
        _keyboard: &Keyboard,
    ) -> Result<DeliveryHandle> {
        let call = Call::Update {
            chat_id: event.chat_id,
            text: message.text.clone(),
        };
        self.record(event.chat_id, call).await
    }

    async fn clear_buttons(&self, handle: &DeliveryHandle) -> Result<()> {
        let call = Call::ClearButtons {
            message_id: handle.message_id,
        };
        self.record(handle.chat_id, call).await.map(|_| ())
    }

    async fn clear_reply_keyboard(&self, event: &IncomingEvent) -> Result<()> {
        let call = Call::ClearReplyKeyboard {
            chat_id: event.chat_id,
        };
        self.record(event.chat_id, call).await.map(|_| ())
    }
}
