//! Guests and their linked Telegram identities.
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};
use tracing::instrument;

use super::model::Recipient;
use super::pool::Pool;
use crate::error::{Error, Result};
use crate::model::{Gender, Guest, GuestCategory, TelegramUser};

const GUEST_COLUMNS: &str = "g.guest_id, g.first_name, g.last_name, g.patronymic, g.phone_number, \
     g.birth_date, g.gender, g.category, g.is_resident, g.is_registration_guest";

pub(crate) fn guest_from_row(row: &SqliteRow) -> Result<Guest> {
    let gender: String = row.try_get("gender")?;
    let category: String = row.try_get("category")?;
    Ok(Guest {
        guest_id: row.try_get("guest_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        patronymic: row.try_get("patronymic")?,
        phone_number: row.try_get("phone_number")?,
        birth_date: row.try_get("birth_date")?,
        gender: Gender::parse_gender(&gender)
            .ok_or_else(|| Error::Integrity(format!("unknown gender {}", gender)))?,
        category: GuestCategory::parse_category(&category)
            .ok_or_else(|| Error::Integrity(format!("unknown guest category {}", category)))?,
        is_resident: row.try_get("is_resident")?,
        is_registration_guest: row.try_get("is_registration_guest")?,
    })
}

#[instrument(skip_all)]
pub async fn find_guest_by_phone<'e, E: SqliteExecutor<'e>>(
    executor: E,
    phone_number: &str,
) -> Result<Option<Guest>> {
    let sql = format!("SELECT {} FROM guests g WHERE g.phone_number = ?", GUEST_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(phone_number)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(guest_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_guest_by_telegram_user<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<Guest> {
    let sql = format!(
        "SELECT {} FROM guests g JOIN telegram_users t ON t.guest_id = g.guest_id WHERE t.user_id = ?",
        GUEST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::ObjectNotFound(format!("guest by telegram user {}", user_id)))?;
    guest_from_row(&row)
}

/// Lazily stream every guest id, oldest first.
pub fn stream_guest_ids(pool: &Pool) -> BoxStream<'_, Result<i64>> {
    sqlx::query_scalar::<_, i64>("SELECT guest_id FROM guests ORDER BY guest_id")
        .fetch(pool)
        .map_err(Error::from)
        .boxed()
}

pub async fn all_guest_ids(pool: &Pool) -> Result<Vec<i64>> {
    stream_guest_ids(pool).try_collect().await
}

/// Link (or relink) a Telegram identity to a guest, refreshing the username.
#[instrument(skip_all, fields(guest_id = guest_id))]
pub async fn upsert_telegram_user<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
    user: &TelegramUser,
) -> Result<TelegramUser> {
    let row = sqlx::query(
        "INSERT INTO telegram_users (user_id, username, guest_id) VALUES (?, ?, ?) \
         ON CONFLICT (guest_id) DO UPDATE SET \
             user_id = excluded.user_id, \
             username = excluded.username, \
             updated_at = CURRENT_TIMESTAMP \
         RETURNING user_id, username",
    )
    .bind(user.user_id)
    .bind(user.username.as_deref())
    .bind(guest_id)
    .fetch_one(executor)
    .await?;
    Ok(TelegramUser {
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
    })
}

/// Linked Telegram identities of the given guests, in guest id order.
#[instrument(skip_all)]
pub async fn recipients_for_guests(pool: &Pool, guest_ids: &[i64]) -> Result<Vec<Recipient>> {
    if guest_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
        "SELECT guest_id, user_id, username FROM telegram_users WHERE guest_id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in guest_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY guest_id");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(Recipient {
                guest_id: row.try_get("guest_id")?,
                user: TelegramUser {
                    user_id: row.try_get("user_id")?,
                    username: row.try_get("username")?,
                },
            })
        })
        .collect()
}
