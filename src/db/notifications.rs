//! Notifications and their per-guest delivery records.
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, instrument};

use super::pool::Pool;
use crate::error::Result;
use crate::model::Notification;

pub async fn public_notification_ids(pool: &Pool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT notification_id FROM notifications WHERE is_personal = 0 \
         ORDER BY created_at, notification_id",
    )
    .fetch_all(pool)
    .await?)
}

/// Every notification assigned to the guest, delivered or not.
pub async fn assigned_notification_ids(pool: &Pool, guest_id: i64) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT notification_id FROM personal_notifications WHERE guest_id = ?",
    )
    .bind(guest_id)
    .fetch_all(pool)
    .await?)
}

/// Bulk insert (guest_id, notification_id) assignments in one statement.
#[instrument(skip_all, fields(pairs = pairs.len()))]
pub async fn assign_notifications(pool: &Pool, pairs: &[(i64, i64)]) -> Result<u64> {
    if pairs.is_empty() {
        debug!("no notifications to assign");
        return Ok(0);
    }
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO personal_notifications (guest_id, notification_id) ");
    qb.push_values(pairs, |mut b, (guest_id, notification_id)| {
        b.push_bind(*guest_id).push_bind(*notification_id);
    });
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Assigned, not yet delivered notifications of the guest in assignment order.
#[instrument(skip_all, fields(guest_id = guest_id))]
pub async fn unsent_for_guest(
    pool: &Pool,
    guest_id: i64,
    limit: Option<u32>,
) -> Result<Vec<Notification>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT n.notification_id, n.code, n.is_personal \
         FROM personal_notifications p \
         JOIN notifications n ON n.notification_id = p.notification_id \
         WHERE p.is_sent = 0 AND p.guest_id = ",
    );
    qb.push_bind(guest_id).push(" ORDER BY p.created_at, p.id");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(i64::from(limit));
    }

    let rows = qb.build().fetch_all(pool).await?;
    let mut pending = Vec::with_capacity(rows.len());
    for row in rows {
        pending.push(Notification {
            notification_id: row.try_get("notification_id")?,
            code: row.try_get("code")?,
            is_personal: row.try_get("is_personal")?,
        });
    }
    Ok(pending)
}

/// Flag the given notifications as delivered to the guest.
#[instrument(skip_all, fields(guest_id = guest_id, count = notification_ids.len()))]
pub async fn mark_sent(pool: &Pool, guest_id: i64, notification_ids: &[i64]) -> Result<u64> {
    if notification_ids.is_empty() {
        return Ok(0);
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "UPDATE personal_notifications SET is_sent = 1, updated_at = CURRENT_TIMESTAMP \
         WHERE guest_id = ",
    );
    qb.push_bind(guest_id).push(" AND notification_id IN (");
    let mut separated = qb.separated(", ");
    for id in notification_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}
