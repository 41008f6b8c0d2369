//! Batch jobs: assignment of public notifications and commands, and delivery
//! of pending notifications.
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::db::{self, Pool, Recipient};
use crate::error::Result;
use crate::messages::{self, MessageFactory, RenderContext};
use crate::model::RenderedMessage;
use crate::transport::{Keyboard, Transport};

/// Pairs `(guest_id, id)` for every public id the guest is still missing.
fn missing_pairs(guest_id: i64, public: &[i64], assigned: &[i64]) -> Vec<(i64, i64)> {
    let assigned: HashSet<i64> = assigned.iter().copied().collect();
    public
        .iter()
        .filter(|id| !assigned.contains(id))
        .map(|id| (guest_id, *id))
        .collect()
}

/// Assign every public notification to the guests that lack it.
/// Returns the number of new assignments.
#[instrument(skip_all, fields(guests = guest_ids.len()))]
pub async fn assign_public_notifications(pool: &Pool, guest_ids: &[i64]) -> Result<u64> {
    let public = db::notifications::public_notification_ids(pool).await?;
    let mut pairs = Vec::new();
    for &guest_id in guest_ids {
        let assigned = db::notifications::assigned_notification_ids(pool, guest_id).await?;
        pairs.extend(missing_pairs(guest_id, &public, &assigned));
    }
    let inserted = db::notifications::assign_notifications(pool, &pairs).await?;
    info!(inserted, "public notifications assigned");
    Ok(inserted)
}

/// Grant every public general purpose command to the guests that lack it.
#[instrument(skip_all, fields(guests = guest_ids.len()))]
pub async fn update_available_commands(pool: &Pool, guest_ids: &[i64]) -> Result<u64> {
    let public = db::commands::public_command_ids(pool).await?;
    let mut pairs = Vec::new();
    for &guest_id in guest_ids {
        let granted = db::commands::granted_command_ids(pool, guest_id).await?;
        pairs.extend(missing_pairs(guest_id, &public, &granted));
    }
    let inserted = db::commands::grant_commands(pool, &pairs).await?;
    info!(inserted, "available commands synchronized");
    Ok(inserted)
}

/// Summary of one delivery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub guests_processed: usize,
    pub messages_sent: usize,
    pub guests_failed: usize,
}

/// Deliver pending notifications to the guests with a linked Telegram user.
///
/// Per guest: fetch unsent (at most `limit_per_guest`), send in assignment
/// order, then mark what was delivered. Rendered messages are shared across
/// guests. A failure is logged and stops only the affected guest.
#[instrument(skip_all, fields(guests = guest_ids.len(), limit = limit_per_guest))]
pub async fn send_notifications(
    pool: &Pool,
    factory: &MessageFactory,
    transport: &dyn Transport,
    guest_ids: &[i64],
    limit_per_guest: Option<u32>,
) -> Result<DispatchReport> {
    let recipients = db::guests::recipients_for_guests(pool, guest_ids).await?;
    let mut rendered: HashMap<i64, RenderedMessage> = HashMap::new();
    let mut report = DispatchReport::default();

    for recipient in recipients {
        report.guests_processed += 1;
        let mut delivered = Vec::new();
        let outcome = deliver_to(
            pool,
            factory,
            transport,
            &recipient,
            limit_per_guest,
            &mut rendered,
            &mut delivered,
        )
        .await;

        report.messages_sent += delivered.len();
        if let Err(err) = db::notifications::mark_sent(pool, recipient.guest_id, &delivered).await
        {
            warn!(guest_id = recipient.guest_id, ?err, "failed to mark notifications sent");
            report.guests_failed += 1;
            continue;
        }
        if let Err(err) = outcome {
            warn!(guest_id = recipient.guest_id, ?err, "notification delivery failed");
            report.guests_failed += 1;
        }
    }

    info!(
        processed = report.guests_processed,
        sent = report.messages_sent,
        failed = report.guests_failed,
        "notification run finished"
    );
    Ok(report)
}

async fn deliver_to(
    pool: &Pool,
    factory: &MessageFactory,
    transport: &dyn Transport,
    recipient: &Recipient,
    limit_per_guest: Option<u32>,
    rendered: &mut HashMap<i64, RenderedMessage>,
    delivered: &mut Vec<i64>,
) -> Result<()> {
    let pending =
        db::notifications::unsent_for_guest(pool, recipient.guest_id, limit_per_guest).await?;
    for notification in pending {
        let notification_id = notification.notification_id;
        if !rendered.contains_key(&notification_id) {
            let data = messages::by_notification(pool, notification_id).await?;
            let message = factory.render(&data, &RenderContext::default()).await?;
            rendered.insert(notification_id, message);
        }
        if let Some(message) = rendered.get(&notification_id) {
            transport
                .send(recipient.user.user_id, message, &Keyboard::None)
                .await?;
            delivered.push(notification_id);
        }
    }
    Ok(())
}
