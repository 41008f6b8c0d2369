//! Mapping Telegram identities to invited guests.
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::model::{FormStage, Guest, GuestForm, TelegramUser};

/// Guest linked to `user`. Refreshes the stored username on success.
#[instrument(skip_all, fields(user_id = user.user_id))]
pub async fn authenticate(pool: &Pool, user: &TelegramUser) -> Result<Guest> {
    let guest = match db::guests::get_guest_by_telegram_user(pool, user.user_id).await {
        Ok(guest) => guest,
        Err(Error::ObjectNotFound(_)) => return Err(Error::NotAuthenticated),
        Err(err) => return Err(err),
    };
    db::guests::upsert_telegram_user(pool, guest.guest_id, user).await?;
    Ok(guest)
}

/// First contact: link `user` to the guest owning `phone_number` and open
/// their form. A guest registers once; a second attempt is an `Integrity`
/// error and changes nothing.
#[instrument(skip_all, fields(user_id = user.user_id))]
pub async fn register(
    pool: &Pool,
    phone_number: &str,
    user: &TelegramUser,
) -> Result<(Guest, GuestForm)> {
    let phone_number = normalize_phone(phone_number);

    let mut tx = pool.begin().await?;
    let Some(guest) = db::guests::find_guest_by_phone(&mut *tx, phone_number).await? else {
        warn!("registration denied for unknown phone number");
        return Err(Error::NotAuthenticated);
    };
    db::guests::upsert_telegram_user(&mut *tx, guest.guest_id, user).await?;
    let form = db::forms::create_form(
        &mut *tx,
        &GuestForm::new(guest.guest_id, FormStage::AwaitingAnswer),
    )
    .await?;
    tx.commit().await?;

    info!(guest_id = guest.guest_id, "guest registered");
    Ok((guest, form))
}

fn normalize_phone(phone_number: &str) -> &str {
    let trimmed = phone_number.trim();
    trimmed.strip_prefix('+').unwrap_or(trimmed)
}
