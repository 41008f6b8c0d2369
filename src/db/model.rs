//! View models returned by repositories that span more than one table.

use crate::model::TelegramUser;

/// A guest together with the Telegram identity messages are delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub guest_id: i64,
    pub user: TelegramUser,
}
