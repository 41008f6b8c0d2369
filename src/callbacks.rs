//! Resolution of pressed buttons to commands the guest may use.
use tracing::{debug, instrument};

use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::model::Command;

/// Resolve `code` for the guest.
///
/// With `strict` an unknown or unavailable code is `CommandNotFound`;
/// otherwise resolution falls back to `default_code`, which must itself be
/// available to the guest. Without a code the default is resolved directly.
#[instrument(skip_all, fields(guest_id = guest_id, code = code, strict = strict))]
pub async fn resolve(
    pool: &Pool,
    guest_id: i64,
    code: Option<&str>,
    strict: bool,
    default_code: &str,
) -> Result<Command> {
    if let Some(code) = code.filter(|c| !c.is_empty()) {
        match db::commands::find_available_by_code(pool, guest_id, code).await? {
            Some(command) => return Ok(command),
            None if strict => return Err(Error::CommandNotFound),
            None => debug!(code, default_code, "falling back to default command"),
        }
    }

    db::commands::find_available_by_code(pool, guest_id, default_code)
        .await?
        .ok_or(Error::CommandNotFound)
}
