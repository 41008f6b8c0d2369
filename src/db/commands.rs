//! Commands (buttons) and their per-guest grants.
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteExecutor};
use tracing::{debug, instrument};

use super::pool::Pool;
use crate::error::{Error, Result};
use crate::model::{Command, FormStage, InitialCommand};

const COMMAND_COLUMNS: &str = "c.command_id, c.text, c.code, c.initial_command, c.form_stage, \
     c.is_restricted, c.is_negative_feedback";

/// A command is available to a guest when it is unrestricted or granted.
const AVAILABLE_TO_GUEST: &str = "(c.is_restricted = 0 OR EXISTS (\
     SELECT 1 FROM available_commands a WHERE a.guest_id = ? AND a.command_id = c.command_id))";

const UNTAGGED: &str = "c.initial_command IS NULL AND c.form_stage IS NULL";

fn command_from_row(row: &SqliteRow) -> Result<Command> {
    let initial_command: Option<String> = row.try_get("initial_command")?;
    let form_stage: Option<String> = row.try_get("form_stage")?;
    Ok(Command {
        command_id: row.try_get("command_id")?,
        text: row.try_get("text")?,
        code: row.try_get("code")?,
        initial_command: initial_command
            .map(|s| {
                InitialCommand::parse_command(&s)
                    .ok_or_else(|| Error::Integrity(format!("unknown initial command {}", s)))
            })
            .transpose()?,
        form_stage: form_stage
            .map(|s| {
                FormStage::parse_stage(&s)
                    .ok_or_else(|| Error::Integrity(format!("unknown form stage {}", s)))
            })
            .transpose()?,
        is_restricted: row.try_get("is_restricted")?,
        is_negative_feedback: row.try_get("is_negative_feedback")?,
    })
}

fn commands_from_rows(rows: &[SqliteRow]) -> Result<Vec<Command>> {
    rows.iter().map(command_from_row).collect()
}

/// Command with `code` that `guest_id` may use.
#[instrument(skip_all, fields(guest_id = guest_id, code = code))]
pub async fn find_available_by_code<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
    code: &str,
) -> Result<Option<Command>> {
    let sql = format!(
        "SELECT {} FROM commands c WHERE c.code = ? AND {} ORDER BY c.command_id LIMIT 1",
        COMMAND_COLUMNS, AVAILABLE_TO_GUEST
    );
    let row = sqlx::query(&sql)
        .bind(code)
        .bind(guest_id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(command_from_row).transpose()
}

/// Buttons for a stage prompt. Negative feedback options come last.
#[instrument(skip_all, fields(stage = stage.as_str()))]
pub async fn filter_by_form_stage<'e, E: SqliteExecutor<'e>>(
    executor: E,
    stage: FormStage,
) -> Result<Vec<Command>> {
    let sql = format!(
        "SELECT {} FROM commands c WHERE c.form_stage = ? \
         ORDER BY c.is_negative_feedback, c.command_id",
        COMMAND_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(stage.as_str())
        .fetch_all(executor)
        .await?;
    commands_from_rows(&rows)
}

#[instrument(skip_all)]
pub async fn filter_by_initial_command<'e, E: SqliteExecutor<'e>>(
    executor: E,
    initial_command: InitialCommand,
) -> Result<Vec<Command>> {
    let sql = format!(
        "SELECT {} FROM commands c WHERE c.initial_command = ? ORDER BY c.command_id",
        COMMAND_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(initial_command.as_str())
        .fetch_all(executor)
        .await?;
    commands_from_rows(&rows)
}

/// General purpose commands the guest may use, oldest first.
#[instrument(skip_all, fields(guest_id = guest_id))]
pub async fn filter_available_for_guest<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
) -> Result<Vec<Command>> {
    let sql = format!(
        "SELECT {} FROM commands c WHERE {} AND {} ORDER BY c.created_at, c.command_id",
        COMMAND_COLUMNS, UNTAGGED, AVAILABLE_TO_GUEST
    );
    let rows = sqlx::query(&sql)
        .bind(guest_id)
        .fetch_all(executor)
        .await?;
    commands_from_rows(&rows)
}

/// Ids of untagged, unrestricted commands.
pub async fn public_command_ids(pool: &Pool) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT c.command_id FROM commands c WHERE {} AND c.is_restricted = 0 \
         ORDER BY c.created_at, c.command_id",
        UNTAGGED
    );
    Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_all(pool).await?)
}

/// Ids of untagged commands explicitly granted to the guest.
pub async fn granted_command_ids(pool: &Pool, guest_id: i64) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT c.command_id FROM commands c \
         JOIN available_commands a ON a.command_id = c.command_id \
         WHERE a.guest_id = ? AND {}",
        UNTAGGED
    );
    Ok(sqlx::query_scalar::<_, i64>(&sql).bind(guest_id).fetch_all(pool).await?)
}

/// Bulk insert (guest_id, command_id) grants in one statement.
#[instrument(skip_all, fields(pairs = pairs.len()))]
pub async fn grant_commands(pool: &Pool, pairs: &[(i64, i64)]) -> Result<u64> {
    if pairs.is_empty() {
        debug!("no command grants to insert");
        return Ok(0);
    }
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO available_commands (guest_id, command_id) ");
    qb.push_values(pairs, |mut b, (guest_id, command_id)| {
        b.push_bind(*guest_id).push_bind(*command_id);
    });
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}
