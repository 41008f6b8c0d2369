//! Stored message references (`callback_messages`).
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::model::{FormStage, InitialCommand, MessageReference, RequiredData};

const MESSAGE_COLUMNS: &str = "text_filepath, image_filepath, required_data";

fn message_from_row(row: &SqliteRow) -> Result<MessageReference> {
    let required_data: Option<String> = row.try_get("required_data")?;
    let required_data = match required_data.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(serde_json::from_str::<RequiredData>(raw)?),
    };
    Ok(MessageReference {
        text_filepath: row.try_get("text_filepath")?,
        image_filepath: row.try_get("image_filepath")?,
        required_data,
    })
}

async fn fetch_one_by<'e, E, T>(
    executor: E,
    column: &str,
    value: T,
    what: String,
) -> Result<MessageReference>
where
    E: SqliteExecutor<'e>,
    T: for<'q> sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + 'static,
{
    let sql = format!(
        "SELECT {} FROM callback_messages WHERE {} = ?",
        MESSAGE_COLUMNS, column
    );
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(executor)
        .await?
        .ok_or(Error::CallbackMessageNotFound(what))?;
    message_from_row(&row)
}

#[instrument(skip_all, fields(stage = stage.as_str()))]
pub async fn get_by_form_stage<'e, E: SqliteExecutor<'e>>(
    executor: E,
    stage: FormStage,
) -> Result<MessageReference> {
    fetch_one_by(
        executor,
        "form_stage",
        stage.as_str().to_string(),
        format!("stage {}", stage.as_str()),
    )
    .await
}

#[instrument(skip_all)]
pub async fn get_by_initial_command<'e, E: SqliteExecutor<'e>>(
    executor: E,
    initial_command: InitialCommand,
) -> Result<MessageReference> {
    fetch_one_by(
        executor,
        "initial_command",
        initial_command.as_str().to_string(),
        format!("initial command {}", initial_command.as_str()),
    )
    .await
}

#[instrument(skip_all, fields(command_id = command_id))]
pub async fn get_by_command<'e, E: SqliteExecutor<'e>>(
    executor: E,
    command_id: i64,
) -> Result<MessageReference> {
    fetch_one_by(executor, "command_id", command_id, format!("command {}", command_id)).await
}

#[instrument(skip_all, fields(notification_id = notification_id))]
pub async fn get_by_notification<'e, E: SqliteExecutor<'e>>(
    executor: E,
    notification_id: i64,
) -> Result<MessageReference> {
    fetch_one_by(
        executor,
        "notification_id",
        notification_id,
        format!("notification {}", notification_id),
    )
    .await
}
