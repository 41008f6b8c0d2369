//! Error taxonomy shared by the data access layer, the form engine and the
//! message pipeline.
use thiserror::Error;

use crate::model::FormStage;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("guest is not authenticated")]
    NotAuthenticated,
    #[error("command not found")]
    CommandNotFound,
    #[error("callback message not found: {0}")]
    CallbackMessageNotFound(String),
    #[error("required context `{0}` was not provided")]
    RequiredContextMissing(&'static str),
    #[error("undefined input {trigger} at stage {}", .stage.as_str())]
    UndefinedTrigger { stage: FormStage, trigger: &'static str },
    #[error("misconfigured keyboard: {0}")]
    Keyboard(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("geocoder error: {0}")]
    Geocoder(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::ObjectNotFound("row not found".into()),
            sqlx::Error::Database(db_err)
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() =>
            {
                Error::Integrity(db_err.message().to_string())
            }
            _ => Error::Database(err),
        }
    }
}
