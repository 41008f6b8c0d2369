//! Database module: one file of SQL functions per entity group.
//!
//! Every function takes either the pool or an open transaction (anything
//! implementing `SqliteExecutor`), so the form engine and registration can
//! compose several writes into one commit.

pub mod commands;
pub mod forms;
pub mod guests;
pub mod messages;
pub mod model;
pub mod notifications;
pub mod pool;

pub use model::Recipient;
pub use pool::{init_pool, run_migrations, Pool};
