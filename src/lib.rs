pub mod auth;
pub mod callbacks;
pub mod config;
pub mod db;
pub mod error;
pub mod form;
pub mod geocoder;
pub mod handlers;
pub mod messages;
pub mod model;
pub mod notify;
pub mod storage;
pub mod telegram;
pub mod template;
pub mod transport;

pub use error::{Error, Result};
