//! Dedup Vault
//!
//! A multi-user file store that keeps one physical copy of every distinct
//! byte sequence, counts the logical files sharing it, and refuses upload
//! batches that would push a user over quota.

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod events;
pub mod routes;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
