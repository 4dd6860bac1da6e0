//! Persistent store for videos, torrents and jobs (SQLite via sqlx).
//!
//! The store is the single source of truth for lifecycle state. Components
//! read it fresh on every pass and never cache allocation decisions.

mod db;
mod jobs;
mod torrents;
mod types;
mod videos;

#[cfg(test)]
pub(crate) use db::open_memory;
pub use db::{now_millis, Db};
pub use types::*;

#[cfg(test)]
mod tests;
