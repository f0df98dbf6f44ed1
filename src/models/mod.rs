//! Core data models for the media intake service.
//!
//! These entities represent buffered chunk sessions, upload units, and the
//! manifest sealing a completed upload. They map cleanly to database tables
//! via `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod chunk;
pub mod manifest;
pub mod session;
pub mod upload;
