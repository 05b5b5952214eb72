//! Hivebot Core Library
//!
//! Shared functionality for Hivebot components:
//! - Worker wire protocol (NDJSON events emitted by session workers)
//! - `SQLite` pool helpers and the shared database error type
//! - Tracing/logging initialisation
//! - Common error types

pub mod db;
pub mod error;
pub mod tracing_init;
pub mod wire;

pub use error::{Error, Result};
pub use wire::WorkerEvent;
