//! `SQLite` storage for the Hivebot daemon.
//!
//! Provides persistence for subbot records and the append-only event log.

mod db;
mod models;
mod queries;

pub use db::{Database, DatabaseError};
pub use models::*;
