//! Hivebot Daemon Library
//!
//! Core functionality for the Hivebot daemon:
//! - Worker supervision for subbot session processes
//! - SQLite storage for subbot records and the append-only event log
//! - Quota enforcement and launch coordination
//! - Event broadcast gateway and gRPC server

pub mod gateway;
pub mod launch;
pub mod notify;
pub mod quota;
pub mod server;
pub mod storage;
pub mod supervisor;
