//! Hivebot Protocol Buffers
//!
//! Generated protobuf code for the Hivebot gRPC API.
//!
//! This crate contains the `SubbotService` definitions used by the daemon
//! and its clients: launch/delete/query RPCs plus the server-streaming
//! event subscription.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Hivebot v1 API definitions.
///
/// All generated types and services are included here.
pub mod v1 {
    tonic::include_proto!("hivebot.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;

// Re-export prost_types for downstream crates that need Timestamp conversion
pub use prost_types;
