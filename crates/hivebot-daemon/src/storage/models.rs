//! Database models for the Hivebot daemon.

use serde::{Deserialize, Serialize};

/// Subbot record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubbotRow {
    pub code: String,
    pub kind: String,
    pub status: String,
    pub owner_id: String,
    pub requester_chat: String,
    pub target_number: Option<String>,
    pub metadata: String,
    pub qr_payload: Option<String>,
    pub event_token: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_heartbeat: i64,
}

/// Event log record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubbotEventRow {
    pub id: i64,
    pub code: String,
    pub event: String,
    pub payload: String,
    pub created_at: i64,
}

/// Parameters for inserting a new subbot record.
#[derive(Debug, Clone, Copy)]
pub struct NewSubbot<'a> {
    pub code: &'a str,
    pub kind: SubbotKind,
    pub owner_id: &'a str,
    pub requester_chat: &'a str,
    pub target_number: Option<&'a str>,
    pub metadata: &'a str,
    pub event_token: &'a str,
}

/// Subbot status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubbotStatus {
    Launching,
    Pending,
    Connected,
    Disconnected,
    Error,
    Stopped,
    Deleted,
}

impl SubbotStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Launching => "launching",
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "launching" => Some(Self::Launching),
            "pending" => Some(Self::Pending),
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "error" => Some(Self::Error),
            "stopped" => Some(Self::Stopped),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubbotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authentication kind offered by the session library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubbotKind {
    /// Link by scanning a rendered QR image.
    Qr,
    /// Link by typing a pairing code on the target phone.
    PairingCode,
}

impl SubbotKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::PairingCode => "pairing-code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qr" => Some(Self::Qr),
            "pairing-code" => Some(Self::PairingCode),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubbotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
