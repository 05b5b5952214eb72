//! Worker wire protocol.
//!
//! Session workers report lifecycle changes to the supervisor as NDJSON:
//! one JSON object per stdout line, with the event name in the `event`
//! field. Implements tolerant reader pattern: unknown fields ignored,
//! unknown event names preserved as [`WorkerEvent::Unknown`] so the
//! supervisor can skip them without failing.

use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Canonical lifecycle events a session worker can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Rendered QR image for the handshake, base64-encoded.
    QrReady { qr: String },
    /// Pairing code in display form plus the raw code.
    PairingCode { display: String, code: String },
    /// Session linked; carries the phone number that was linked.
    Connected { number: String },
    /// Session dropped; carries the session library's reason.
    Disconnected { reason: String },
    /// The session library reported a protocol failure.
    Error { detail: String },
    /// Forward-compatible catch-all for event names this version does
    /// not know about.
    Unknown { name: String, payload: Value },
}

impl WorkerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &str {
        match self {
            Self::QrReady { .. } => "qr_ready",
            Self::PairingCode { .. } => "pairing_code",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::Unknown { name, .. } => name,
        }
    }

    /// JSON payload as recorded in the event log.
    pub fn payload(&self) -> Value {
        match self {
            Self::QrReady { qr } => json!({ "qr": qr }),
            Self::PairingCode { display, code } => json!({ "display": display, "code": code }),
            Self::Connected { number } => json!({ "number": number }),
            Self::Disconnected { reason } => json!({ "reason": reason }),
            Self::Error { detail } => json!({ "detail": detail }),
            Self::Unknown { payload, .. } => payload.clone(),
        }
    }

    /// Whether the event belongs to the closed, versioned set the
    /// supervisor acts on.
    pub const fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }
}

/// Parse a single NDJSON line from a worker's stdout.
pub fn parse_line(line: &str) -> Result<WorkerEvent> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into a canonical worker event.
pub fn parse_value(raw: &Value) -> Result<WorkerEvent> {
    let name = raw
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::WireParse("Missing 'event' field".into()))?;

    Ok(from_parts(name, raw))
}

/// Build a worker event from an event name and payload.
///
/// Used both by the stdout parser and by the external event endpoint,
/// where name and payload arrive as separate request fields.
pub fn from_parts(name: &str, payload: &Value) -> WorkerEvent {
    let field = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };

    match name {
        "qr_ready" => WorkerEvent::QrReady { qr: field("qr") },
        "pairing_code" => WorkerEvent::PairingCode {
            display: field("display"),
            code: field("code"),
        },
        "connected" => WorkerEvent::Connected {
            number: field("number"),
        },
        "disconnected" => WorkerEvent::Disconnected {
            reason: field("reason"),
        },
        "error" => WorkerEvent::Error {
            detail: field("detail"),
        },
        _ => WorkerEvent::Unknown {
            name: name.to_string(),
            payload: payload.clone(),
        },
    }
}

/// Simple base64 encoding for QR payload transport (no external
/// dependency needed).
pub fn base64_encode(data: &[u8]) -> String {
    use std::fmt::Write;
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let b0 = u32::from(chunk[0]);
        let b1 = u32::from(chunk.get(1).copied().unwrap_or(0));
        let b2 = u32::from(chunk.get(2).copied().unwrap_or(0));
        let n = (b0 << 16) | (b1 << 8) | b2;

        let _ = result.write_char(CHARS[(n >> 18 & 0x3F) as usize] as char);
        let _ = result.write_char(CHARS[(n >> 12 & 0x3F) as usize] as char);

        if chunk.len() > 1 {
            let _ = result.write_char(CHARS[(n >> 6 & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
        if chunk.len() > 2 {
            let _ = result.write_char(CHARS[(n & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
    }

    result
}

/// Simple base64 decoding for received QR payloads.
pub fn base64_decode(input: &str) -> Result<Vec<u8>> {
    #[allow(clippy::cast_possible_truncation)]
    const DECODE: [u8; 128] = {
        let mut table = [255u8; 128];
        let chars = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut i = 0;
        while i < 64 {
            table[chars[i] as usize] = i as u8;
            i += 1;
        }
        table
    };

    let input = input.trim_end_matches('=');
    if input.len() % 4 == 1 {
        return Err(Error::WireParse("Invalid base64 length".into()));
    }
    let mut result = Vec::with_capacity(input.len() * 3 / 4);

    for chunk in input.as_bytes().chunks(4) {
        let mut n: u32 = 0;
        for (i, &b) in chunk.iter().enumerate() {
            if b as usize >= 128 || DECODE[b as usize] == 255 {
                return Err(Error::WireParse(format!(
                    "Invalid base64 character: {}",
                    b as char
                )));
            }
            n |= u32::from(DECODE[b as usize]) << (18 - i * 6);
        }

        result.push((n >> 16 & 0xFF) as u8);
        if chunk.len() > 2 {
            result.push((n >> 8 & 0xFF) as u8);
        }
        if chunk.len() > 3 {
            result.push((n & 0xFF) as u8);
        }
    }

    Ok(result)
}
