//! Wire schema for gateway/worker communication.
//!
//! The gateway and the scanner worker exchange newline-delimited JSON over
//! the worker's stdio. The gateway writes one `ScanRequest` line at
//! dispatch; the worker then pushes `WorkerOp` lines at the gateway and
//! receives an `ExportReply` line for each `export` op. Message bodies
//! travel base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanError;

/// First line written to the worker when a scan is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Identity of the message being scanned.
    pub message_id: Uuid,

    /// Capability token the worker must echo on every op.
    pub token: Uuid,

    /// ISO 8601 dispatch timestamp.
    pub timestamp: String,
}

impl ScanRequest {
    pub fn new(message_id: Uuid, token: Uuid) -> Self {
        Self {
            message_id,
            token,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string(self)
            .map_err(|e| ScanError::Protocol(format!("failed to serialize scan request: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        serde_json::from_str(json)
            .map_err(|e| ScanError::Protocol(format!("invalid scan request: {e}")))
    }
}

/// Operations the worker pushes back at the gateway, one JSON line each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WorkerOp {
    /// Worker wants the current message body.
    Export { token: Uuid },

    /// Worker supplies a full replacement body (base64).
    Replace { token: Uuid, body: String },

    /// Worker is finished with this message.
    Done { token: Uuid },
}

impl WorkerOp {
    pub fn token(&self) -> Uuid {
        match self {
            WorkerOp::Export { token }
            | WorkerOp::Replace { token, .. }
            | WorkerOp::Done { token } => *token,
        }
    }

    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string(self)
            .map_err(|e| ScanError::Protocol(format!("failed to serialize worker op: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        serde_json::from_str(json)
            .map_err(|e| ScanError::Protocol(format!("invalid worker op: {e}")))
    }
}

/// Gateway reply to an `export` op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReply {
    /// Current message body, base64.
    pub body: String,
}

impl ExportReply {
    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string(self)
            .map_err(|e| ScanError::Protocol(format!("failed to serialize export reply: {e}")))
    }
}

pub fn encode_body(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_body(encoded: &str) -> Result<Vec<u8>, ScanError> {
    BASE64
        .decode(encoded)
        .map_err(|e| ScanError::Protocol(format!("invalid base64 body: {e}")))
}
