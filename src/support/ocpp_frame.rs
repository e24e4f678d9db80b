//! OCPP-J message framing
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{json, Value};
use thiserror::Error;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

/// CallError codes defined by OCPP-J 1.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    FormationViolation,
    PropertyConstraintViolation,
    GenericError,
}

impl OcppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Error)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("OCPP message is not a JSON array")]
    NotAnArray,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(Value),
    #[error("Malformed {kind} frame: {reason}")]
    Malformed {
        kind: &'static str,
        reason: &'static str,
    },
}

impl OcppFrame {
    /// Parse raw WebSocket text into a frame.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value = serde_json::from_str(text)?;
        let items = value.as_array().ok_or(OcppFrameError::NotAnArray)?;

        match items.as_slice() {
            [t, id, action, payload, ..] if t.as_u64() == Some(MSG_TYPE_CALL) => Ok(Self::Call {
                unique_id: text_field(id, "call", "uniqueId must be a string")?,
                action: text_field(action, "call", "action must be a string")?,
                payload: payload.clone(),
            }),
            [t, ..] if t.as_u64() == Some(MSG_TYPE_CALL) => Err(OcppFrameError::Malformed {
                kind: "call",
                reason: "expected 4 elements",
            }),
            [t, id, rest @ ..] if t.as_u64() == Some(MSG_TYPE_CALL_RESULT) => {
                Ok(Self::CallResult {
                    unique_id: text_field(id, "result", "uniqueId must be a string")?,
                    payload: rest.first().cloned().unwrap_or_else(|| json!({})),
                })
            }
            [t, id, code, rest @ ..] if t.as_u64() == Some(MSG_TYPE_CALL_ERROR) => {
                Ok(Self::CallError {
                    unique_id: text_field(id, "error", "uniqueId must be a string")?,
                    error_code: code
                        .as_str()
                        .unwrap_or(OcppErrorCode::InternalError.as_str())
                        .to_string(),
                    error_description: rest
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    error_details: rest.get(1).cloned().unwrap_or_else(|| json!({})),
                })
            }
            [t, ..] if matches!(t.as_u64(), Some(MSG_TYPE_CALL_RESULT | MSG_TYPE_CALL_ERROR)) => {
                Err(OcppFrameError::Malformed {
                    kind: "response",
                    reason: "too few elements",
                })
            }
            [t, ..] => Err(OcppFrameError::UnknownMessageType(t.clone())),
            [] => Err(OcppFrameError::Malformed {
                kind: "empty",
                reason: "no message type",
            }),
        }
    }

    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    pub fn error_response(
        unique_id: impl Into<String>,
        code: OcppErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: code.as_str().to_string(),
            error_description: description.into(),
            error_details: json!({}),
        }
    }

    /// Serialize this frame to its wire text.
    pub fn serialize(&self) -> String {
        let value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([MSG_TYPE_CALL, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => {
                json!([MSG_TYPE_CALL_RESULT, unique_id, payload])
            }
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MSG_TYPE_CALL_ERROR,
                unique_id,
                error_code,
                error_description,
                error_details
            ]),
        };
        value.to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }
}

fn text_field(
    value: &Value,
    kind: &'static str,
    reason: &'static str,
) -> Result<String, OcppFrameError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(OcppFrameError::Malformed { kind, reason })
}
