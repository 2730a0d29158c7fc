//! Error taxonomy shared by the client, the authenticator and the stream iterator

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Application error codes the server documents as transient.
///
/// 2: service unavailable, 18: QPS limit, 336100: server high load,
/// 336501: RPM limit, 336502: TPM limit.
pub const RETRYABLE_ERROR_CODES: [i64; 5] = [2, 18, 336100, 336501, 336502];

/// Codes meaning the access token was rejected: 110 invalid, 111 expired.
pub const TOKEN_INVALID_ERROR_CODES: [i64; 2] = [110, 111];

#[derive(Error, Debug, Clone)]
pub enum QianfanError {
    /// Caller misuse detected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame or body that cannot be parsed into the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// A well-formed payload that reports a server-side failure
    #[error("{0}")]
    Application(#[from] ApplicationError),
}

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transport,
    Decode,
    Application,
}

impl QianfanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QianfanError::Validation(_) => ErrorKind::Validation,
            QianfanError::Transport(_) => ErrorKind::Transport,
            QianfanError::Decode(_) => ErrorKind::Decode,
            QianfanError::Application(_) => ErrorKind::Application,
        }
    }

    /// Whether a new attempt of the same request could succeed.
    ///
    /// Nothing in this crate retries; this only classifies.
    pub fn is_retryable(&self) -> bool {
        match self {
            QianfanError::Validation(_) | QianfanError::Decode(_) => false,
            QianfanError::Transport(e) => e.is_retryable(),
            QianfanError::Application(e) => e.is_retryable(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        QianfanError::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        QianfanError::Decode(msg.into())
    }
}

impl From<serde_json::Error> for QianfanError {
    fn from(e: serde_json::Error) -> Self {
        QianfanError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for QianfanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return QianfanError::Decode(e.to_string());
        }
        QianfanError::Transport(TransportError::from(e))
    }
}

/// What went wrong below the application layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection or TLS setup failed
    Connect,
    /// The request or an idle read exceeded its deadline
    Timeout,
    /// Non-success HTTP status
    Status(u16),
    /// Reading the response body failed mid-way
    Body,
    /// The peer closed the stream before the end-of-stream marker
    Closed,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connection failed"),
            TransportErrorKind::Timeout => write!(f, "timed out"),
            TransportErrorKind::Status(code) => write!(f, "HTTP {}", code),
            TransportErrorKind::Body => write!(f, "body read failed"),
            TransportErrorKind::Closed => write!(f, "stream closed"),
            TransportErrorKind::Other => write!(f, "request failed"),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(code: u16, body: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Status(code), body)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn is_retryable(&self) -> bool {
        match self.kind {
            TransportErrorKind::Connect
            | TransportErrorKind::Timeout
            | TransportErrorKind::Closed => true,
            TransportErrorKind::Status(code) => code == 429 || code >= 500,
            TransportErrorKind::Body | TransportErrorKind::Other => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if let Some(status) = e.status() {
            TransportErrorKind::Status(status.as_u16())
        } else if e.is_body() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

/// Error object reported by the server inside an otherwise well-formed payload
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("API error {code}: {message}")]
pub struct ApplicationError {
    /// Numeric codes are kept in their decimal string form
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApplicationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            error_type: None,
            request_id: None,
        }
    }

    /// Extract an error report from a decoded JSON payload.
    ///
    /// Recognizes the three shapes the service uses:
    /// - `{"error": {"code": ..., "message": ..., "type": ...}}`
    /// - `{"error": "invalid_client", "error_description": "..."}` (token endpoint)
    /// - `{"error_code": 336003, "error_msg": "..."}`
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let request_id = obj
            .get("id")
            .or_else(|| obj.get("request_id"))
            .or_else(|| obj.get("log_id"))
            .and_then(scalar_to_string);

        if let Some(error) = obj.get("error") {
            if let Some(inner) = error.as_object() {
                let code = inner
                    .get("code")
                    .and_then(scalar_to_string)
                    .unwrap_or_else(|| "unknown".to_string());
                let message = inner
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string();
                let error_type = inner
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Some(Self {
                    code,
                    message,
                    error_type,
                    request_id,
                });
            }
            if let Some(code) = error.as_str() {
                let message = obj
                    .get("error_description")
                    .and_then(Value::as_str)
                    .unwrap_or(code)
                    .to_string();
                return Some(Self {
                    code: code.to_string(),
                    message,
                    error_type: None,
                    request_id,
                });
            }
        }

        let code = obj.get("error_code").and_then(scalar_to_string)?;
        // error_code 0 means success on the legacy endpoints
        if code == "0" {
            return None;
        }
        let message = obj
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        Some(Self {
            code,
            message,
            error_type: None,
            request_id,
        })
    }

    pub fn numeric_code(&self) -> Option<i64> {
        self.code.parse().ok()
    }

    pub fn is_retryable(&self) -> bool {
        self.numeric_code()
            .map(|code| RETRYABLE_ERROR_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// The server no longer accepts the access token that was sent
    pub fn is_token_invalid(&self) -> bool {
        self.numeric_code()
            .map(|code| TOKEN_INVALID_ERROR_CODES.contains(&code))
            .unwrap_or(false)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
