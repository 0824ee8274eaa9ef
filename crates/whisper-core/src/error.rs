//! Centralized error taxonomy for the Weather Whisper client.
//!
//! Every component boundary returns [`ClientError`]. Transport failures are
//! converted at the request gateway, so no raw `reqwest` error escapes. Use
//! `user_message()` for UI display and `field_errors()` for per-field hints.

use std::collections::BTreeMap;

use thiserror::Error;

/// Per-field validation messages, keyed by form field name.
pub type FieldErrors = BTreeMap<String, String>;

/// Top-level client error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Bad input, possibly scoped to individual fields.
    #[error("Validation rejected: {message}")]
    ValidationRejected { message: String, fields: FieldErrors },

    /// 401-class failure: wrong credentials, expired or invalid token.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        /// Login attempts left before lockout, as reported by the server.
        remaining_attempts: Option<u32>,
        /// Lockout end as reported by the server, verbatim.
        locked_until: Option<String>,
    },

    /// No session at all. Detected locally, never reaches the network.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Capacity of {capacity} entries reached")]
    CapacityExceeded { capacity: usize },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Some items of a batch operation failed; carries their identifiers.
    #[error("{} operation(s) failed: {}", .failed.len(), .failed.join(", "))]
    PartialFailure { failed: Vec<String> },
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationRejected {
            message: message.into(),
            fields: FieldErrors::new(),
        }
    }

    pub fn validation_fields(message: impl Into<String>, fields: FieldErrors) -> Self {
        Self::ValidationRejected {
            message: message.into(),
            fields,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            remaining_attempts: None,
            locked_until: None,
        }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and its extracted message to the taxonomy.
    pub fn from_status(status: u16, message: String, fields: FieldErrors) -> Self {
        match status {
            400 | 409 | 422 => Self::ValidationRejected { message, fields },
            401 | 403 => Self::unauthorized(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError { status, message },
        }
    }

    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationRejected { message, .. } if !message.is_empty() => message.clone(),
            Self::ValidationRejected { .. } => "Please check the highlighted fields.".to_string(),
            Self::Unauthorized {
                message,
                remaining_attempts: Some(left),
                ..
            } => format!("{} (remaining attempts: {})", message, left),
            Self::Unauthorized { message, .. } if !message.is_empty() => message.clone(),
            Self::Unauthorized { .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Unauthenticated => "Please sign in to continue.".to_string(),
            Self::CapacityExceeded { capacity } => {
                format!("You can save at most {} favorite locations.", capacity)
            }
            Self::DuplicateEntry(_) => "This location is already in your favorites.".to_string(),
            Self::NotFound(_) => "The requested item no longer exists.".to_string(),
            Self::NetworkUnreachable(_) => {
                "Unable to connect. Check your internet connection.".to_string()
            }
            Self::ServerError { status, .. } if *status >= 500 => {
                "The server is experiencing issues. Please try again later.".to_string()
            }
            Self::ServerError { .. } => "The request failed. Please try again.".to_string(),
            Self::PartialFailure { failed } => format!(
                "{} favorite location(s) could not be removed. Please try again.",
                failed.len()
            ),
        }
    }

    /// Field-scoped messages, present only for validation-shaped errors.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::ValidationRejected { fields, .. } if !fields.is_empty() => Some(fields),
            _ => None,
        }
    }

    /// Whether the caller should send the user back through sign-in.
    pub fn should_reauthenticate(&self) -> bool {
        match self {
            Self::Unauthenticated => true,
            Self::Unauthorized {
                remaining_attempts, ..
            } => remaining_attempts.is_none(),
            _ => false,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkUnreachable(_) | Self::PartialFailure { .. } => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_client_error(self) -> ClientError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_client_error(self) -> ClientError {
        if self.is_timeout() || self.is_connect() || self.is_request() {
            ClientError::NetworkUnreachable(self.to_string())
        } else if self.is_decode() {
            ClientError::server(0, format!("Invalid response: {}", self))
        } else if let Some(status) = self.status() {
            ClientError::from_status(status.as_u16(), self.to_string(), FieldErrors::new())
        } else {
            ClientError::NetworkUnreachable(self.to_string())
        }
    }
}
