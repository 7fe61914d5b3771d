//! Error types and handling for the softphone core
//!
//! Every fallible operation in this crate returns [`SoftphoneResult`]. The
//! variants fall into a handful of categories that drive how callers react:
//!
//! - **Registration** - the provider is unreachable or rejected the agent.
//!   Transport problems are retried with backoff by `initialize`; credential
//!   problems are not.
//! - **Caller misuse** - `AlreadyOnCall`, `InvalidCallState`,
//!   `InvalidTransition` and friends. Surfaced synchronously, never retried,
//!   and never forwarded to the provider.
//! - **Session loss** - `TransportLost` forces every live call to `failed` and
//!   the agent `offline`; only a fresh `initialize` recovers.
//! - **Media** - a media failure ends the affected call and nothing else.
//!
//! ```rust
//! use softphone_core::{CallId, SoftphoneError};
//!
//! let err = SoftphoneError::AlreadyOnCall { call_id: CallId::from("CA-1") };
//! assert!(err.is_caller_misuse());
//! assert!(!err.is_recoverable());
//! assert_eq!(err.category(), "call");
//! ```

use thiserror::Error;
use uuid::Uuid;

use crate::call::{CallId, CallState};
use crate::status::AgentStatus;

/// Result alias used across the crate
pub type SoftphoneResult<T> = Result<T, SoftphoneError>;

/// Comprehensive error type for softphone operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SoftphoneError {
    /// Registration errors
    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("Credentials rejected by provider: {reason}")]
    CredentialsRejected { reason: String },

    #[error("Softphone is not registered")]
    NotRegistered,

    #[error("Provider unavailable after {attempts} registration attempts")]
    Unavailable { attempts: u32 },

    #[error("Softphone disabled for entity {entity_id}: {reason}")]
    SoftphoneDisabled { entity_id: String, reason: String },

    /// Call control errors
    #[error("Another call is already in the foreground: {call_id}")]
    AlreadyOnCall { call_id: CallId },

    #[error("Invalid call state for call {call_id}: cannot {operation} while {current_state}")]
    InvalidCallState {
        call_id: CallId,
        operation: String,
        current_state: CallState,
    },

    #[error("Hold slot already used by call {held_call}")]
    HoldSlotOccupied { held_call: CallId },

    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: CallId },

    /// Agent status errors
    #[error("Invalid status transition: {from} -> {to} ({reason})")]
    InvalidTransition {
        from: AgentStatus,
        to: AgentStatus,
        reason: String,
    },

    #[error("Agent cannot place calls while {status}")]
    AgentUnavailable { status: AgentStatus },

    /// Session and media errors
    #[error("Transport lost: {reason}")]
    TransportLost { reason: String },

    #[error("Media error on call {call_id}: {reason}")]
    MediaError { call_id: CallId, reason: String },

    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    #[error("Provider error during {operation}: {reason}")]
    ProviderError { operation: String, reason: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    /// Callback and registry errors
    #[error("Callback not found: {callback_id}")]
    CallbackNotFound { callback_id: Uuid },

    #[error("Invalid callback: {reason}")]
    InvalidCallback { reason: String },

    #[error("Queue not found: {queue_id}")]
    QueueNotFound { queue_id: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Generic errors
    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Softphone has been shut down")]
    ShutDown,
}

impl SoftphoneError {
    /// Create a registration failed error
    pub fn registration_failed(reason: impl Into<String>) -> Self {
        Self::RegistrationFailed { reason: reason.into() }
    }

    /// Create a network error
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    /// Create a provider error for the named operation
    pub fn provider(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderError {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Create an invalid call state error
    pub fn invalid_call_state(
        call_id: &CallId,
        operation: impl Into<String>,
        current_state: CallState,
    ) -> Self {
        Self::InvalidCallState {
            call_id: call_id.clone(),
            operation: operation.into(),
            current_state,
        }
    }

    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SoftphoneError::NetworkError { .. }
                | SoftphoneError::OperationTimeout { .. }
                | SoftphoneError::ProviderError { .. }
        )
    }

    /// Check if the error was caused by the caller asking for something illegal
    pub fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            SoftphoneError::AlreadyOnCall { .. }
                | SoftphoneError::InvalidCallState { .. }
                | SoftphoneError::HoldSlotOccupied { .. }
                | SoftphoneError::InvalidTransition { .. }
                | SoftphoneError::AgentUnavailable { .. }
                | SoftphoneError::CallNotFound { .. }
                | SoftphoneError::NotRegistered
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            SoftphoneError::RegistrationFailed { .. }
            | SoftphoneError::CredentialsRejected { .. }
            | SoftphoneError::NotRegistered
            | SoftphoneError::Unavailable { .. }
            | SoftphoneError::SoftphoneDisabled { .. } => "registration",

            SoftphoneError::AlreadyOnCall { .. }
            | SoftphoneError::InvalidCallState { .. }
            | SoftphoneError::HoldSlotOccupied { .. }
            | SoftphoneError::CallNotFound { .. } => "call",

            SoftphoneError::InvalidTransition { .. }
            | SoftphoneError::AgentUnavailable { .. } => "status",

            SoftphoneError::TransportLost { .. }
            | SoftphoneError::NetworkError { .. }
            | SoftphoneError::ProviderError { .. }
            | SoftphoneError::OperationTimeout { .. } => "network",

            SoftphoneError::MediaError { .. } => "media",

            SoftphoneError::CallbackNotFound { .. }
            | SoftphoneError::InvalidCallback { .. } => "callback",

            SoftphoneError::QueueNotFound { .. } => "directory",

            SoftphoneError::InvalidConfiguration { .. } => "configuration",

            SoftphoneError::InternalError { .. } | SoftphoneError::ShutDown => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let misuse = SoftphoneError::InvalidTransition {
            from: AgentStatus::OnCall,
            to: AgentStatus::Available,
            reason: "call in progress".to_string(),
        };
        assert_eq!(misuse.category(), "status");
        assert!(misuse.is_caller_misuse());
        assert!(!misuse.is_recoverable());

        let network = SoftphoneError::network_error("socket closed");
        assert_eq!(network.category(), "network");
        assert!(network.is_recoverable());
        assert!(!network.is_caller_misuse());

        let creds = SoftphoneError::CredentialsRejected { reason: "bad token".to_string() };
        assert_eq!(creds.category(), "registration");
        assert!(!creds.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = SoftphoneError::invalid_call_state(&CallId::from("CA-9"), "hold", CallState::Ringing);
        assert_eq!(
            err.to_string(),
            "Invalid call state for call CA-9: cannot hold while ringing"
        );
    }
}
