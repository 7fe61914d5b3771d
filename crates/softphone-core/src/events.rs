//! Events and state snapshots published by the session client
//!
//! Two channels leave the session actor:
//!
//! - [`AgentSoftphoneState`] snapshots on a `watch` channel. The latest value
//!   is all a UI needs to render.
//! - [`SoftphoneEvent`]s on a `broadcast` channel, one per discrete thing
//!   that happened, for consumers that care about edges (notifications,
//!   audit, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{Call, CallId, CallLogEntry, CallState};
use crate::callbacks::Callback;
use crate::registration::RegistrationInfo;
use crate::status::AgentStatus;

/// Event priority levels for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// Routine status updates
    Low,
    /// State changes
    Normal,
    /// Incoming calls, surfaced errors
    High,
    /// Session loss
    Critical,
}

/// Discrete softphone events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SoftphoneEvent {
    Registered {
        agent_id: String,
        attempts: u32,
    },
    RegistrationFailed {
        reason: String,
        attempts: u32,
    },
    CallStateChanged {
        call_id: CallId,
        previous: Option<CallState>,
        new: CallState,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    IncomingCall {
        call_id: CallId,
        from: String,
    },
    /// A call reached a terminal state and was logged
    CallLogged {
        entry: CallLogEntry,
    },
    MuteChanged {
        call_id: CallId,
        muted: bool,
    },
    StatusChanged {
        previous: AgentStatus,
        new: AgentStatus,
        unassigned: bool,
    },
    CallbackSuggested {
        callback: Callback,
    },
    TransportLost {
        reason: String,
    },
    /// A command reached the provider and the provider refused it
    CommandFailed {
        call_id: Option<CallId>,
        operation: String,
        reason: String,
    },
    ProviderEventDropped {
        event: String,
        reason: String,
    },
}

impl SoftphoneEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            SoftphoneEvent::TransportLost { .. } => EventPriority::Critical,
            SoftphoneEvent::IncomingCall { .. }
            | SoftphoneEvent::RegistrationFailed { .. }
            | SoftphoneEvent::CommandFailed { .. } => EventPriority::High,
            SoftphoneEvent::CallStateChanged { new, .. } if *new == CallState::Failed => EventPriority::High,
            SoftphoneEvent::Registered { .. }
            | SoftphoneEvent::CallStateChanged { .. }
            | SoftphoneEvent::CallLogged { .. }
            | SoftphoneEvent::MuteChanged { .. }
            | SoftphoneEvent::StatusChanged { .. }
            | SoftphoneEvent::CallbackSuggested { .. } => EventPriority::Normal,
            SoftphoneEvent::ProviderEventDropped { .. } => EventPriority::Low,
        }
    }

    /// Get the call ID associated with this event (if any)
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            SoftphoneEvent::CallStateChanged { call_id, .. }
            | SoftphoneEvent::IncomingCall { call_id, .. }
            | SoftphoneEvent::MuteChanged { call_id, .. } => Some(call_id),
            SoftphoneEvent::CallLogged { entry } => Some(&entry.call_id),
            SoftphoneEvent::CallbackSuggested { callback } => callback.related_call_id.as_ref(),
            SoftphoneEvent::CommandFailed { call_id, .. } => call_id.as_ref(),
            _ => None,
        }
    }
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSoftphoneState {
    pub agent_status: AgentStatus,
    /// The agent belongs to no queue and will receive no inbound distribution
    pub unassigned: bool,
    pub registration: RegistrationInfo,
    /// The foreground call, if any
    pub active_call: Option<Call>,
    pub held_call: Option<Call>,
    /// Set for exactly one published snapshot
    pub last_error: Option<String>,
}

impl AgentSoftphoneState {
    pub fn has_call(&self) -> bool {
        self.active_call.is_some() || self.held_call.is_some()
    }
}

impl Default for AgentSoftphoneState {
    fn default() -> Self {
        Self {
            agent_status: AgentStatus::Offline,
            unassigned: true,
            registration: RegistrationInfo::unregistered(),
            active_call: None,
            held_call: None,
            last_error: None,
        }
    }
}
