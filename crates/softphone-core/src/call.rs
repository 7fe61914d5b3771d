//! Call records for the softphone
//!
//! This module holds the call data model: the provider-assigned [`CallId`],
//! the per-call [`CallState`] lifecycle, the live [`Call`] record owned by the
//! call state machine, and the append-only [`CallLog`] written whenever a call
//! reaches a terminal state.
//!
//! Only the state machine mutates calls. Everything else (the session client,
//! the presentation layer, reporting) reads snapshots.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::directory::EntityId;

/// Provider-assigned call identifier, immutable once assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a call
///
/// `idle` is not a state here: a call that does not exist has no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Outbound, waiting for the remote party to answer
    Dialing,
    /// Inbound, waiting for the agent to answer
    Ringing,
    /// Answered, media not yet flowing
    Connecting,
    /// Media is flowing
    Connected,
    /// Parked on hold
    Held,
    /// Normal termination
    Ended,
    /// Abnormal termination (media error, transport loss, provider failure)
    Failed,
    /// Inbound call declined by the agent
    Rejected,
    /// Inbound call never answered
    Missed,
}

impl CallState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended | CallState::Failed | CallState::Rejected | CallState::Missed
        )
    }

    /// Non-terminal and not held: at most one such call exists per session
    pub fn is_foreground(&self) -> bool {
        !self.is_terminal() && *self != CallState::Held
    }

    /// States that force the agent into `on_call`
    pub fn is_live(&self) -> bool {
        matches!(self, CallState::Connecting | CallState::Connected | CallState::Held)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Dialing => "dialing",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Held => "held",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
            CallState::Rejected => "rejected",
            CallState::Missed => "missed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a call from the agent's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Why a call reached its terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    Transferred { target: String },
    Rejected,
    NoAnswer,
    /// Inbound call arrived while another call was in the foreground
    Busy,
    MediaError { reason: String },
    TransportLost { reason: String },
    ProviderFailure { reason: String },
}

/// A call tracked by the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub direction: CallDirection,
    /// Phone number or provider identifier of the other party
    pub remote_address: String,
    pub state: CallState,
    /// Tenant scope at call creation
    pub entity_id: EntityId,
    pub muted: bool,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl Call {
    pub(crate) fn new(
        id: CallId,
        direction: CallDirection,
        remote_address: String,
        entity_id: EntityId,
        state: CallState,
    ) -> Self {
        Self {
            id,
            direction,
            remote_address,
            state,
            entity_id,
            muted: false,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    /// Talk time, if the call ever connected
    pub fn duration(&self) -> Option<chrono::Duration> {
        let connected = self.connected_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some(end - connected)
    }
}

/// Immutable snapshot of a call taken when it reached a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub remote_address: String,
    pub entity_id: EntityId,
    pub final_state: CallState,
    pub end_reason: EndReason,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

impl CallLogEntry {
    pub(crate) fn from_call(call: &Call) -> Self {
        Self {
            call_id: call.id.clone(),
            direction: call.direction,
            remote_address: call.remote_address.clone(),
            entity_id: call.entity_id.clone(),
            final_state: call.state,
            end_reason: call.end_reason.clone().unwrap_or(EndReason::LocalHangup),
            started_at: call.started_at,
            connected_at: call.connected_at,
            ended_at: call.ended_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn talk_seconds(&self) -> i64 {
        self.connected_at
            .map(|c| (self.ended_at - c).num_seconds().max(0))
            .unwrap_or(0)
    }
}

/// Aggregate counters derived from the call log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub total_calls: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub ended: usize,
    pub failed: usize,
    pub rejected: usize,
    pub missed: usize,
}

struct CallLogInner {
    entries: VecDeque<CallLogEntry>,
    finalized: HashSet<CallId>,
}

/// Append-only audit trail of finished calls
///
/// Written only by the call state machine. Shared read access is handed to
/// the callback scheduler (which must only reference finalized calls) and to
/// reporting. With a capacity set the oldest entries are evicted, but their
/// ids stay known as finalized.
pub struct CallLog {
    inner: RwLock<CallLogInner>,
    capacity: Option<usize>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(CallLogInner {
                entries: VecDeque::new(),
                finalized: HashSet::new(),
            }),
            capacity,
        }
    }

    /// Append an entry. Returns false if the call was already finalized.
    pub(crate) fn append(&self, entry: CallLogEntry) -> bool {
        let mut inner = self.inner.write();
        if !inner.finalized.insert(entry.call_id.clone()) {
            return false;
        }
        inner.entries.push_back(entry);
        if let Some(capacity) = self.capacity {
            while inner.entries.len() > capacity {
                inner.entries.pop_front();
            }
        }
        true
    }

    /// Whether the call has reached a terminal state
    pub fn is_finalized(&self, call_id: &CallId) -> bool {
        self.inner.read().finalized.contains(call_id)
    }

    pub fn get(&self, call_id: &CallId) -> Option<CallLogEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .find(|e| &e.call_id == call_id)
            .cloned()
    }

    pub fn entries(&self) -> Vec<CallLogEntry> {
        self.inner.read().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CallStats {
        let inner = self.inner.read();
        let mut stats = CallStats::default();
        for entry in inner.entries.iter() {
            stats.total_calls += 1;
            match entry.direction {
                CallDirection::Inbound => stats.inbound += 1,
                CallDirection::Outbound => stats.outbound += 1,
            }
            match entry.final_state {
                CallState::Ended => stats.ended += 1,
                CallState::Failed => stats.failed += 1,
                CallState::Rejected => stats.rejected += 1,
                CallState::Missed => stats.missed += 1,
                _ => {}
            }
        }
        stats
    }
}

impl Default for CallLog {
    fn default() -> Self {
        Self::new()
    }
}
