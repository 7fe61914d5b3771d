//! Registration bookkeeping
//!
//! The provider owns the actual registration; this module only records what
//! the session client knows about it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::AgentId;

/// Current registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// `initialize` has not been called yet
    Unregistered,
    /// Registration in progress, possibly retrying
    Registering,
    /// Successfully registered
    Registered,
    /// Retries exhausted or credentials rejected
    Unavailable,
    /// The transport dropped after a successful registration
    Disconnected,
}

impl RegistrationStatus {
    /// Check if registration is active
    pub fn is_active(&self) -> bool {
        matches!(self, RegistrationStatus::Registered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Unregistered => "unregistered",
            RegistrationStatus::Registering => "registering",
            RegistrationStatus::Registered => "registered",
            RegistrationStatus::Unavailable => "unavailable",
            RegistrationStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about the agent's registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    /// Changes on every `initialize`
    pub id: Uuid,
    pub agent_id: Option<AgentId>,
    pub status: RegistrationStatus,
    /// Attempts made by the most recent `initialize`
    pub attempts: u32,
    /// When last registered successfully
    pub registered_at: Option<DateTime<Utc>>,
}

impl RegistrationInfo {
    pub fn unregistered() -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: None,
            status: RegistrationStatus::Unregistered,
            attempts: 0,
            registered_at: None,
        }
    }

    pub(crate) fn registering(agent_id: AgentId) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: Some(agent_id),
            status: RegistrationStatus::Registering,
            attempts: 0,
            registered_at: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.status.is_active()
    }
}

impl Default for RegistrationInfo {
    fn default() -> Self {
        Self::unregistered()
    }
}
