//! Agent status coordination
//!
//! The coordinator owns the agent's presence. The effective status is a pure
//! function of three inputs: the last status the agent explicitly asked for,
//! whether a call is live (`connecting`, `connected` or `held`), and how many
//! queues the agent belongs to. See [`reconcile`].
//!
//! `on_call` is derived only. It can never be requested.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SoftphoneError, SoftphoneResult};

/// Agent presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready to take calls
    Available,
    /// Signed in but not taking queue calls
    Busy,
    /// Derived while a call is live
    OnCall,
    /// Not taking calls
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::OnCall => "on_call",
            AgentStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(AgentStatus::Available),
            "busy" => Ok(AgentStatus::Busy),
            "on_call" | "oncall" | "on-call" => Ok(AgentStatus::OnCall),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("Unknown agent status: {}", other)),
        }
    }
}

/// The status presented to the rest of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveStatus {
    pub status: AgentStatus,
    /// No queue membership: the agent receives no inbound distribution
    pub unassigned: bool,
}

/// Compute the effective status
///
/// Rules, in order:
/// 1. zero queue memberships sets the informational `unassigned` flag
/// 2. a live call forces `on_call`
/// 3. otherwise the last explicitly requested status applies
pub fn reconcile(requested: AgentStatus, live_call: bool, queue_memberships: usize) -> EffectiveStatus {
    let unassigned = queue_memberships == 0;
    let status = if live_call { AgentStatus::OnCall } else { requested };
    EffectiveStatus { status, unassigned }
}

/// Tracks the explicitly requested status and queue membership count
#[derive(Debug, Clone)]
pub struct AgentStatusCoordinator {
    requested: AgentStatus,
    queue_memberships: usize,
    has_registered: bool,
}

impl AgentStatusCoordinator {
    pub fn new() -> Self {
        Self {
            requested: AgentStatus::Offline,
            queue_memberships: 0,
            has_registered: false,
        }
    }

    pub fn requested(&self) -> AgentStatus {
        self.requested
    }

    pub fn queue_memberships(&self) -> usize {
        self.queue_memberships
    }

    pub fn set_queue_memberships(&mut self, count: usize) {
        self.queue_memberships = count;
    }

    /// Called after each successful registration
    ///
    /// The very first one defaults the agent to `available`. Later ones keep
    /// whatever was requested, so an agent forced offline by a transport loss
    /// stays offline until they ask otherwise.
    pub fn on_registered(&mut self) {
        if !self.has_registered {
            self.has_registered = true;
            self.requested = AgentStatus::Available;
            info!("First registration, agent defaults to available");
        }
    }

    /// Apply an explicit status request from the agent
    ///
    /// `offline` during a live call is accepted and takes effect when the call
    /// ends. Anything else during a live call is rejected.
    pub fn request(&mut self, to: AgentStatus, live_call: bool) -> SoftphoneResult<()> {
        let current = self.effective(live_call).status;

        if to == AgentStatus::OnCall {
            return Err(SoftphoneError::InvalidTransition {
                from: current,
                to,
                reason: "on_call is derived from call state and cannot be set".to_string(),
            });
        }

        if live_call && to != AgentStatus::Offline {
            return Err(SoftphoneError::InvalidTransition {
                from: current,
                to,
                reason: "a call is in progress".to_string(),
            });
        }

        debug!(from = %self.requested, to = %to, live_call, "Agent status requested");
        self.requested = to;
        Ok(())
    }

    /// Transport loss: the agent is offline regardless of what they asked for
    pub fn force_offline(&mut self) {
        self.requested = AgentStatus::Offline;
    }

    pub fn effective(&self, live_call: bool) -> EffectiveStatus {
        reconcile(self.requested, live_call, self.queue_memberships)
    }
}

impl Default for AgentStatusCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_rules() {
        assert_eq!(
            reconcile(AgentStatus::Available, false, 0),
            EffectiveStatus { status: AgentStatus::Available, unassigned: true }
        );
        assert_eq!(reconcile(AgentStatus::Busy, true, 2).status, AgentStatus::OnCall);
        assert!(!reconcile(AgentStatus::Busy, true, 2).unassigned);
        assert_eq!(reconcile(AgentStatus::Offline, false, 1).status, AgentStatus::Offline);
    }

    #[test]
    fn test_first_registration_defaults_available() {
        let mut coordinator = AgentStatusCoordinator::new();
        assert_eq!(coordinator.effective(false).status, AgentStatus::Offline);

        coordinator.on_registered();
        assert_eq!(coordinator.effective(false).status, AgentStatus::Available);

        coordinator.force_offline();
        coordinator.on_registered();
        assert_eq!(coordinator.effective(false).status, AgentStatus::Offline);
    }

    #[test]
    fn test_on_call_cannot_be_requested() {
        let mut coordinator = AgentStatusCoordinator::new();
        coordinator.on_registered();
        let err = coordinator.request(AgentStatus::OnCall, false).unwrap_err();
        assert!(matches!(err, SoftphoneError::InvalidTransition { to: AgentStatus::OnCall, .. }));
    }

    #[test]
    fn test_available_rejected_mid_call() {
        let mut coordinator = AgentStatusCoordinator::new();
        coordinator.on_registered();
        coordinator.request(AgentStatus::Busy, false).unwrap();

        let err = coordinator.request(AgentStatus::Available, true).unwrap_err();
        assert!(matches!(
            err,
            SoftphoneError::InvalidTransition { from: AgentStatus::OnCall, to: AgentStatus::Available, .. }
        ));
        assert_eq!(coordinator.effective(true).status, AgentStatus::OnCall);
        // prior explicit status comes back once the call ends
        assert_eq!(coordinator.effective(false).status, AgentStatus::Busy);
    }

    #[test]
    fn test_offline_requested_mid_call_wins_after_call() {
        let mut coordinator = AgentStatusCoordinator::new();
        coordinator.on_registered();
        coordinator.request(AgentStatus::Offline, true).unwrap();
        assert_eq!(coordinator.effective(true).status, AgentStatus::OnCall);
        assert_eq!(coordinator.effective(false).status, AgentStatus::Offline);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Available".parse::<AgentStatus>().unwrap(), AgentStatus::Available);
        assert_eq!("on-call".parse::<AgentStatus>().unwrap(), AgentStatus::OnCall);
        assert!("away".parse::<AgentStatus>().is_err());
    }
}
