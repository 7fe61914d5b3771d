//! Call state machine
//!
//! The only writer of call state. Local commands and provider events are both
//! reduced to transitions here, and every terminal transition writes exactly
//! one [`CallLogEntry`].
//!
//! ```text
//!   dial() ──► dialing ──┐
//!                        ├─ connected ─► connecting ─► connected ◄─► held
//!   incoming ► ringing ──┘                   │            │          │
//!                │                           └────────────┴──────────┴─► ended | failed
//!                ├─ reject() ─► rejected
//!                └─ timeout ──► missed
//! ```
//!
//! Races between a local command and a provider event are settled in favour
//! of the provider: whichever arrives first applies, and anything that later
//! targets a finalized call is a no-op (commands) or dropped (events).
//!
//! Invariants held after every operation:
//! - at most one call is in the foreground (non-terminal and not held)
//! - at most one call is held

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::call::{Call, CallDirection, CallId, CallLog, CallLogEntry, CallState, EndReason};
use crate::directory::EntityId;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::provider::ProviderEvent;

/// One state change of one call
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub call_id: CallId,
    /// `None` when the call was just created
    pub from: Option<CallState>,
    pub to: CallState,
    pub reason: Option<String>,
}

/// What an operation changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub transitions: Vec<Transition>,
    /// Log entries written by this operation, in order
    pub finalized: Vec<CallLogEntry>,
    /// Call whose mute flag changed, with the new value
    pub muted: Option<(CallId, bool)>,
}

impl Applied {
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty() && self.muted.is_none()
    }
}

/// Result of feeding a provider event or timer into the machine
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Applied(Applied),
    /// Valid but already reflected in the current state
    Ignored,
    /// The event does not fit any tracked call
    Dropped { reason: String },
}

/// Agent-issued call commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    Answer,
    Reject,
    Hangup,
    Hold,
    Resume,
    Mute(bool),
    Transfer(String),
}

impl CallCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CallCommand::Answer => "answer",
            CallCommand::Reject => "reject",
            CallCommand::Hangup => "hangup",
            CallCommand::Hold => "hold",
            CallCommand::Resume => "resume",
            CallCommand::Mute(_) => "mute",
            CallCommand::Transfer(_) => "transfer",
        }
    }
}

/// Whether a command should reach the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// The requested effect is already in place
    AlreadyApplied,
}

pub struct CallStateMachine {
    calls: HashMap<CallId, Call>,
    call_log: Arc<CallLog>,
}

impl CallStateMachine {
    pub fn new(call_log: Arc<CallLog>) -> Self {
        Self {
            calls: HashMap::new(),
            call_log,
        }
    }

    pub fn call_log(&self) -> &Arc<CallLog> {
        &self.call_log
    }

    pub fn get(&self, call_id: &CallId) -> Option<&Call> {
        self.calls.get(call_id)
    }

    /// Non-terminal calls
    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.calls.values()
    }

    pub fn foreground(&self) -> Option<&Call> {
        self.calls.values().find(|c| c.state.is_foreground())
    }

    pub fn held(&self) -> Option<&Call> {
        self.calls.values().find(|c| c.state == CallState::Held)
    }

    /// A call is connecting, connected or held
    pub fn has_live_call(&self) -> bool {
        self.calls.values().any(|c| c.state.is_live())
    }

    pub fn is_idle(&self) -> bool {
        self.calls.is_empty()
    }

    /// Check the invariants; used by tests and debug assertions
    pub fn invariants_hold(&self) -> bool {
        let foreground = self.calls.values().filter(|c| c.state.is_foreground()).count();
        let held = self.calls.values().filter(|c| c.state == CallState::Held).count();
        let terminal = self.calls.values().filter(|c| c.state.is_terminal()).count();
        foreground <= 1 && held <= 1 && terminal == 0
    }

    /// Make sure a new outbound call would not break the foreground invariant
    pub fn ensure_can_dial(&self) -> SoftphoneResult<()> {
        match self.foreground() {
            Some(call) => Err(SoftphoneError::AlreadyOnCall { call_id: call.id.clone() }),
            None => Ok(()),
        }
    }

    /// Track a call the provider accepted for dialing
    pub fn start_outbound(
        &mut self,
        call_id: CallId,
        destination: String,
        entity_id: EntityId,
    ) -> SoftphoneResult<Applied> {
        self.ensure_can_dial()?;
        if self.calls.contains_key(&call_id) || self.call_log.is_finalized(&call_id) {
            return Err(SoftphoneError::internal_error(format!(
                "provider reused call id {}",
                call_id
            )));
        }

        let call = Call::new(
            call_id.clone(),
            CallDirection::Outbound,
            destination,
            entity_id,
            CallState::Dialing,
        );
        info!(call_id = %call_id, to = %call.remote_address, "Outbound call dialing");
        self.calls.insert(call_id.clone(), call);

        Ok(Applied {
            transitions: vec![Transition {
                call_id,
                from: None,
                to: CallState::Dialing,
                reason: Some("dial".to_string()),
            }],
            ..Default::default()
        })
    }

    /// Validate a command before anything is sent to the provider
    pub fn admit(&self, call_id: &CallId, command: &CallCommand) -> SoftphoneResult<Admission> {
        let Some(call) = self.calls.get(call_id) else {
            if self.call_log.is_finalized(call_id) {
                debug!(call_id = %call_id, command = command.name(), "Command targets a finished call, no-op");
                return Ok(Admission::AlreadyApplied);
            }
            return Err(SoftphoneError::CallNotFound { call_id: call_id.clone() });
        };

        let state = call.state;
        let invalid = || Err(SoftphoneError::invalid_call_state(call_id, command.name(), state));

        match command {
            CallCommand::Answer => match state {
                CallState::Ringing => {
                    if let Some(other) = self.other_foreground(call_id) {
                        return Err(SoftphoneError::AlreadyOnCall { call_id: other.id.clone() });
                    }
                    Ok(Admission::Proceed)
                }
                CallState::Connecting | CallState::Connected | CallState::Held => Ok(Admission::AlreadyApplied),
                _ => invalid(),
            },
            CallCommand::Reject => match state {
                CallState::Ringing => Ok(Admission::Proceed),
                _ => invalid(),
            },
            CallCommand::Hangup => Ok(Admission::Proceed),
            CallCommand::Hold => match state {
                CallState::Connected => match self.held() {
                    Some(held) => Err(SoftphoneError::HoldSlotOccupied { held_call: held.id.clone() }),
                    None => Ok(Admission::Proceed),
                },
                CallState::Held => Ok(Admission::AlreadyApplied),
                _ => invalid(),
            },
            CallCommand::Resume => match state {
                CallState::Held => match self.other_foreground(call_id) {
                    Some(other) => Err(SoftphoneError::AlreadyOnCall { call_id: other.id.clone() }),
                    None => Ok(Admission::Proceed),
                },
                CallState::Connected => Ok(Admission::AlreadyApplied),
                _ => invalid(),
            },
            CallCommand::Mute(muted) => match state {
                CallState::Connecting | CallState::Connected | CallState::Held => {
                    if call.muted == *muted {
                        Ok(Admission::AlreadyApplied)
                    } else {
                        Ok(Admission::Proceed)
                    }
                }
                _ => invalid(),
            },
            CallCommand::Transfer(_) => match state {
                CallState::Connected | CallState::Held => Ok(Admission::Proceed),
                _ => invalid(),
            },
        }
    }

    /// Apply a command the provider has acknowledged
    pub fn commit(&mut self, call_id: &CallId, command: CallCommand) -> SoftphoneResult<Applied> {
        if self.admit(call_id, &command)? == Admission::AlreadyApplied {
            return Ok(Applied::default());
        }

        let applied = match command {
            CallCommand::Answer => self.move_to(call_id, CallState::Connecting, "answered"),
            CallCommand::Reject => self.finish(call_id, CallState::Rejected, EndReason::Rejected),
            CallCommand::Hangup => self.finish(call_id, CallState::Ended, EndReason::LocalHangup),
            CallCommand::Hold => self.move_to(call_id, CallState::Held, "hold"),
            CallCommand::Resume => self.move_to(call_id, CallState::Connected, "resume"),
            CallCommand::Mute(muted) => {
                if let Some(call) = self.calls.get_mut(call_id) {
                    call.muted = muted;
                }
                Applied { muted: Some((call_id.clone(), muted)), ..Default::default() }
            }
            CallCommand::Transfer(target) => {
                self.finish(call_id, CallState::Ended, EndReason::Transferred { target })
            }
        };
        debug_assert!(self.invariants_hold());
        Ok(applied)
    }

    /// End a call abnormally after a provider round trip for it failed
    pub fn fail(&mut self, call_id: &CallId, reason: String) -> Applied {
        if !self.calls.contains_key(call_id) {
            return Applied::default();
        }
        self.finish(call_id, CallState::Failed, EndReason::ProviderFailure { reason })
    }

    /// Feed one provider event
    pub fn on_provider_event(&mut self, event: &ProviderEvent, default_entity: &EntityId) -> EventOutcome {
        let outcome = match event {
            ProviderEvent::Incoming { call_id, from, entity_id } => {
                self.on_incoming(call_id, from, entity_id.clone().unwrap_or_else(|| default_entity.clone()))
            }
            ProviderEvent::TransportLost { reason } => {
                let applied = self.fail_all(reason);
                if applied.is_noop() {
                    EventOutcome::Ignored
                } else {
                    EventOutcome::Applied(applied)
                }
            }
            other => {
                let Some(call_id) = other.call_id() else {
                    return EventOutcome::Ignored;
                };
                let Some(state) = self.calls.get(call_id).map(|c| c.state) else {
                    let reason = if self.call_log.is_finalized(call_id) {
                        format!("{} arrived after call {} finished", other.name(), call_id)
                    } else {
                        format!("{} for untracked call {}", other.name(), call_id)
                    };
                    return EventOutcome::Dropped { reason };
                };
                self.on_call_event(call_id, state, other)
            }
        };
        debug_assert!(self.invariants_hold());
        outcome
    }

    /// The ringing window for `call_id` elapsed
    pub fn on_ring_timeout(&mut self, call_id: &CallId) -> EventOutcome {
        match self.calls.get(call_id).map(|c| c.state) {
            Some(CallState::Ringing) => {
                info!(call_id = %call_id, "Ringing call was not answered in time");
                EventOutcome::Applied(self.finish(call_id, CallState::Missed, EndReason::NoAnswer))
            }
            _ => EventOutcome::Ignored,
        }
    }

    /// An answered call never saw the provider's `connected` event
    pub fn on_connect_timeout(&mut self, call_id: &CallId) -> EventOutcome {
        match self.calls.get(call_id).map(|c| c.state) {
            Some(CallState::Connecting) => {
                warn!(call_id = %call_id, "Answered call was never connected by the provider");
                EventOutcome::Applied(self.finish(
                    call_id,
                    CallState::Failed,
                    EndReason::ProviderFailure {
                        reason: "provider did not connect the answered call".to_string(),
                    },
                ))
            }
            _ => EventOutcome::Ignored,
        }
    }

    /// Force every non-terminal call to `failed`
    pub fn fail_all(&mut self, reason: &str) -> Applied {
        let mut ids: Vec<CallId> = self.calls.keys().cloned().collect();
        ids.sort();
        let mut applied = Applied::default();
        for call_id in ids {
            let step = self.finish(
                &call_id,
                CallState::Failed,
                EndReason::TransportLost { reason: reason.to_string() },
            );
            applied.transitions.extend(step.transitions);
            applied.finalized.extend(step.finalized);
        }
        applied
    }

    fn on_incoming(&mut self, call_id: &CallId, from: &str, entity_id: EntityId) -> EventOutcome {
        if self.calls.contains_key(call_id) {
            return EventOutcome::Ignored;
        }
        if self.call_log.is_finalized(call_id) {
            return EventOutcome::Dropped {
                reason: format!("incoming for already finished call {}", call_id),
            };
        }

        let busy = self.foreground().is_some();
        let call = Call::new(
            call_id.clone(),
            CallDirection::Inbound,
            from.to_string(),
            entity_id,
            CallState::Ringing,
        );
        self.calls.insert(call_id.clone(), call);

        let mut applied = Applied {
            transitions: vec![Transition {
                call_id: call_id.clone(),
                from: None,
                to: CallState::Ringing,
                reason: Some("incoming".to_string()),
            }],
            ..Default::default()
        };

        if busy {
            info!(call_id = %call_id, from, "Incoming call while another call is in the foreground");
            let step = self.finish(call_id, CallState::Missed, EndReason::Busy);
            applied.transitions.extend(step.transitions);
            applied.finalized.extend(step.finalized);
        } else {
            info!(call_id = %call_id, from, "Incoming call ringing");
        }
        EventOutcome::Applied(applied)
    }

    fn on_call_event(&mut self, call_id: &CallId, state: CallState, event: &ProviderEvent) -> EventOutcome {
        match (event, state) {
            (ProviderEvent::Connected { .. }, CallState::Dialing | CallState::Ringing) => {
                let mut applied = self.move_to(call_id, CallState::Connecting, "connected");
                let step = self.move_to(call_id, CallState::Connected, "connected");
                applied.transitions.extend(step.transitions);
                EventOutcome::Applied(applied)
            }
            (ProviderEvent::Connected { .. }, CallState::Connecting) => {
                EventOutcome::Applied(self.move_to(call_id, CallState::Connected, "connected"))
            }
            (ProviderEvent::Connected { .. }, CallState::Connected | CallState::Held) => EventOutcome::Ignored,

            (ProviderEvent::Ringing { .. }, CallState::Dialing | CallState::Ringing) => EventOutcome::Ignored,

            (ProviderEvent::Held { .. }, CallState::Connected) => {
                if let Some(held) = self.held() {
                    warn!(call_id = %call_id, held_call = %held.id, "Provider held a second call");
                    return EventOutcome::Dropped {
                        reason: format!("held for {} while {} occupies the hold slot", call_id, held.id),
                    };
                }
                EventOutcome::Applied(self.move_to(call_id, CallState::Held, "held by provider"))
            }
            (ProviderEvent::Held { .. }, CallState::Held) => EventOutcome::Ignored,

            (ProviderEvent::Resumed { .. }, CallState::Held) => {
                if let Some(other) = self.other_foreground(call_id) {
                    return EventOutcome::Dropped {
                        reason: format!("resumed for {} while {} is in the foreground", call_id, other.id),
                    };
                }
                EventOutcome::Applied(self.move_to(call_id, CallState::Connected, "resumed by provider"))
            }
            (ProviderEvent::Resumed { .. }, CallState::Connected) => EventOutcome::Ignored,

            (ProviderEvent::Disconnected { .. }, _) => {
                EventOutcome::Applied(self.finish(call_id, CallState::Ended, EndReason::RemoteHangup))
            }
            (ProviderEvent::MediaError { reason, .. }, _) => EventOutcome::Applied(self.finish(
                call_id,
                CallState::Failed,
                EndReason::MediaError { reason: reason.clone() },
            )),

            (event, state) => EventOutcome::Dropped {
                reason: format!("{} is out of order for call {} in state {}", event.name(), call_id, state),
            },
        }
    }

    fn other_foreground(&self, call_id: &CallId) -> Option<&Call> {
        self.calls
            .values()
            .find(|c| &c.id != call_id && c.state.is_foreground())
    }

    fn move_to(&mut self, call_id: &CallId, to: CallState, reason: &str) -> Applied {
        let Some(call) = self.calls.get_mut(call_id) else {
            return Applied::default();
        };
        let from = call.state;
        call.state = to;
        if to == CallState::Connected && call.connected_at.is_none() {
            call.connected_at = Some(Utc::now());
        }
        debug!(call_id = %call_id, from = %from, to = %to, reason, "Call transition");
        Applied {
            transitions: vec![Transition {
                call_id: call_id.clone(),
                from: Some(from),
                to,
                reason: Some(reason.to_string()),
            }],
            ..Default::default()
        }
    }

    fn finish(&mut self, call_id: &CallId, to: CallState, reason: EndReason) -> Applied {
        let Some(mut call) = self.calls.remove(call_id) else {
            return Applied::default();
        };
        let from = call.state;
        call.state = to;
        call.ended_at = Some(Utc::now());
        call.end_reason = Some(reason.clone());

        let entry = CallLogEntry::from_call(&call);
        let written = self.call_log.append(entry.clone());
        info!(call_id = %call_id, from = %from, to = %to, reason = ?reason, "Call finished");

        Applied {
            transitions: vec![Transition {
                call_id: call_id.clone(),
                from: Some(from),
                to,
                reason: Some(end_reason_label(&reason).to_string()),
            }],
            finalized: if written { vec![entry] } else { Vec::new() },
            muted: None,
        }
    }
}

fn end_reason_label(reason: &EndReason) -> &'static str {
    match reason {
        EndReason::LocalHangup => "local hangup",
        EndReason::RemoteHangup => "remote hangup",
        EndReason::Transferred { .. } => "transferred",
        EndReason::Rejected => "rejected",
        EndReason::NoAnswer => "no answer",
        EndReason::Busy => "busy",
        EndReason::MediaError { .. } => "media error",
        EndReason::TransportLost { .. } => "transport lost",
        EndReason::ProviderFailure { .. } => "provider failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTITY: &str = "acme";

    fn machine() -> CallStateMachine {
        CallStateMachine::new(Arc::new(CallLog::new()))
    }

    fn id(s: &str) -> CallId {
        CallId::from(s)
    }

    fn incoming(sm: &mut CallStateMachine, call_id: &str) -> EventOutcome {
        sm.on_provider_event(
            &ProviderEvent::Incoming { call_id: id(call_id), from: "+250788123456".to_string(), entity_id: None },
            &ENTITY.to_string(),
        )
    }

    fn event(sm: &mut CallStateMachine, event: ProviderEvent) -> EventOutcome {
        sm.on_provider_event(&event, &ENTITY.to_string())
    }

    fn dial(sm: &mut CallStateMachine, call_id: &str) {
        sm.start_outbound(id(call_id), "+250700000000".to_string(), ENTITY.to_string())
            .unwrap();
    }

    #[test]
    fn test_outbound_connect_passes_through_connecting() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        assert_eq!(sm.get(&id("CA-1")).unwrap().state, CallState::Dialing);

        let EventOutcome::Applied(applied) = event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") }) else {
            panic!("connected should apply");
        };
        let states: Vec<_> = applied.transitions.iter().map(|t| t.to).collect();
        assert_eq!(states, vec![CallState::Connecting, CallState::Connected]);
        assert!(sm.has_live_call());
        assert!(sm.get(&id("CA-1")).unwrap().connected_at.is_some());
    }

    #[test]
    fn test_second_dial_rejected_while_foreground() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        let err = sm
            .start_outbound(id("CA-2"), "+250700000001".to_string(), ENTITY.to_string())
            .unwrap_err();
        assert_eq!(err, SoftphoneError::AlreadyOnCall { call_id: id("CA-1") });
    }

    #[test]
    fn test_dial_allowed_while_other_call_held() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") });
        sm.commit(&id("CA-1"), CallCommand::Hold).unwrap();

        dial(&mut sm, "CA-2");
        assert!(sm.invariants_hold());
        assert_eq!(sm.held().unwrap().id, id("CA-1"));
        assert_eq!(sm.foreground().unwrap().id, id("CA-2"));

        // a second hold has nowhere to go
        event(&mut sm, ProviderEvent::Connected { call_id: id("CA-2") });
        let err = sm.admit(&id("CA-2"), &CallCommand::Hold).unwrap_err();
        assert_eq!(err, SoftphoneError::HoldSlotOccupied { held_call: id("CA-1") });

        // and the held call cannot come back while CA-2 is up
        let err = sm.admit(&id("CA-1"), &CallCommand::Resume).unwrap_err();
        assert_eq!(err, SoftphoneError::AlreadyOnCall { call_id: id("CA-2") });
    }

    #[test]
    fn test_hangup_twice_writes_one_log_entry() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        let first = sm.commit(&id("CA-1"), CallCommand::Hangup).unwrap();
        assert_eq!(first.finalized.len(), 1);
        assert_eq!(first.transitions[0].to, CallState::Ended);

        let second = sm.commit(&id("CA-1"), CallCommand::Hangup).unwrap();
        assert!(second.is_noop());
        assert_eq!(sm.call_log().len(), 1);
    }

    #[test]
    fn test_late_connected_after_hangup_is_dropped() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        sm.commit(&id("CA-1"), CallCommand::Hangup).unwrap();

        let outcome = event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") });
        assert!(matches!(outcome, EventOutcome::Dropped { .. }));
        assert_eq!(sm.call_log().get(&id("CA-1")).unwrap().final_state, CallState::Ended);
        assert!(sm.is_idle());
    }

    #[test]
    fn test_remote_hangup_before_local_hangup_makes_command_noop() {
        let mut sm = machine();
        incoming(&mut sm, "CA-1");
        sm.commit(&id("CA-1"), CallCommand::Answer).unwrap();
        event(&mut sm, ProviderEvent::Disconnected { call_id: id("CA-1"), reason: None });

        assert_eq!(sm.admit(&id("CA-1"), &CallCommand::Hangup).unwrap(), Admission::AlreadyApplied);
        assert_eq!(sm.admit(&id("CA-1"), &CallCommand::Hold).unwrap(), Admission::AlreadyApplied);
        let entry = sm.call_log().get(&id("CA-1")).unwrap();
        assert_eq!(entry.end_reason, EndReason::RemoteHangup);
    }

    #[test]
    fn test_ring_timeout_marks_missed() {
        let mut sm = machine();
        incoming(&mut sm, "CA-1");
        let EventOutcome::Applied(applied) = sm.on_ring_timeout(&id("CA-1")) else {
            panic!("timeout should apply");
        };
        assert_eq!(applied.finalized[0].final_state, CallState::Missed);
        assert_eq!(applied.finalized[0].end_reason, EndReason::NoAnswer);

        // a second timer firing is harmless
        assert_eq!(sm.on_ring_timeout(&id("CA-1")), EventOutcome::Ignored);
    }

    #[test]
    fn test_ring_timeout_after_answer_is_ignored() {
        let mut sm = machine();
        incoming(&mut sm, "CA-1");
        sm.commit(&id("CA-1"), CallCommand::Answer).unwrap();
        assert_eq!(sm.on_ring_timeout(&id("CA-1")), EventOutcome::Ignored);
        assert_eq!(sm.get(&id("CA-1")).unwrap().state, CallState::Connecting);
    }

    #[test]
    fn test_incoming_while_busy_is_missed() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        let EventOutcome::Applied(applied) = incoming(&mut sm, "CA-2") else {
            panic!("incoming should apply");
        };
        assert_eq!(applied.finalized.len(), 1);
        assert_eq!(applied.finalized[0].end_reason, EndReason::Busy);
        assert!(sm.get(&id("CA-2")).is_none());
        assert!(sm.invariants_hold());
    }

    #[test]
    fn test_reject_only_from_ringing() {
        let mut sm = machine();
        incoming(&mut sm, "CA-1");
        let applied = sm.commit(&id("CA-1"), CallCommand::Reject).unwrap();
        assert_eq!(applied.transitions[0].to, CallState::Rejected);

        dial(&mut sm, "CA-2");
        let err = sm.admit(&id("CA-2"), &CallCommand::Reject).unwrap_err();
        assert!(matches!(err, SoftphoneError::InvalidCallState { current_state: CallState::Dialing, .. }));
    }

    #[test]
    fn test_media_error_fails_only_that_call() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") });
        sm.commit(&id("CA-1"), CallCommand::Hold).unwrap();
        dial(&mut sm, "CA-2");

        event(&mut sm, ProviderEvent::MediaError { call_id: id("CA-2"), reason: "ICE failed".to_string() });
        assert_eq!(sm.call_log().get(&id("CA-2")).unwrap().final_state, CallState::Failed);
        assert_eq!(sm.get(&id("CA-1")).unwrap().state, CallState::Held);
    }

    #[test]
    fn test_transport_lost_fails_everything() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") });
        sm.commit(&id("CA-1"), CallCommand::Hold).unwrap();
        incoming(&mut sm, "CA-2");

        let EventOutcome::Applied(applied) =
            event(&mut sm, ProviderEvent::TransportLost { reason: "socket closed".to_string() })
        else {
            panic!("transport loss should apply");
        };
        assert_eq!(applied.finalized.len(), 2);
        assert!(applied.finalized.iter().all(|e| e.final_state == CallState::Failed));
        assert!(sm.is_idle());
    }

    #[test]
    fn test_mute_is_idempotent() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        assert!(sm.admit(&id("CA-1"), &CallCommand::Mute(true)).is_err());

        event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") });
        assert_eq!(sm.admit(&id("CA-1"), &CallCommand::Mute(false)).unwrap(), Admission::AlreadyApplied);
        let applied = sm.commit(&id("CA-1"), CallCommand::Mute(true)).unwrap();
        assert_eq!(applied.muted, Some((id("CA-1"), true)));
        assert!(sm.get(&id("CA-1")).unwrap().muted);
        assert!(sm.commit(&id("CA-1"), CallCommand::Mute(true)).unwrap().is_noop());
    }

    #[test]
    fn test_transfer_ends_call() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        event(&mut sm, ProviderEvent::Connected { call_id: id("CA-1") });
        let applied = sm
            .commit(&id("CA-1"), CallCommand::Transfer("+250700000099".to_string()))
            .unwrap();
        assert_eq!(
            applied.finalized[0].end_reason,
            EndReason::Transferred { target: "+250700000099".to_string() }
        );
    }

    #[test]
    fn test_unknown_call_handling() {
        let mut sm = machine();
        let err = sm.admit(&id("CA-404"), &CallCommand::Hangup).unwrap_err();
        assert_eq!(err, SoftphoneError::CallNotFound { call_id: id("CA-404") });

        let outcome = event(&mut sm, ProviderEvent::Held { call_id: id("CA-404") });
        assert!(matches!(outcome, EventOutcome::Dropped { .. }));
    }

    #[test]
    fn test_out_of_order_event_dropped() {
        let mut sm = machine();
        dial(&mut sm, "CA-1");
        let outcome = event(&mut sm, ProviderEvent::Held { call_id: id("CA-1") });
        assert!(matches!(outcome, EventOutcome::Dropped { .. }));
        assert_eq!(sm.get(&id("CA-1")).unwrap().state, CallState::Dialing);
    }

    #[test]
    fn test_connect_timeout_fails_only_connecting_calls() {
        let mut sm = machine();
        incoming(&mut sm, "CA-1");
        assert_eq!(sm.on_connect_timeout(&id("CA-1")), EventOutcome::Ignored);

        sm.commit(&id("CA-1"), CallCommand::Answer).unwrap();
        let EventOutcome::Applied(applied) = sm.on_connect_timeout(&id("CA-1")) else {
            panic!("connecting call should fail");
        };
        assert_eq!(applied.finalized[0].final_state, CallState::Failed);
        assert!(matches!(applied.finalized[0].end_reason, EndReason::ProviderFailure { .. }));
        assert!(sm.is_idle());

        // a late timer for the finished call changes nothing
        assert_eq!(sm.on_connect_timeout(&id("CA-1")), EventOutcome::Ignored);
    }
}
