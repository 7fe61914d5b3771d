//! The session actor
//!
//! One task owns the call state machine, the status coordinator and the
//! provider connection. Commands from [`SessionClient`](super::SessionClient)
//! handles, provider events and call timers are all drained by the same
//! `select!` loop, so nothing ever mutates call state concurrently. Provider
//! round trips are awaited inline: provider events that arrive meanwhile stay
//! queued on their channel and are applied afterwards, in order.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::commands::{Command, Reply};
use super::config::SoftphoneConfig;
use super::recovery::{retry_counted, with_timeout, ErrorContext};
use crate::call::{Call, CallDirection, CallId, CallState, EndReason};
use crate::callbacks::CallbackScheduler;
use crate::directory::{DirectorySource, EntityId};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{AgentSoftphoneState, SoftphoneEvent};
use crate::provider::{AgentCredentials, DialRequest, ProviderEvent, ProviderEventStream, VoiceProvider};
use crate::registration::{RegistrationInfo, RegistrationStatus};
use crate::state_machine::{Admission, Applied, CallCommand, CallStateMachine, EventOutcome};
use crate::status::{AgentStatus, AgentStatusCoordinator, EffectiveStatus};

pub(crate) struct SessionActor {
    config: SoftphoneConfig,
    entity_id: EntityId,
    provider: Arc<dyn VoiceProvider>,
    directory: Arc<dyn DirectorySource>,
    machine: CallStateMachine,
    status: AgentStatusCoordinator,
    callbacks: Arc<CallbackScheduler>,
    registration: RegistrationInfo,
    provider_events: Option<ProviderEventStream>,
    timer_tx: mpsc::UnboundedSender<(CallId, CallState)>,
    timer_rx: mpsc::UnboundedReceiver<(CallId, CallState)>,
    /// At most one pending timer per call, armed for the state it guards
    call_timers: HashMap<CallId, JoinHandle<()>>,
    state_tx: watch::Sender<AgentSoftphoneState>,
    event_tx: broadcast::Sender<SoftphoneEvent>,
    published_status: AgentStatus,
    last_error: Option<String>,
}

impl SessionActor {
    pub(crate) fn new(
        config: SoftphoneConfig,
        entity_id: EntityId,
        provider: Arc<dyn VoiceProvider>,
        directory: Arc<dyn DirectorySource>,
        machine: CallStateMachine,
        callbacks: Arc<CallbackScheduler>,
        state_tx: watch::Sender<AgentSoftphoneState>,
        event_tx: broadcast::Sender<SoftphoneEvent>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            config,
            entity_id,
            provider,
            directory,
            machine,
            status: AgentStatusCoordinator::new(),
            callbacks,
            registration: RegistrationInfo::unregistered(),
            provider_events: None,
            timer_tx,
            timer_rx,
            call_timers: HashMap::new(),
            state_tx,
            event_tx,
            published_status: AgentStatus::Offline,
            last_error: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(entity_id = %self.entity_id, "Session actor started");

        loop {
            // an error is shown until the next input is handled
            self.last_error = None;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All session handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                event = next_provider_event(&mut self.provider_events) => match event {
                    Some(event) => self.handle_provider_event(event).await,
                    None => {
                        self.provider_events = None;
                        self.on_transport_lost("provider event stream closed".to_string());
                    }
                },
                Some((call_id, armed_for)) = self.timer_rx.recv() => self.handle_call_timer(call_id, armed_for).await,
            }
            self.publish();
        }

        info!(entity_id = %self.entity_id, "Session actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(command = command.name(), "Handling command");
        match command {
            Command::Initialize { credentials, reply } => {
                let result = self.initialize(credentials).await;
                self.respond(reply, result);
            }
            Command::Dial { request, reply } => {
                let result = self.dial(request).await;
                self.respond(reply, result);
            }
            Command::Call { call_id, command, reply } => {
                let result = self.call_command(call_id, command).await;
                self.respond(reply, result);
            }
            Command::SetStatus { status, reply } => {
                let result = self.set_status(status);
                self.respond(reply, result);
            }
            Command::RefreshQueues { reply } => {
                let result = self.refresh_queues().await;
                self.respond(reply, result);
            }
            Command::Shutdown { reply } => {
                // handled by the run loop
                self.respond(reply, Ok(()));
            }
        }
    }

    /// The caller observes the new snapshot as soon as its await returns
    fn respond<T>(&mut self, reply: Reply<T>, result: SoftphoneResult<T>) {
        self.publish();
        let _ = reply.send(result);
    }

    async fn initialize(&mut self, credentials: AgentCredentials) -> SoftphoneResult<RegistrationInfo> {
        if self.registration.is_registered()
            && self.registration.agent_id.as_deref() == Some(credentials.agent_id.as_str())
        {
            debug!(agent_id = %credentials.agent_id, "Already registered");
            return Ok(self.registration.clone());
        }
        if self.registration.is_registered() {
            // switching agents drops the old connection and its event stream
            if let Some(call) = self.machine.calls().next() {
                warn!(
                    agent_id = %credentials.agent_id,
                    call_id = %call.id,
                    "Refusing to register another agent while a call is in progress"
                );
                return Err(SoftphoneError::AlreadyOnCall { call_id: call.id.clone() });
            }
            self.disconnect_current().await;
        }

        let settings = self
            .directory
            .voice_settings(&self.entity_id)
            .await
            .context("read voice settings")?;
        if let Some(reason) = settings.activation_blocker() {
            warn!(entity_id = %self.entity_id, reason, "Softphone cannot be activated");
            let err = SoftphoneError::SoftphoneDisabled {
                entity_id: self.entity_id.clone(),
                reason: reason.to_string(),
            };
            self.last_error = Some(err.to_string());
            return Err(err);
        }

        info!(agent_id = %credentials.agent_id, entity_id = %self.entity_id, "Registering agent");
        self.registration = RegistrationInfo::registering(credentials.agent_id.clone());
        self.publish();

        let provider = self.provider.clone();
        let timeout = self.config.provider_timeout();
        let connected = retry_counted("register", &self.config.registration_retry, || {
            let provider = provider.clone();
            let credentials = credentials.clone();
            async move { with_timeout("connect", timeout, provider.connect(&credentials)).await }
        })
        .await;

        match connected {
            Ok((stream, attempts)) => {
                self.provider_events = Some(stream);
                self.registration.status = RegistrationStatus::Registered;
                self.registration.attempts = attempts;
                self.registration.registered_at = Some(Utc::now());
                self.status.on_registered();

                if let Err(e) = self.load_queues(&credentials.agent_id).await {
                    warn!(agent_id = %credentials.agent_id, error = %e, "Could not read queue memberships");
                    self.last_error = Some(e.to_string());
                }

                info!(agent_id = %credentials.agent_id, attempts, "Agent registered");
                self.emit(SoftphoneEvent::Registered {
                    agent_id: credentials.agent_id,
                    attempts,
                });
                Ok(self.registration.clone())
            }
            Err(exhausted) => {
                self.registration.status = RegistrationStatus::Unavailable;
                self.registration.attempts = exhausted.attempts;

                let err = match exhausted.error {
                    e @ SoftphoneError::CredentialsRejected { .. } => e,
                    e if e.is_recoverable() => SoftphoneError::Unavailable {
                        attempts: exhausted.attempts,
                    },
                    e @ SoftphoneError::RegistrationFailed { .. } => e,
                    other => SoftphoneError::registration_failed(other.to_string()),
                };
                error!(agent_id = %credentials.agent_id, error = %err, "Registration failed");
                self.last_error = Some(err.to_string());
                self.emit(SoftphoneEvent::RegistrationFailed {
                    reason: err.to_string(),
                    attempts: exhausted.attempts,
                });
                Err(err)
            }
        }
    }

    async fn load_queues(&mut self, agent_id: &str) -> SoftphoneResult<usize> {
        let queues = self.directory.agent_queues(agent_id, &self.entity_id).await?;
        if queues.is_empty() {
            warn!(agent_id, "Agent belongs to no queue and will receive no inbound distribution");
        }
        self.status.set_queue_memberships(queues.len());
        Ok(queues.len())
    }

    async fn refresh_queues(&mut self) -> SoftphoneResult<usize> {
        self.ensure_registered()?;
        let agent_id = self
            .registration
            .agent_id
            .clone()
            .ok_or(SoftphoneError::NotRegistered)?;
        self.load_queues(&agent_id).await
    }

    async fn dial(&mut self, request: DialRequest) -> SoftphoneResult<Call> {
        self.ensure_registered()?;
        self.machine.ensure_can_dial()?;

        let requested = self.status.requested();
        let may_dial = match requested {
            AgentStatus::Available => true,
            AgentStatus::Busy => self.config.allow_dial_when_busy,
            AgentStatus::OnCall | AgentStatus::Offline => false,
        };
        if !may_dial {
            return Err(SoftphoneError::AgentUnavailable { status: requested });
        }

        let destination = request.destination.trim().to_string();
        if destination.is_empty() {
            return Err(SoftphoneError::InvalidConfiguration {
                field: "destination".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let timeout = self.config.provider_timeout();
        let call_id = match with_timeout("dial", timeout, self.provider.dial(&destination)).await {
            Ok(call_id) => call_id,
            Err(e) => {
                self.command_failed(None, "dial", &e);
                return Err(e);
            }
        };

        let applied = self
            .machine
            .start_outbound(call_id.clone(), destination, request.entity_id)?;
        self.apply(applied);

        self.machine
            .get(&call_id)
            .cloned()
            .ok_or_else(|| SoftphoneError::internal_error(format!("call {} vanished after dial", call_id)))
    }

    async fn call_command(&mut self, call_id: CallId, command: CallCommand) -> SoftphoneResult<()> {
        self.ensure_registered()?;
        if self.machine.admit(&call_id, &command)? == Admission::AlreadyApplied {
            return Ok(());
        }

        let timeout = self.config.provider_timeout();
        let provider = self.provider.clone();
        let operation = command.name();
        let result = match &command {
            CallCommand::Answer => with_timeout(operation, timeout, provider.answer(&call_id)).await,
            CallCommand::Reject => with_timeout(operation, timeout, provider.reject(&call_id)).await,
            CallCommand::Hangup => with_timeout(operation, timeout, provider.hangup(&call_id)).await,
            CallCommand::Hold => with_timeout(operation, timeout, provider.hold(&call_id)).await,
            CallCommand::Resume => with_timeout(operation, timeout, provider.resume(&call_id)).await,
            CallCommand::Mute(muted) => with_timeout(operation, timeout, provider.mute(&call_id, *muted)).await,
            CallCommand::Transfer(target) => {
                with_timeout(operation, timeout, provider.transfer(&call_id, target)).await
            }
        };

        if let Err(e) = result {
            self.command_failed(Some(&call_id), operation, &e);
            // the agent meant the call to end; do not leave it stuck in the foreground
            if matches!(command, CallCommand::Answer | CallCommand::Reject | CallCommand::Hangup) {
                let applied = self.machine.fail(&call_id, e.to_string());
                self.apply(applied);
            }
            return Err(e);
        }

        let applied = self.machine.commit(&call_id, command)?;
        self.apply(applied);
        Ok(())
    }

    fn set_status(&mut self, status: AgentStatus) -> SoftphoneResult<EffectiveStatus> {
        self.ensure_registered()?;
        let live_call = self.machine.has_live_call();
        self.status.request(status, live_call)?;
        Ok(self.status.effective(live_call))
    }

    async fn handle_provider_event(&mut self, event: ProviderEvent) {
        debug!(event = event.name(), call_id = ?event.call_id(), "Provider event");

        if let ProviderEvent::TransportLost { reason } = event {
            self.on_transport_lost(reason);
            return;
        }

        match self.machine.on_provider_event(&event, &self.entity_id) {
            EventOutcome::Applied(applied) => {
                if let ProviderEvent::MediaError { call_id, reason } = &event {
                    let err = SoftphoneError::MediaError { call_id: call_id.clone(), reason: reason.clone() };
                    warn!(error = %err, "Call failed on media error");
                    self.last_error = Some(err.to_string());
                }
                let busy: Vec<CallId> = applied
                    .finalized
                    .iter()
                    .filter(|entry| entry.end_reason == EndReason::Busy)
                    .map(|entry| entry.call_id.clone())
                    .collect();
                self.apply(applied);
                for call_id in busy {
                    self.reject_quietly(&call_id, "busy").await;
                }
            }
            EventOutcome::Ignored => {
                debug!(event = event.name(), call_id = ?event.call_id(), "Provider event already reflected");
            }
            EventOutcome::Dropped { reason } => {
                warn!(event = event.name(), reason = %reason, "Dropping provider event");
                self.emit(SoftphoneEvent::ProviderEventDropped {
                    event: event.name().to_string(),
                    reason,
                });
            }
        }
    }

    async fn handle_call_timer(&mut self, call_id: CallId, armed_for: CallState) {
        self.call_timers.remove(&call_id);
        match armed_for {
            CallState::Ringing => {
                if let EventOutcome::Applied(applied) = self.machine.on_ring_timeout(&call_id) {
                    self.apply(applied);
                    self.reject_quietly(&call_id, "ring timeout").await;
                }
            }
            CallState::Connecting => {
                if let EventOutcome::Applied(applied) = self.machine.on_connect_timeout(&call_id) {
                    self.last_error = Some(
                        SoftphoneError::provider("answer", format!("call {} never connected", call_id)).to_string(),
                    );
                    self.apply(applied);
                    self.hangup_quietly(&call_id).await;
                }
            }
            other => debug!(call_id = %call_id, state = %other, "No timer action for state"),
        }
    }

    /// Tell the provider to stop offering a call we already resolved locally
    async fn reject_quietly(&self, call_id: &CallId, why: &str) {
        let timeout = self.config.provider_timeout();
        if let Err(e) = with_timeout("reject", timeout, self.provider.reject(call_id)).await {
            warn!(call_id = %call_id, why, error = %e, "Provider reject failed");
        }
    }

    async fn hangup_quietly(&self, call_id: &CallId) {
        let timeout = self.config.provider_timeout();
        if let Err(e) = with_timeout("hangup", timeout, self.provider.hangup(call_id)).await {
            warn!(call_id = %call_id, error = %e, "Provider hangup failed");
        }
    }

    fn on_transport_lost(&mut self, reason: String) {
        error!(reason = %reason, "Transport lost, failing all calls");
        let applied = self.machine.fail_all(&reason);
        self.apply(applied);

        self.provider_events = None;
        self.status.force_offline();
        if self.registration.status != RegistrationStatus::Unregistered {
            self.registration.status = RegistrationStatus::Disconnected;
        }
        self.last_error = Some(SoftphoneError::TransportLost { reason: reason.clone() }.to_string());
        self.emit(SoftphoneEvent::TransportLost { reason });
    }

    async fn shutdown(&mut self) {
        info!("Shutting down session");
        let live: Vec<CallId> = self.machine.calls().map(|c| c.id.clone()).collect();
        for call_id in live {
            let timeout = self.config.provider_timeout();
            if let Err(e) = with_timeout("hangup", timeout, self.provider.hangup(&call_id)).await {
                warn!(call_id = %call_id, error = %e, "Hangup during shutdown failed");
            }
            match self.machine.commit(&call_id, CallCommand::Hangup) {
                Ok(applied) => self.apply(applied),
                Err(e) => warn!(call_id = %call_id, error = %e, "Could not end call during shutdown"),
            }
        }

        if self.registration.is_registered() {
            let timeout = self.config.provider_timeout();
            if let Err(e) = with_timeout("disconnect", timeout, self.provider.disconnect()).await {
                warn!(error = %e, "Provider disconnect failed");
            }
        }

        for (_, timer) in self.call_timers.drain() {
            timer.abort();
        }
        self.provider_events = None;
        self.status.force_offline();
        self.registration.status = RegistrationStatus::Unregistered;
        self.publish();
    }

    /// Close the provider connection of the currently registered agent
    async fn disconnect_current(&mut self) {
        info!(agent_id = ?self.registration.agent_id, "Disconnecting current agent");
        let timeout = self.config.provider_timeout();
        if let Err(e) = with_timeout("disconnect", timeout, self.provider.disconnect()).await {
            warn!(error = %e, "Provider disconnect failed");
        }
        for (_, timer) in self.call_timers.drain() {
            timer.abort();
        }
        self.provider_events = None;
        self.status = AgentStatusCoordinator::new();
        self.registration = RegistrationInfo::unregistered();
    }

    fn ensure_registered(&self) -> SoftphoneResult<()> {
        if self.registration.is_registered() {
            Ok(())
        } else {
            Err(SoftphoneError::NotRegistered)
        }
    }

    fn command_failed(&mut self, call_id: Option<&CallId>, operation: &str, error: &SoftphoneError) {
        warn!(call_id = ?call_id, operation, error = %error, "Provider rejected command");
        self.last_error = Some(error.to_string());
        self.emit(SoftphoneEvent::CommandFailed {
            call_id: call_id.cloned(),
            operation: operation.to_string(),
            reason: error.to_string(),
        });
    }

    /// Publish the consequences of a state machine step
    fn apply(&mut self, applied: Applied) {
        let now = Utc::now();
        for transition in &applied.transitions {
            if matches!(transition.from, Some(CallState::Ringing | CallState::Connecting)) {
                self.cancel_call_timer(&transition.call_id);
            }
            self.emit(SoftphoneEvent::CallStateChanged {
                call_id: transition.call_id.clone(),
                previous: transition.from,
                new: transition.to,
                reason: transition.reason.clone(),
                timestamp: now,
            });

            if transition.from.is_none() && transition.to == CallState::Ringing {
                let from = self
                    .machine
                    .get(&transition.call_id)
                    .map(|c| c.remote_address.clone())
                    .or_else(|| {
                        applied
                            .finalized
                            .iter()
                            .find(|e| e.call_id == transition.call_id)
                            .map(|e| e.remote_address.clone())
                    })
                    .unwrap_or_default();
                self.emit(SoftphoneEvent::IncomingCall {
                    call_id: transition.call_id.clone(),
                    from,
                });
                if self.machine.get(&transition.call_id).map(|c| c.state) == Some(CallState::Ringing) {
                    self.start_call_timer(transition.call_id.clone(), CallState::Ringing);
                }
            }

            if transition.to == CallState::Connecting
                && self.machine.get(&transition.call_id).map(|c| c.state) == Some(CallState::Connecting)
            {
                self.start_call_timer(transition.call_id.clone(), CallState::Connecting);
            }
        }

        if let Some((call_id, muted)) = applied.muted.clone() {
            self.emit(SoftphoneEvent::MuteChanged { call_id, muted });
        }

        for entry in applied.finalized {
            self.cancel_call_timer(&entry.call_id);
            let suggest = self.config.auto_suggest_callbacks
                && entry.final_state == CallState::Missed
                && entry.direction == CallDirection::Inbound;
            let suggestion = if suggest {
                let scheduled_for = self
                    .config
                    .callback_delay()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(now);
                self.callbacks.suggest_for_missed(&entry, scheduled_for)
            } else {
                None
            };
            self.emit(SoftphoneEvent::CallLogged { entry });
            if let Some(callback) = suggestion {
                self.emit(SoftphoneEvent::CallbackSuggested { callback });
            }
        }
    }

    fn start_call_timer(&mut self, call_id: CallId, armed_for: CallState) {
        let timer_tx = self.timer_tx.clone();
        let timeout = match armed_for {
            CallState::Connecting => self.config.connect_timeout(),
            _ => self.config.ring_timeout(),
        };
        let id = call_id.clone();
        let handle = tokio::spawn(async move {
            sleep(timeout).await;
            let _ = timer_tx.send((id, armed_for));
        });
        if let Some(previous) = self.call_timers.insert(call_id, handle) {
            previous.abort();
        }
    }

    fn cancel_call_timer(&mut self, call_id: &CallId) {
        if let Some(timer) = self.call_timers.remove(call_id) {
            timer.abort();
        }
    }

    fn emit(&self, event: SoftphoneEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Push a fresh snapshot to subscribers
    fn publish(&mut self) {
        let live_call = self.machine.has_live_call();
        let effective = self.status.effective(live_call);

        let snapshot = AgentSoftphoneState {
            agent_status: effective.status,
            unassigned: effective.unassigned,
            registration: self.registration.clone(),
            active_call: self.machine.foreground().cloned(),
            held_call: self.machine.held().cloned(),
            last_error: self.last_error.clone(),
        };

        if effective.status != self.published_status {
            info!(from = %self.published_status, to = %effective.status, "Agent status changed");
            self.emit(SoftphoneEvent::StatusChanged {
                previous: self.published_status,
                new: effective.status,
                unassigned: effective.unassigned,
            });
            self.published_status = effective.status;
        }

        self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_provider_event(stream: &mut Option<ProviderEventStream>) -> Option<ProviderEvent> {
    match stream {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
