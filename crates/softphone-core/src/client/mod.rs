//! Session client
//!
//! The single point of contact with the telephony provider. A
//! [`SessionClient`] is a cheap, cloneable handle; the state lives in a
//! session actor task spawned by [`SessionClientBuilder::build`].
//!
//! # Architecture Overview
//!
//! - **`actor`** - the task that owns call state and the provider connection
//! - **`commands`** - messages sent from handles to the actor
//! - **`config`** - [`SoftphoneConfig`]
//! - **`builder`** - [`SessionClientBuilder`]
//! - **`recovery`** - retry with backoff and provider call timeouts
//!
//! # Basic Call Flow
//!
//! ```rust,no_run
//! # use softphone_core::{AgentCredentials, CallState, DialRequest, SessionClient, SoftphoneEvent};
//! # async fn example(client: SessionClient) -> softphone_core::SoftphoneResult<()> {
//! client.initialize(AgentCredentials::new("agent-7", "token")).await?;
//!
//! let mut events = client.events();
//! let call = client.dial(DialRequest::new("+250700000000", "acme")).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SoftphoneEvent::CallStateChanged { new: CallState::Connected, .. } = event {
//!         break;
//!     }
//! }
//!
//! client.hangup(&call.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Reads (`state`, `call_log`, `stats`) never wait on the actor; they see the
//! last published snapshot.

mod actor;
pub mod builder;
mod commands;
pub mod config;
pub mod recovery;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

pub use builder::SessionClientBuilder;
pub use config::SoftphoneConfig;
pub use recovery::{retry_with_backoff, with_timeout, ErrorContext, RetryConfig};

use self::commands::{Command, Reply};
use crate::call::{Call, CallId, CallLog, CallLogEntry, CallStats};
use crate::callbacks::CallbackScheduler;
use crate::directory::EntityId;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{AgentSoftphoneState, SoftphoneEvent};
use crate::provider::{AgentCredentials, DialRequest};
use crate::registration::RegistrationInfo;
use crate::state_machine::CallCommand;
use crate::status::{AgentStatus, EffectiveStatus};

/// Handle to a running softphone session
#[derive(Clone)]
pub struct SessionClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<AgentSoftphoneState>,
    events: broadcast::Sender<SoftphoneEvent>,
    call_log: Arc<CallLog>,
    callbacks: Arc<CallbackScheduler>,
    entity_id: EntityId,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionClient {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<AgentSoftphoneState>,
        events: broadcast::Sender<SoftphoneEvent>,
        call_log: Arc<CallLog>,
        callbacks: Arc<CallbackScheduler>,
        entity_id: EntityId,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            commands,
            state,
            events,
            call_log,
            callbacks,
            entity_id,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::new()
    }

    /// Register the agent with the provider
    ///
    /// Fails with `SoftphoneDisabled` unless the entity's voice settings allow
    /// activation. Transport failures are retried with backoff; when the
    /// attempts run out the registration becomes `unavailable` and
    /// `Unavailable` is returned. Also used to recover after a transport loss.
    pub async fn initialize(&self, credentials: AgentCredentials) -> SoftphoneResult<RegistrationInfo> {
        self.request(|reply| Command::Initialize { credentials, reply }).await
    }

    /// Place an outbound call; the returned call is in `dialing`
    pub async fn dial(&self, request: DialRequest) -> SoftphoneResult<Call> {
        self.request(|reply| Command::Dial { request, reply }).await
    }

    pub async fn answer(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Answer).await
    }

    pub async fn reject(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Reject).await
    }

    /// Hang up; a no-op if the call already ended
    pub async fn hangup(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Hangup).await
    }

    pub async fn hold(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Hold).await
    }

    pub async fn resume(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Resume).await
    }

    pub async fn mute(&self, call_id: &CallId, muted: bool) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Mute(muted)).await
    }

    /// Blind transfer; the call ends locally once the provider accepts
    pub async fn transfer(&self, call_id: &CallId, target: impl Into<String>) -> SoftphoneResult<()> {
        self.call_command(call_id, CallCommand::Transfer(target.into())).await
    }

    /// Explicit status request from the agent
    pub async fn set_status(&self, status: AgentStatus) -> SoftphoneResult<EffectiveStatus> {
        self.request(|reply| Command::SetStatus { status, reply }).await
    }

    /// Re-read queue memberships; returns the new count
    pub async fn refresh_queues(&self) -> SoftphoneResult<usize> {
        self.request(|reply| Command::RefreshQueues { reply }).await
    }

    /// Hang up live calls, disconnect and stop the session actor
    pub async fn shutdown(&self) -> SoftphoneResult<()> {
        let result = self.request(|reply| Command::Shutdown { reply }).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "Session actor ended abnormally");
            }
        }
        match result {
            Err(SoftphoneError::ShutDown) => Ok(()),
            other => other,
        }
    }

    /// Latest published snapshot
    pub fn state(&self) -> AgentSoftphoneState {
        self.state.borrow().clone()
    }

    /// Snapshot subscription for the presentation layer
    pub fn subscribe(&self) -> watch::Receiver<AgentSoftphoneState> {
        self.state.clone()
    }

    /// Discrete event stream
    pub fn events(&self) -> broadcast::Receiver<SoftphoneEvent> {
        self.events.subscribe()
    }

    pub fn active_call(&self) -> Option<Call> {
        self.state.borrow().active_call.clone()
    }

    pub fn held_call(&self) -> Option<Call> {
        self.state.borrow().held_call.clone()
    }

    pub fn agent_status(&self) -> AgentStatus {
        self.state.borrow().agent_status
    }

    pub fn call_log(&self) -> Vec<CallLogEntry> {
        self.call_log.entries()
    }

    pub fn stats(&self) -> CallStats {
        self.call_log.stats()
    }

    pub fn callbacks(&self) -> Arc<CallbackScheduler> {
        self.callbacks.clone()
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn call_command(&self, call_id: &CallId, command: CallCommand) -> SoftphoneResult<()> {
        let call_id = call_id.clone();
        self.request(|reply| Command::Call { call_id, command, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> SoftphoneResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SoftphoneError::ShutDown)?;
        response.await.map_err(|_| SoftphoneError::ShutDown)?
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("entity_id", &self.entity_id)
            .field("running", &self.is_running())
            .finish()
    }
}
