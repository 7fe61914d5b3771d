//! Telephony provider seam
//!
//! The provider's browser SDK is an opaque protocol peer. The softphone only
//! ever reaches it through the [`VoiceProvider`] trait: connect, then issue
//! call primitives and read the ordered [`ProviderEvent`] stream returned by
//! `connect`.
//!
//! Implementations must deliver events for a connection on that one channel,
//! in the order the provider produced them. The session actor relies on this
//! for its ordering guarantee.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::call::CallId;
use crate::directory::{AgentId, EntityId};
use crate::error::SoftphoneResult;

/// Credentials used to register the agent with the provider
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentCredentials {
    pub agent_id: AgentId,
    /// Provider access token or password
    pub token: String,
    /// Optional display identity presented to the provider
    pub identity: Option<String>,
}

impl AgentCredentials {
    pub fn new(agent_id: impl Into<AgentId>, token: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            token: token.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl std::fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("agent_id", &self.agent_id)
            .field("token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Outbound call request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialRequest {
    /// Phone number or provider identifier
    pub destination: String,
    pub entity_id: EntityId,
}

impl DialRequest {
    pub fn new(destination: impl Into<String>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            destination: destination.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// Events emitted by the provider, in delivery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProviderEvent {
    /// A new inbound call is offered to the agent
    Incoming {
        call_id: CallId,
        from: String,
        #[serde(default)]
        entity_id: Option<EntityId>,
    },
    /// The remote side is alerting (outbound) or the offer is still ringing (inbound)
    Ringing { call_id: CallId },
    /// Media is up
    Connected { call_id: CallId },
    Held { call_id: CallId },
    Resumed { call_id: CallId },
    /// The call is gone on the provider side
    Disconnected {
        call_id: CallId,
        #[serde(default)]
        reason: Option<String>,
    },
    MediaError { call_id: CallId, reason: String },
    /// The signaling connection itself is gone
    TransportLost { reason: String },
}

impl ProviderEvent {
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            ProviderEvent::Incoming { call_id, .. }
            | ProviderEvent::Ringing { call_id }
            | ProviderEvent::Connected { call_id }
            | ProviderEvent::Held { call_id }
            | ProviderEvent::Resumed { call_id }
            | ProviderEvent::Disconnected { call_id, .. }
            | ProviderEvent::MediaError { call_id, .. } => Some(call_id),
            ProviderEvent::TransportLost { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::Incoming { .. } => "incoming",
            ProviderEvent::Ringing { .. } => "ringing",
            ProviderEvent::Connected { .. } => "connected",
            ProviderEvent::Held { .. } => "held",
            ProviderEvent::Resumed { .. } => "resumed",
            ProviderEvent::Disconnected { .. } => "disconnected",
            ProviderEvent::MediaError { .. } => "media_error",
            ProviderEvent::TransportLost { .. } => "transport_lost",
        }
    }
}

/// Ordered event stream for one provider connection
pub type ProviderEventStream = mpsc::Receiver<ProviderEvent>;

/// Call primitives offered by the telephony provider
///
/// Errors follow the crate taxonomy: transport problems should be reported as
/// `NetworkError` (retried during registration), bad credentials as
/// `CredentialsRejected` (not retried).
#[async_trait]
pub trait VoiceProvider: Send + Sync + 'static {
    /// Register the agent and open the event stream for this connection
    async fn connect(&self, credentials: &AgentCredentials) -> SoftphoneResult<ProviderEventStream>;

    /// Start an outbound call; the provider assigns the call id
    async fn dial(&self, destination: &str) -> SoftphoneResult<CallId>;

    async fn answer(&self, call_id: &CallId) -> SoftphoneResult<()>;

    async fn reject(&self, call_id: &CallId) -> SoftphoneResult<()>;

    async fn hangup(&self, call_id: &CallId) -> SoftphoneResult<()>;

    async fn hold(&self, call_id: &CallId) -> SoftphoneResult<()>;

    async fn resume(&self, call_id: &CallId) -> SoftphoneResult<()>;

    async fn mute(&self, call_id: &CallId, muted: bool) -> SoftphoneResult<()>;

    /// Blind transfer to `target`
    async fn transfer(&self, call_id: &CallId, target: &str) -> SoftphoneResult<()>;

    /// Tear down the connection
    async fn disconnect(&self) -> SoftphoneResult<()> {
        Ok(())
    }
}
