//! Builder for creating session clients

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::info;

use super::actor::SessionActor;
use super::config::SoftphoneConfig;
use super::SessionClient;
use crate::call::CallLog;
use crate::callbacks::CallbackScheduler;
use crate::directory::{DirectorySource, EntityId};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::AgentSoftphoneState;
use crate::provider::VoiceProvider;
use crate::state_machine::CallStateMachine;

/// Builder for creating a [`SessionClient`]
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use softphone_core::{InMemoryDirectory, SessionClientBuilder, SoftphoneConfig, VoiceProvider};
/// # async fn example(provider: Arc<dyn VoiceProvider>) -> softphone_core::SoftphoneResult<()> {
/// let client = SessionClientBuilder::new()
///     .config(SoftphoneConfig::default())
///     .provider(provider)
///     .directory(Arc::new(InMemoryDirectory::new()))
///     .entity_id("acme")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionClientBuilder {
    config: SoftphoneConfig,
    provider: Option<Arc<dyn VoiceProvider>>,
    directory: Option<Arc<dyn DirectorySource>>,
    entity_id: Option<EntityId>,
}

impl SessionClientBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: SoftphoneConfig::default(),
            provider: None,
            directory: None,
            entity_id: None,
        }
    }

    pub fn config(mut self, config: SoftphoneConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the telephony provider
    pub fn provider(mut self, provider: Arc<dyn VoiceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the source of voice settings and queue memberships
    pub fn directory(mut self, directory: Arc<dyn DirectorySource>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Tenant the session acts for
    pub fn entity_id(mut self, entity_id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Build the client and spawn its session actor
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> SoftphoneResult<SessionClient> {
        self.config.validate()?;
        let provider = self.provider.ok_or_else(|| missing("provider"))?;
        let directory = self.directory.ok_or_else(|| missing("directory"))?;
        let entity_id = self.entity_id.filter(|e| !e.is_empty()).ok_or_else(|| missing("entity_id"))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SoftphoneError::internal_error(format!("no tokio runtime: {}", e)))?;

        let call_log = Arc::new(CallLog::with_capacity(self.config.max_call_log_entries));
        let callbacks = Arc::new(CallbackScheduler::new(call_log.clone()));
        let (command_tx, command_rx) = mpsc::channel(self.config.command_channel_capacity);
        let (state_tx, state_rx) = watch::channel(AgentSoftphoneState::default());
        let (event_tx, _) = broadcast::channel(self.config.event_channel_capacity);

        let actor = SessionActor::new(
            self.config,
            entity_id.clone(),
            provider,
            directory,
            CallStateMachine::new(call_log.clone()),
            callbacks.clone(),
            state_tx,
            event_tx.clone(),
        );
        let task = runtime.spawn(actor.run(command_rx));
        info!(entity_id = %entity_id, "Session client created");

        Ok(SessionClient::new(command_tx, state_rx, event_tx, call_log, callbacks, entity_id, task))
    }
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(field: &str) -> SoftphoneError {
    SoftphoneError::InvalidConfiguration {
        field: field.to_string(),
        reason: "is required".to_string(),
    }
}
