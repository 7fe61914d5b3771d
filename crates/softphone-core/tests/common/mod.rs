//! Shared fixtures for softphone-core integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use softphone_core::{
    AgentCredentials, AgentSoftphoneState, CallId, CallQueueCreate, InMemoryDirectory, ProviderEvent,
    ProviderEventStream, QueueAgentAdd, RetryConfig, SessionClient, SessionClientBuilder, SoftphoneConfig,
    SoftphoneError, SoftphoneEvent, SoftphoneResult, VoiceProvider, VoiceSettings,
};

pub const AGENT: &str = "agent-7";
pub const ENTITY: &str = "acme";
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("softphone_core=debug")
        .with_test_writer()
        .try_init();
}

/// Scripted stand-in for the provider SDK
///
/// Records every primitive it is asked to perform, hands out sequential call
/// ids and lets the test push provider events onto the connection's stream.
#[derive(Default)]
pub struct MockProvider {
    events: Mutex<Option<mpsc::Sender<ProviderEvent>>>,
    next_call: AtomicU32,
    connect_attempts: AtomicU32,
    connect_failures: Mutex<VecDeque<SoftphoneError>>,
    op_failures: Mutex<HashMap<&'static str, SoftphoneError>>,
    ops: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `connect` calls with these errors, in order
    pub fn fail_connect(&self, errors: impl IntoIterator<Item = SoftphoneError>) {
        self.connect_failures.lock().extend(errors);
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: &'static str, error: SoftphoneError) {
        self.op_failures.lock().insert(operation, error);
    }

    pub async fn emit(&self, event: ProviderEvent) {
        let sender = self.events.lock().clone();
        sender
            .expect("provider is not connected")
            .send(event)
            .await
            .expect("session stopped reading provider events");
    }

    pub async fn incoming(&self, call_id: &str, from: &str) {
        self.emit(ProviderEvent::Incoming {
            call_id: CallId::from(call_id),
            from: from.to_string(),
            entity_id: None,
        })
        .await;
    }

    pub async fn connected(&self, call_id: &CallId) {
        self.emit(ProviderEvent::Connected { call_id: call_id.clone() }).await;
    }

    /// Drop the sending half so the session sees its stream close
    pub fn close_stream(&self) {
        self.events.lock().take();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn count_op(&self, prefix: &str) -> usize {
        self.ops.lock().iter().filter(|op| op.starts_with(prefix)).count()
    }

    fn record(&self, operation: &'static str, detail: &str) -> SoftphoneResult<()> {
        self.ops.lock().push(format!("{} {}", operation, detail));
        match self.op_failures.lock().remove(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VoiceProvider for MockProvider {
    async fn connect(&self, credentials: &AgentCredentials) -> SoftphoneResult<ProviderEventStream> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_failures.lock().pop_front() {
            return Err(error);
        }
        self.ops.lock().push(format!("connect {}", credentials.agent_id));
        let (tx, rx) = mpsc::channel(32);
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn dial(&self, destination: &str) -> SoftphoneResult<CallId> {
        self.record("dial", destination)?;
        let n = self.next_call.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CallId::from(format!("CA-out-{}", n)))
    }

    async fn answer(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.record("answer", call_id.as_str())
    }

    async fn reject(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.record("reject", call_id.as_str())
    }

    async fn hangup(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.record("hangup", call_id.as_str())
    }

    async fn hold(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.record("hold", call_id.as_str())
    }

    async fn resume(&self, call_id: &CallId) -> SoftphoneResult<()> {
        self.record("resume", call_id.as_str())
    }

    async fn mute(&self, call_id: &CallId, muted: bool) -> SoftphoneResult<()> {
        self.record("mute", &format!("{} {}", call_id, muted))
    }

    async fn transfer(&self, call_id: &CallId, target: &str) -> SoftphoneResult<()> {
        self.record("transfer", &format!("{} {}", call_id, target))
    }

    async fn disconnect(&self) -> SoftphoneResult<()> {
        self.record("disconnect", "")
    }
}

/// Directory with voice enabled for [`ENTITY`] and [`AGENT`] in one queue
pub fn staffed_directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.set_voice_settings(ENTITY, VoiceSettings::enabled());
    let queue = directory.create_queue(CallQueueCreate {
        name: "support".to_string(),
        entity_id: ENTITY.to_string(),
        description: None,
    });
    directory
        .add_agent(QueueAgentAdd { queue_id: queue.id, agent_id: AGENT.to_string() })
        .expect("queue exists");
    directory
}

pub fn test_config() -> SoftphoneConfig {
    SoftphoneConfig::default()
        .with_registration_retry(RetryConfig::quick())
        .with_provider_timeout_secs(1)
}

pub fn build_client(
    provider: Arc<MockProvider>,
    directory: Arc<InMemoryDirectory>,
    config: SoftphoneConfig,
) -> SessionClient {
    SessionClientBuilder::new()
        .config(config)
        .provider(provider)
        .directory(directory)
        .entity_id(ENTITY)
        .build()
        .expect("client builds")
}

/// A client for [`AGENT`] that has already registered
pub async fn registered_client(config: SoftphoneConfig) -> (SessionClient, Arc<MockProvider>, Arc<InMemoryDirectory>) {
    init_tracing();
    let provider = MockProvider::new();
    let directory = staffed_directory();
    let client = build_client(provider.clone(), directory.clone(), config);
    client
        .initialize(AgentCredentials::new(AGENT, "secret"))
        .await
        .expect("registration succeeds");
    (client, provider, directory)
}

/// Wait until the published snapshot satisfies `predicate`
pub async fn wait_for_state(
    client: &SessionClient,
    predicate: impl FnMut(&AgentSoftphoneState) -> bool,
) -> AgentSoftphoneState {
    let mut state = client.subscribe();
    let result = tokio::time::timeout(WAIT, state.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("session stopped");
    let snapshot = result.clone();
    snapshot
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SoftphoneEvent>,
    mut predicate: impl FnMut(&SoftphoneEvent) -> bool,
) -> SoftphoneEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
