//! Presentation boundary
//!
//! A UI owns no state. It receives [`AgentSoftphoneState`] snapshots through
//! a handler and issues commands through the [`SessionClient`](crate::SessionClient).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::AgentSoftphoneState;

/// Receives every published snapshot
#[async_trait]
pub trait SoftphoneStateHandler: Send + Sync {
    async fn on_state(&self, state: AgentSoftphoneState);

    /// The session ended; no more snapshots will follow
    async fn on_closed(&self) {}
}

/// Forward snapshots to `handler` until the session goes away
///
/// The current snapshot is delivered immediately. Snapshots published faster
/// than the handler consumes them are coalesced to the latest one.
pub fn spawn_state_subscription(
    mut state: watch::Receiver<AgentSoftphoneState>,
    handler: Arc<dyn SoftphoneStateHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let current = state.borrow_and_update().clone();
        handler.on_state(current).await;

        while state.changed().await.is_ok() {
            let snapshot = state.borrow_and_update().clone();
            handler.on_state(snapshot).await;
        }

        debug!("State subscription closed");
        handler.on_closed().await;
    })
}

/// Serialize a snapshot for a web UI
pub fn render_state_json(state: &AgentSoftphoneState) -> SoftphoneResult<String> {
    serde_json::to_string(state)
        .map_err(|e| SoftphoneError::internal_error(format!("failed to serialize state: {}", e)))
}
