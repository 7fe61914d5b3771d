//! Softphone-core: call-center softphone coordination layer
//!
//! This crate sits between an agent-facing UI and a third-party telephony
//! provider. The provider's signaling and media are opaque; the crate reaches
//! them only through the [`VoiceProvider`] trait.
//!
//! ```text
//! UI command -> SessionClient -> provider call -> provider event
//!            -> CallStateMachine -> AgentStatusCoordinator -> snapshot -> UI
//! ```
//!
//! Softphone-core focuses on:
//! - Registration with retry and activation gating by entity voice settings
//! - Per-call lifecycle with at most one foreground call and one held call
//! - Agent presence reconciled against queue membership and live calls
//! - Callback scheduling for missed calls
//! - Snapshot and event streams for the presentation layer

pub mod call;
pub mod callbacks;
pub mod client;
pub mod directory;
pub mod error;
pub mod events;
pub mod presentation;
pub mod provider;
pub mod registration;
pub mod state_machine;
pub mod status;

pub use call::{Call, CallDirection, CallId, CallLog, CallLogEntry, CallState, CallStats, EndReason};
pub use callbacks::{Callback, CallbackCreate, CallbackOrigin, CallbackScheduler, CallbackStatus, CallbackUpdate};
pub use client::{RetryConfig, SessionClient, SessionClientBuilder, SoftphoneConfig};
pub use directory::{
    AgentId, CallQueue, CallQueueCreate, CallQueueUpdate, DirectorySource, EntityId, InMemoryDirectory, QueueAgent,
    QueueAgentAdd, VoiceSettings,
};
pub use error::{SoftphoneError, SoftphoneResult};
pub use events::{AgentSoftphoneState, EventPriority, SoftphoneEvent};
pub use presentation::{render_state_json, spawn_state_subscription, SoftphoneStateHandler};
pub use provider::{AgentCredentials, DialRequest, ProviderEvent, ProviderEventStream, VoiceProvider};
pub use registration::{RegistrationInfo, RegistrationStatus};
pub use status::{reconcile, AgentStatus, AgentStatusCoordinator, EffectiveStatus};

/// Softphone-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
