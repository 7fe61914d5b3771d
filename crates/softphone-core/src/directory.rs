//! Agent directory and queue registry
//!
//! Read-mostly configuration the softphone consumes: per-entity
//! [`VoiceSettings`] and the [`CallQueue`]s an agent belongs to. Writes come
//! from administrators through the external data-access layer; this core only
//! reads through the [`DirectorySource`] trait.
//!
//! [`InMemoryDirectory`] is a complete registry implementation backed by
//! concurrent maps. It serves the typed admin contracts (`CallQueueCreate`,
//! `CallQueueUpdate`, `QueueAgentAdd`) and is what tests and embedded setups
//! plug into the session client.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SoftphoneError, SoftphoneResult};

/// Tenant scope identifier
pub type EntityId = String;

/// Agent identifier as known to the directory
pub type AgentId = String;

/// Per-entity voice configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
    pub is_configured: bool,
    pub is_enabled: bool,
    pub webrtc_enabled: bool,
}

impl VoiceSettings {
    pub fn enabled() -> Self {
        Self {
            is_configured: true,
            is_enabled: true,
            webrtc_enabled: true,
        }
    }

    /// A softphone may only be activated when all three flags are set
    pub fn can_activate(&self) -> bool {
        self.activation_blocker().is_none()
    }

    /// First reason the softphone cannot be activated, if any
    pub fn activation_blocker(&self) -> Option<&'static str> {
        if !self.is_configured {
            Some("voice is not configured")
        } else if !self.is_enabled {
            Some("voice is disabled")
        } else if !self.webrtc_enabled {
            Some("browser media transport is disabled")
        } else {
            None
        }
    }
}

/// A call queue and its member agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallQueue {
    pub id: String,
    pub name: String,
    pub entity_id: EntityId,
    pub description: Option<String>,
    pub members: BTreeSet<AgentId>,
    pub created_at: DateTime<Utc>,
}

impl CallQueue {
    pub fn has_member(&self, agent_id: &str) -> bool {
        self.members.contains(agent_id)
    }
}

/// Membership record returned when an agent joins a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAgent {
    pub queue_id: String,
    pub agent_id: AgentId,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallQueueCreate {
    pub name: String,
    pub entity_id: EntityId,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallQueueUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAgentAdd {
    pub queue_id: String,
    pub agent_id: AgentId,
}

/// Read access to the external directory
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Voice settings for an entity
    async fn voice_settings(&self, entity_id: &str) -> SoftphoneResult<VoiceSettings>;

    /// Queues within `entity_id` that list `agent_id` as a member
    async fn agent_queues(&self, agent_id: &str, entity_id: &str) -> SoftphoneResult<Vec<CallQueue>>;
}

/// In-memory queue registry
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    voice_settings: DashMap<EntityId, VoiceSettings>,
    queues: DashMap<String, CallQueue>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_voice_settings(&self, entity_id: impl Into<EntityId>, settings: VoiceSettings) {
        let entity_id = entity_id.into();
        debug!(entity_id = %entity_id, ?settings, "Voice settings updated");
        self.voice_settings.insert(entity_id, settings);
    }

    pub fn create_queue(&self, request: CallQueueCreate) -> CallQueue {
        let queue = CallQueue {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            entity_id: request.entity_id,
            description: request.description,
            members: BTreeSet::new(),
            created_at: Utc::now(),
        };
        info!(queue_id = %queue.id, name = %queue.name, "Created call queue");
        self.queues.insert(queue.id.clone(), queue.clone());
        queue
    }

    pub fn update_queue(&self, queue_id: &str, request: CallQueueUpdate) -> SoftphoneResult<CallQueue> {
        let mut queue = self
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| SoftphoneError::QueueNotFound { queue_id: queue_id.to_string() })?;
        if let Some(name) = request.name {
            queue.name = name;
        }
        if let Some(description) = request.description {
            queue.description = Some(description);
        }
        Ok(queue.clone())
    }

    pub fn remove_queue(&self, queue_id: &str) -> SoftphoneResult<CallQueue> {
        self.queues
            .remove(queue_id)
            .map(|(_, queue)| queue)
            .ok_or_else(|| SoftphoneError::QueueNotFound { queue_id: queue_id.to_string() })
    }

    pub fn add_agent(&self, request: QueueAgentAdd) -> SoftphoneResult<QueueAgent> {
        let mut queue = self
            .queues
            .get_mut(&request.queue_id)
            .ok_or_else(|| SoftphoneError::QueueNotFound { queue_id: request.queue_id.clone() })?;
        queue.members.insert(request.agent_id.clone());
        debug!(queue_id = %request.queue_id, agent_id = %request.agent_id, "Agent added to queue");
        Ok(QueueAgent {
            queue_id: request.queue_id,
            agent_id: request.agent_id,
            added_at: Utc::now(),
        })
    }

    /// Returns whether the agent was a member
    pub fn remove_agent(&self, queue_id: &str, agent_id: &str) -> SoftphoneResult<bool> {
        let mut queue = self
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| SoftphoneError::QueueNotFound { queue_id: queue_id.to_string() })?;
        Ok(queue.members.remove(agent_id))
    }

    pub fn get_queue(&self, queue_id: &str) -> Option<CallQueue> {
        self.queues.get(queue_id).map(|q| q.clone())
    }

    pub fn queues_for_agent(&self, agent_id: &str, entity_id: &str) -> Vec<CallQueue> {
        let mut queues: Vec<CallQueue> = self
            .queues
            .iter()
            .filter(|q| q.entity_id == entity_id && q.has_member(agent_id))
            .map(|q| q.clone())
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        queues
    }
}

#[async_trait]
impl DirectorySource for InMemoryDirectory {
    async fn voice_settings(&self, entity_id: &str) -> SoftphoneResult<VoiceSettings> {
        Ok(self.voice_settings.get(entity_id).map(|s| *s).unwrap_or_default())
    }

    async fn agent_queues(&self, agent_id: &str, entity_id: &str) -> SoftphoneResult<Vec<CallQueue>> {
        Ok(self.queues_for_agent(agent_id, entity_id))
    }
}
