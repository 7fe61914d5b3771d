//! Callback scheduling
//!
//! Records follow-up intents for missed or unfinished interactions. A
//! callback's lifecycle is independent of any live call: it starts `pending`
//! and only an explicit `complete` or `cancel` moves it on. Nothing here
//! expires callbacks.
//!
//! Two rules tie the scheduler to the call state machine:
//!
//! - a callback may only reference a call that the call log has finalized
//! - at most one callback exists per referenced call, whoever creates it
//!
//! Automatic suggestions for missed calls are created by the session actor
//! at the moment it records the terminal transition, never by the UI.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::call::{CallDirection, CallId, CallLog, CallLogEntry, CallState};
use crate::directory::EntityId;
use crate::error::{SoftphoneError, SoftphoneResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Who created the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOrigin {
    /// Created by the agent
    Manual,
    /// Suggested when an inbound call was missed
    MissedCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callback {
    pub id: Uuid,
    pub related_call_id: Option<CallId>,
    /// Number to call back, copied from the related call when there is one
    pub remote_address: Option<String>,
    pub entity_id: Option<EntityId>,
    pub scheduled_for: DateTime<Utc>,
    pub note: Option<String>,
    pub status: CallbackStatus,
    pub origin: CallbackOrigin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackCreate {
    #[serde(default)]
    pub related_call_id: Option<CallId>,
    #[serde(default)]
    pub remote_address: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackUpdate {
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

/// In-memory callback store
pub struct CallbackScheduler {
    callbacks: DashMap<Uuid, Callback>,
    by_call: DashMap<CallId, Uuid>,
    call_log: Arc<CallLog>,
}

impl CallbackScheduler {
    pub fn new(call_log: Arc<CallLog>) -> Self {
        Self {
            callbacks: DashMap::new(),
            by_call: DashMap::new(),
            call_log,
        }
    }

    /// Create a callback on behalf of the agent
    ///
    /// When `related_call_id` is set the call must already be finalized. If a
    /// callback for that call exists (for example the automatic missed-call
    /// suggestion) it is returned instead of creating a second one.
    pub fn create(&self, request: CallbackCreate) -> SoftphoneResult<Callback> {
        let Some(call_id) = request.related_call_id.clone() else {
            if request.remote_address.is_none() {
                return Err(SoftphoneError::InvalidCallback {
                    reason: "a callback needs a related call or a remote address".to_string(),
                });
            }
            let callback = self.build(request, None, CallbackOrigin::Manual);
            self.callbacks.insert(callback.id, callback.clone());
            info!(callback_id = %callback.id, "Created callback");
            return Ok(callback);
        };

        if !self.call_log.is_finalized(&call_id) {
            return Err(SoftphoneError::InvalidCallback {
                reason: format!("call {} has not reached a terminal state", call_id),
            });
        }
        let logged = self.call_log.get(&call_id);

        match self.by_call.entry(call_id.clone()) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                debug!(call_id = %call_id, callback_id = %id, "Callback already exists for call");
                self.get(id)
            }
            Entry::Vacant(slot) => {
                let callback = self.build(request, logged.as_ref(), CallbackOrigin::Manual);
                self.callbacks.insert(callback.id, callback.clone());
                slot.insert(callback.id);
                info!(callback_id = %callback.id, call_id = %call_id, "Created callback for call");
                Ok(callback)
            }
        }
    }

    /// Record the follow-up suggestion for a missed inbound call
    ///
    /// Returns `None` when the entry is not a missed inbound call or when a
    /// callback for the call already exists.
    pub(crate) fn suggest_for_missed(
        &self,
        entry: &CallLogEntry,
        scheduled_for: DateTime<Utc>,
    ) -> Option<Callback> {
        if entry.final_state != CallState::Missed || entry.direction != CallDirection::Inbound {
            return None;
        }

        match self.by_call.entry(entry.call_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let request = CallbackCreate {
                    related_call_id: Some(entry.call_id.clone()),
                    remote_address: None,
                    scheduled_for,
                    note: Some(format!("Missed call from {}", entry.remote_address)),
                };
                let callback = self.build(request, Some(entry), CallbackOrigin::MissedCall);
                self.callbacks.insert(callback.id, callback.clone());
                slot.insert(callback.id);
                info!(callback_id = %callback.id, call_id = %entry.call_id, "Suggested callback for missed call");
                Some(callback)
            }
        }
    }

    pub fn update(&self, callback_id: Uuid, update: CallbackUpdate) -> SoftphoneResult<Callback> {
        let mut callback = self
            .callbacks
            .get_mut(&callback_id)
            .ok_or(SoftphoneError::CallbackNotFound { callback_id })?;
        if callback.status != CallbackStatus::Pending {
            return Err(SoftphoneError::InvalidCallback {
                reason: format!("callback {} is no longer pending", callback_id),
            });
        }
        if let Some(scheduled_for) = update.scheduled_for {
            callback.scheduled_for = scheduled_for;
        }
        if let Some(note) = update.note {
            callback.note = Some(note);
        }
        callback.updated_at = Utc::now();
        Ok(callback.clone())
    }

    pub fn complete(&self, callback_id: Uuid) -> SoftphoneResult<Callback> {
        self.finish(callback_id, CallbackStatus::Completed)
    }

    pub fn cancel(&self, callback_id: Uuid) -> SoftphoneResult<Callback> {
        self.finish(callback_id, CallbackStatus::Cancelled)
    }

    pub fn get(&self, callback_id: Uuid) -> SoftphoneResult<Callback> {
        self.callbacks
            .get(&callback_id)
            .map(|c| c.clone())
            .ok_or(SoftphoneError::CallbackNotFound { callback_id })
    }

    pub fn for_call(&self, call_id: &CallId) -> Option<Callback> {
        let id = *self.by_call.get(call_id)?;
        self.callbacks.get(&id).map(|c| c.clone())
    }

    /// Pending callbacks, earliest first
    pub fn pending(&self) -> Vec<Callback> {
        let mut pending: Vec<Callback> = self
            .callbacks
            .iter()
            .filter(|c| c.status == CallbackStatus::Pending)
            .map(|c| c.clone())
            .collect();
        pending.sort_by_key(|c| c.scheduled_for);
        pending
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn finish(&self, callback_id: Uuid, to: CallbackStatus) -> SoftphoneResult<Callback> {
        let mut callback = self
            .callbacks
            .get_mut(&callback_id)
            .ok_or(SoftphoneError::CallbackNotFound { callback_id })?;
        let current = callback.status;
        match current {
            current if current == to => Ok(callback.clone()),
            CallbackStatus::Pending => {
                callback.status = to;
                callback.updated_at = Utc::now();
                debug!(callback_id = %callback_id, status = ?to, "Callback closed");
                Ok(callback.clone())
            }
            other => Err(SoftphoneError::InvalidCallback {
                reason: format!("callback {} is already {:?}", callback_id, other),
            }),
        }
    }

    fn build(
        &self,
        request: CallbackCreate,
        logged: Option<&CallLogEntry>,
        origin: CallbackOrigin,
    ) -> Callback {
        let now = Utc::now();
        Callback {
            id: Uuid::new_v4(),
            related_call_id: request.related_call_id,
            remote_address: request
                .remote_address
                .or_else(|| logged.map(|e| e.remote_address.clone())),
            entity_id: logged.map(|e| e.entity_id.clone()),
            scheduled_for: request.scheduled_for,
            note: request.note,
            status: CallbackStatus::Pending,
            origin,
            created_at: now,
            updated_at: now,
        }
    }
}
