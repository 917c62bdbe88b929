use crate::config::{EventPolicy, TypeConfig};
use crate::types::{
    event_id, event_type_name, Event, PropertyChange, RecordMeta, SaveAction, TraceContext,
};
use chrono::Duration;
use uuid::Uuid;

/// Turns a committed-to-be record state and its diff into an [`Event`]
#[derive(Debug, Clone)]
pub struct EventWriter {
    policy: EventPolicy,
    ttl_secs: Option<u64>,
}

impl EventWriter {
    pub fn new(binding: &TypeConfig) -> Self {
        Self {
            policy: binding.event_policy,
            ttl_secs: binding.event_ttl_secs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.policy != EventPolicy::None
    }

    /// Build the event for `meta`, which already carries the new version
    ///
    /// Returns `None` when events are disabled for the type.
    pub fn build(
        &self,
        meta: &RecordMeta,
        action: SaveAction,
        changes: Option<Vec<PropertyChange>>,
        trace: &TraceContext,
    ) -> Option<Event> {
        if !self.enabled() {
            return None;
        }

        let at = meta.updated_at;
        let expires_at = self
            .ttl_secs
            .and_then(|ttl| i64::try_from(ttl).ok())
            .map(|ttl| at + Duration::seconds(ttl));

        Some(Event {
            id: event_id(&meta.id, meta.version),
            partition_key: meta.partition_key.clone(),
            type_name: event_type_name(&meta.type_name),
            related_id: meta.id.clone(),
            related_type: meta.type_name.clone(),
            sequence: meta.version,
            save_action: action,
            changes: match action {
                SaveAction::Deleted => None,
                _ => Some(changes.unwrap_or_default()),
            },
            trace: trace.clone(),
            created_at: at,
            updated_at: at,
            etag: Uuid::new_v4().to_string(),
            ttl: self.ttl_secs,
            expires_at,
        })
    }
}
