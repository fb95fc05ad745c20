use crate::core::{DataError, Document, EntityId, TypeId, document_to_json};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    ComponentAdded,
    ComponentUpdated,
    ComponentRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::EntityCreated,
        Self::EntityUpdated,
        Self::EntityDeleted,
        Self::ComponentAdded,
        Self::ComponentUpdated,
        Self::ComponentRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "entity.created",
            Self::EntityUpdated => "entity.updated",
            Self::EntityDeleted => "entity.deleted",
            Self::ComponentAdded => "component.added",
            Self::ComponentUpdated => "component.updated",
            Self::ComponentRemoved => "component.removed",
        }
    }

    pub fn is_entity_event(&self) -> bool {
        matches!(self, Self::EntityCreated | Self::EntityUpdated | Self::EntityDeleted)
    }

    pub fn is_component_event(&self) -> bool {
        !self.is_entity_event()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DataError::InvalidArgument(format!("Unknown event kind '{}'", s)))
    }
}

/// Payload delivered to hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    EntityCreated {
        entity_id: EntityId,
        /// Names of the components written by the save
        components: Vec<String>,
    },
    EntityUpdated {
        entity_id: EntityId,
        components: Vec<String>,
    },
    EntityDeleted {
        entity_id: EntityId,
        hard: bool,
    },
    ComponentAdded {
        entity_id: EntityId,
        component: String,
        type_id: TypeId,
        data: Document,
    },
    ComponentUpdated {
        entity_id: EntityId,
        component: String,
        type_id: TypeId,
        old: Document,
        new: Document,
    },
    ComponentRemoved {
        entity_id: EntityId,
        component: String,
        type_id: TypeId,
        data: Document,
    },
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::EntityCreated { .. } => EventKind::EntityCreated,
            Self::EntityUpdated { .. } => EventKind::EntityUpdated,
            Self::EntityDeleted { .. } => EventKind::EntityDeleted,
            Self::ComponentAdded { .. } => EventKind::ComponentAdded,
            Self::ComponentUpdated { .. } => EventKind::ComponentUpdated,
            Self::ComponentRemoved { .. } => EventKind::ComponentRemoved,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::EntityCreated { entity_id, .. }
            | Self::EntityUpdated { entity_id, .. }
            | Self::EntityDeleted { entity_id, .. }
            | Self::ComponentAdded { entity_id, .. }
            | Self::ComponentUpdated { entity_id, .. }
            | Self::ComponentRemoved { entity_id, .. } => entity_id,
        }
    }

    /// Component name for component events.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::ComponentAdded { component, .. }
            | Self::ComponentUpdated { component, .. }
            | Self::ComponentRemoved { component, .. } => Some(component.as_str()),
            _ => None,
        }
    }

    /// JSON view of the payload, dates as RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        let mut payload = match self {
            Self::EntityCreated { components, .. } | Self::EntityUpdated { components, .. } => {
                json!({ "components": components })
            }
            Self::EntityDeleted { hard, .. } => json!({ "hard": hard }),
            Self::ComponentAdded { component, data, .. } | Self::ComponentRemoved { component, data, .. } => {
                json!({ "component": component, "data": document_to_json(data) })
            }
            Self::ComponentUpdated {
                component, old, new, ..
            } => json!({
                "component": component,
                "old": document_to_json(old),
                "new": document_to_json(new),
            }),
        };
        payload["kind"] = json!(self.kind().as_str());
        payload["entity_id"] = json!(self.entity_id().to_string());
        payload
    }
}
