//! Effect - Side effects as values
//!
//! An Effect describes one mutation to perform against a Provider.
//! Nothing happens until an Interpreter executes it.

use std::fmt;

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a resource that does not exist yet
    Create(Resource),
    /// Update a resource in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete and recreate a resource (a force-new attribute changed)
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete a resource by its remote identifier
    Delete { id: ResourceId, identifier: String },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(r) => &r.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } | Effect::Delete { id, .. } => {
                id
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Create(_) => "create",
            Effect::Update { .. } => "update",
            Effect::Replace { .. } => "replace",
            Effect::Delete { .. } => "delete",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Create(r) => write!(f, "+ {}", r.id),
            Effect::Update {
                id,
                changed_attributes,
                ..
            } => write!(f, "~ {} ({})", id, changed_attributes.join(", ")),
            Effect::Replace {
                id,
                changed_attributes,
                ..
            } => write!(f, "-/+ {} ({})", id, changed_attributes.join(", ")),
            Effect::Delete { id, .. } => write!(f, "- {}", id),
        }
    }
}
