//! Syncable entity documents.

mod id;

pub use id::EntityId;

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind-specific body of an entity.
pub type Fields = serde_json::Map<String, Value>;

/// A syncable entity (todo, routine, record or tag).
///
/// The same document shape is stored locally and remotely. Two copies are
/// considered converged when [`Entity::same_fields`] holds; timestamps are
/// carried along but the remote store never rewrites them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable entity ID.
    pub id: EntityId,
    /// Kind-specific body.
    #[serde(default)]
    pub fields: Fields,
    /// When the entity was first created on a device.
    #[serde(default)]
    pub created_at: Timestamp,
    /// When the entity was last modified on a device.
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl Entity {
    /// Creates an entity stamped with the current time.
    pub fn new(id: EntityId, fields: Fields) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            fields,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parses an entity from a JSON document.
    ///
    /// The document must be an object with a non-empty string `id`.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        if !value.is_object() {
            return Err(CoreError::InvalidDocument("expected a JSON object".into()));
        }
        let entity: Entity = serde_json::from_value(value)?;
        EntityId::parse(entity.id.as_str())?;
        Ok(entity)
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a field value if it is a string.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Merges a partial update into the body and bumps `updated_at`.
    ///
    /// Keys present in `patch` overwrite existing keys; other keys are kept.
    pub fn apply_patch(&mut self, patch: &Fields) {
        for (key, value) in patch {
            self.fields.insert(key.clone(), value.clone());
        }
        self.updated_at = Timestamp::now().max(self.updated_at);
    }

    /// Returns true if both copies have the same ID and body.
    #[must_use]
    pub fn same_fields(&self, other: &Entity) -> bool {
        self.id == other.id && self.fields == other.fields
    }
}

/// Input for creating an entity.
///
/// The ID is optional: callers that do not supply one get a freshly
/// generated ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDraft {
    /// Client-chosen ID, if any.
    pub id: Option<EntityId>,
    /// Kind-specific body.
    pub fields: Fields,
}

impl EntityDraft {
    /// Creates an empty draft.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a draft from an existing body.
    #[must_use]
    pub fn from_fields(fields: Fields) -> Self {
        Self { id: None, fields }
    }

    /// Sets the ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets a single field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the ID, generating one if absent.
    pub fn id_or_generate(&mut self) -> EntityId {
        self.id.get_or_insert_with(EntityId::new).clone()
    }

    /// Converts the draft into an entity stamped with the current time.
    #[must_use]
    pub fn into_entity(mut self) -> Entity {
        let id = self.id_or_generate();
        Entity::new(id, self.fields)
    }
}
