//! In-memory collection shared by the store implementations.

use crate::error::{StoreError, StoreResult};
use dayflow_core::{Entity, EntityDraft, EntityId, EntityKind, Fields};
use std::collections::BTreeMap;

/// Entities of one kind keyed by ID.
#[derive(Debug, Clone)]
pub(crate) struct Collection {
    kind: EntityKind,
    entities: BTreeMap<EntityId, Entity>,
}

impl Collection {
    pub(crate) fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entities: BTreeMap::new(),
        }
    }

    pub(crate) fn from_entities(kind: EntityKind, entities: Vec<Entity>) -> Self {
        let entities = entities.into_iter().map(|e| (e.id.clone(), e)).collect();
        Self { kind, entities }
    }

    pub(crate) fn kind(&self) -> EntityKind {
        self.kind
    }

    pub(crate) fn all(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<Entity> {
        self.entities.get(id).cloned()
    }

    pub(crate) fn add(&mut self, draft: EntityDraft) -> StoreResult<Entity> {
        let entity = draft.into_entity();
        if self.entities.contains_key(&entity.id) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind,
                id: entity.id,
            });
        }
        self.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    pub(crate) fn update(&mut self, id: &EntityId, patch: &Fields) -> StoreResult<Entity> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                kind: self.kind,
                id: id.clone(),
            })?;
        entity.apply_patch(patch);
        Ok(entity.clone())
    }

    pub(crate) fn delete(&mut self, id: &EntityId) {
        self.entities.remove(id);
    }

    pub(crate) fn sync(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub(crate) fn clear(&mut self) {
        self.entities.clear();
    }

    pub(crate) fn replace(&mut self, entities: Vec<Entity>) {
        self.entities = entities.into_iter().map(|e| (e.id.clone(), e)).collect();
    }

    pub(crate) fn find_by_key(&self, key: &str) -> Option<Entity> {
        let field = self.kind.natural_key()?;
        self.entities
            .values()
            .find(|e| e.get_str(field) == Some(key))
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }
}
