//! Property-based test generators using proptest.
//!
//! Mutation scripts draw entity IDs from a small pool so that creates,
//! updates and deletes from different devices collide often.

use dayflow_core::{EntityDraft, EntityId, EntityKind, Fields, UserId};
use dayflow_sync_engine::{SyncEngine, SyncError, SyncResult};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

/// Strategy for entity kinds.
pub fn kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

/// Strategy for user IDs.
pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    prop::string::string_regex("u[a-z0-9]{1,8}")
        .expect("Invalid regex")
        .prop_map(UserId::new)
}

/// Strategy for IDs drawn from a pool of `pool` values.
pub fn pooled_id_strategy(pool: usize) -> impl Strategy<Value = EntityId> {
    (0..pool.max(1)).prop_map(|n| EntityId::from(format!("e{n}")))
}

/// Strategy for a small bag of user fields.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(
        prop::sample::select(vec!["title", "notes", "color", "done", "priority"]),
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            (0i64..100).prop_map(Value::from),
            prop::string::string_regex("[a-z ]{0,12}")
                .expect("Invalid regex")
                .prop_map(Value::from),
        ],
        1..4,
    )
    .prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    })
}

/// One user action against a device's engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `save_data` with an explicit ID.
    Save {
        /// Kind written.
        kind: EntityKind,
        /// ID of the new entity.
        id: EntityId,
        /// Initial fields.
        fields: Fields,
    },
    /// `update_data`.
    Update {
        /// Kind written.
        kind: EntityKind,
        /// Target entity.
        id: EntityId,
        /// Fields merged in.
        fields: Fields,
    },
    /// `delete_data`.
    Delete {
        /// Kind written.
        kind: EntityKind,
        /// Target entity.
        id: EntityId,
    },
}

impl Mutation {
    /// Returns the kind the mutation writes.
    pub fn kind(&self) -> EntityKind {
        match self {
            Mutation::Save { kind, .. }
            | Mutation::Update { kind, .. }
            | Mutation::Delete { kind, .. } => *kind,
        }
    }

    /// Applies the mutation to `engine`.
    ///
    /// Local rejections that a user could hit by racing another device
    /// (saving an ID that already exists, updating one that is gone) are
    /// reported as `Ok(false)`.
    pub async fn apply(&self, engine: &SyncEngine) -> SyncResult<bool> {
        let result = match self {
            Mutation::Save { kind, id, fields } => {
                let draft = EntityDraft::from_fields(fields.clone()).with_id(id.clone());
                engine.save_data(*kind, draft).await.map(|_| ())
            }
            Mutation::Update { kind, id, fields } => {
                engine.update_data(*kind, id, fields).await.map(|_| ())
            }
            Mutation::Delete { kind, id } => engine.delete_data(*kind, id).await,
        };
        match result {
            Ok(()) => Ok(true),
            Err(SyncError::Store(err)) if err.is_not_found() || err.is_already_exists() => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

/// Strategy for one mutation over a pool of `pool` IDs.
///
/// Records are excluded: their date key turns saves into updates, which
/// makes expected outcomes depend on field contents.
pub fn mutation_strategy(pool: usize) -> impl Strategy<Value = Mutation> {
    let kind = prop::sample::select(vec![EntityKind::Todo, EntityKind::Routine, EntityKind::Tag]);
    prop_oneof![
        3 => (kind.clone(), pooled_id_strategy(pool), fields_strategy())
            .prop_map(|(kind, id, fields)| Mutation::Save { kind, id, fields }),
        2 => (kind.clone(), pooled_id_strategy(pool), fields_strategy())
            .prop_map(|(kind, id, fields)| Mutation::Update { kind, id, fields }),
        1 => (kind, pooled_id_strategy(pool))
            .prop_map(|(kind, id)| Mutation::Delete { kind, id }),
    ]
}

/// A mutation issued by one of several devices after a pause.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    /// Index of the acting device.
    pub device: usize,
    /// Time to wait before acting.
    pub delay: Duration,
    /// What the device does.
    pub mutation: Mutation,
}

/// Strategy for a script of up to `max_len` steps across `devices` devices.
pub fn script_strategy(devices: usize, max_len: usize) -> impl Strategy<Value = Vec<ScriptStep>> {
    prop::collection::vec(
        (0..devices.max(1), 0u64..40, mutation_strategy(4)).prop_map(
            |(device, delay_ms, mutation)| ScriptStep {
                device,
                delay: Duration::from_millis(delay_ms),
                mutation,
            },
        ),
        1..max_len.max(2),
    )
}

/// Strategy for the order and spacing of sign-ins across `devices` devices.
///
/// Every device signs in exactly once.
pub fn sign_in_order_strategy(devices: usize) -> impl Strategy<Value = Vec<(usize, Duration)>> {
    (
        Just((0..devices).collect::<Vec<_>>()).prop_shuffle(),
        prop::collection::vec(0u64..30, devices),
    )
        .prop_map(|(order, delays)| {
            order
                .into_iter()
                .zip(delays)
                .map(|(device, ms)| (device, Duration::from_millis(ms)))
                .collect()
        })
}

/// Returns a draft for a daily record.
pub fn record_draft(date: &str, mood: i64) -> EntityDraft {
    EntityDraft::new().field("date", date).field("mood", json!(mood))
}
