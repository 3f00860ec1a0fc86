//! Core type definitions for Dayflow.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier of an authenticated account.
///
/// User IDs are owned by the auth layer and stay stable for the
/// lifetime of the account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user ID from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of one installation of the app.
///
/// The remote store uses it as the credential that owns a session record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device ID from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random device ID.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Wall-clock timestamp in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(millis)
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The kinds of syncable entity.
///
/// Each kind is synchronized independently: it has its own local
/// collection, its own remote collection and its own live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A todo item.
    Todo,
    /// A recurring routine.
    Routine,
    /// A dated record (one per day).
    Record,
    /// A tag attached to records.
    Tag,
}

impl EntityKind {
    /// All kinds, in bootstrap order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Todo,
        EntityKind::Routine,
        EntityKind::Record,
        EntityKind::Tag,
    ];

    /// Returns the singular name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Todo => "todo",
            EntityKind::Routine => "routine",
            EntityKind::Record => "record",
            EntityKind::Tag => "tag",
        }
    }

    /// Returns the collection name used by both stores.
    #[must_use]
    pub const fn collection_name(self) -> &'static str {
        match self {
            EntityKind::Todo => "todos",
            EntityKind::Routine => "routines",
            EntityKind::Record => "records",
            EntityKind::Tag => "tags",
        }
    }

    /// Returns the field that identifies an entity of this kind
    /// independently of its ID, if the kind has one.
    ///
    /// Records are keyed by their `date`: saving a record for a date that
    /// already has one updates the existing entity.
    #[must_use]
    pub const fn natural_key(self) -> Option<&'static str> {
        match self {
            EntityKind::Record => Some("date"),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" | "todos" => Ok(EntityKind::Todo),
            "routine" | "routines" => Ok(EntityKind::Routine),
            "record" | "records" => Ok(EntityKind::Record),
            "tag" | "tags" => Ok(EntityKind::Tag),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}
