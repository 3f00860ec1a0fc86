//! The remote active-session record.

use crate::types::Timestamp;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the random suffix of a session ID.
const SUFFIX_LEN: usize = 9;

/// Identifier of one login on one device.
///
/// Session IDs combine a base-36 millisecond timestamp with a random
/// alphanumeric suffix, e.g. `lxk2v3q1-8f3kd9a0z`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new session ID.
    #[must_use]
    pub fn generate() -> Self {
        let time = to_base36(Timestamp::now().as_millis());
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(format!("{time}-{suffix}"))
    }

    /// Wraps an existing session ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// The single active-session document stored remotely per user.
///
/// Whoever wrote the current record is the authoritative device for the
/// account. Timestamps are assigned by the remote store when the record is
/// written or touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// ID of the session that owns the account.
    pub session_id: SessionId,
    /// When the session was started.
    pub created_at: Timestamp,
    /// When the owning device was last seen in the foreground.
    pub last_active: Timestamp,
}

impl SessionRecord {
    /// Creates a record for a new session, stamped with local time.
    ///
    /// The remote store replaces both timestamps with its own clock.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        let now = Timestamp::now();
        Self {
            session_id,
            created_at: now,
            last_active: now,
        }
    }

    /// Returns true if the record belongs to the given session.
    #[must_use]
    pub fn is_owned_by(&self, session_id: &SessionId) -> bool {
        &self.session_id == session_id
    }
}
