//! Lease records and the lock state derived from them.
//!
//! One lease record guards one roster entry. The record is keyed by the
//! entry id inside a per-roster collection and carries the holder plus a
//! server-assigned acquisition timestamp. Nothing else is persisted: the
//! lease duration is deployment configuration, not a record field.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Map of `entry_id -> editor_name` for every lease in one collection.
pub type LeaseSnapshot = BTreeMap<String, String>;

/// Address of a single lease record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseKey {
    /// Collection scoped to the parent roster.
    pub collection_id: String,
    /// Guarded entry; also the record key within the collection.
    pub entry_id: String,
}

impl LeaseKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(collection_id: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            entry_id: entry_id.into(),
        }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection_id, self.entry_id)
    }
}

/// Persisted lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Guarded entry.
    pub entry_id: String,
    /// Stable identity of the holder.
    pub editor_id: String,
    /// Label shown to other editors.
    pub editor_name: String,
    /// Assigned by the store at write time, never by the client.
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    /// Returns how long ago the lease was written.
    ///
    /// A timestamp in the future (clock skew between store and device) counts
    /// as age zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns whether the lease has outlived `lease_duration`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, lease_duration: Duration) -> bool {
        self.age(now) > lease_duration
    }

    /// Returns whether `editor_id` holds this lease.
    #[must_use]
    pub fn is_held_by(&self, editor_id: &str) -> bool {
        self.editor_id == editor_id
    }
}

/// Client side of a lease write; the store stamps the timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseClaim {
    /// Guarded entry.
    pub entry_id: String,
    /// Identity of the claimant.
    pub editor_id: String,
    /// Display name of the claimant.
    pub editor_name: String,
}

impl LeaseClaim {
    /// Builds a claim for `entry_id` on behalf of `editor`.
    #[must_use]
    pub fn new(entry_id: impl Into<String>, editor: &EditorIdentity) -> Self {
        Self {
            entry_id: entry_id.into(),
            editor_id: editor.editor_id.clone(),
            editor_name: editor.editor_name.clone(),
        }
    }

    /// Turns the claim into a record stamped at `acquired_at`.
    #[must_use]
    pub fn stamp(self, acquired_at: DateTime<Utc>) -> Lease {
        Lease {
            entry_id: self.entry_id,
            editor_id: self.editor_id,
            editor_name: self.editor_name,
            acquired_at,
        }
    }
}

/// Who is editing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditorIdentity {
    /// Stable identifier; compared for ownership.
    pub editor_id: String,
    /// Human-readable label.
    pub editor_name: String,
}

impl EditorIdentity {
    /// Creates an identity from an issued editor id.
    #[must_use]
    pub fn new(editor_id: impl Into<String>, editor_name: impl Into<String>) -> Self {
        Self {
            editor_id: editor_id.into(),
            editor_name: editor_name.into(),
        }
    }

    /// Mints a device-local identity for an unauthenticated device.
    ///
    /// The caller must persist the result; a fresh identity on every launch
    /// would orphan the device's own leases until they expire.
    #[must_use]
    pub fn anonymous(editor_name: impl Into<String>) -> Self {
        Self {
            editor_id: format!("anon-{}", Ulid::new()),
            editor_name: editor_name.into(),
        }
    }
}

/// Lock state of one entry as seen by one editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No lease record exists.
    Unlocked,
    /// The local editor holds a live lease.
    HeldBySelf,
    /// Another editor holds a live lease.
    HeldByOther {
        /// Display name of the holder.
        editor_name: String,
    },
    /// Another editor's lease outlived the lease duration; the record may
    /// linger until swept but no longer blocks acquisition.
    Expired {
        /// Display name of the previous holder.
        editor_name: String,
    },
}

impl LockState {
    /// Derives the state from the current record and the local identity.
    ///
    /// An expired lease of the local editor is still `HeldBySelf`: re-acquiring
    /// it is always allowed and simply refreshes the timestamp.
    #[must_use]
    pub fn evaluate(
        lease: Option<&Lease>,
        editor_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Self {
        match lease {
            None => Self::Unlocked,
            Some(lease) if lease.is_held_by(editor_id) => Self::HeldBySelf,
            Some(lease) if lease.is_expired(now, lease_duration) => Self::Expired {
                editor_name: lease.editor_name.clone(),
            },
            Some(lease) => Self::HeldByOther {
                editor_name: lease.editor_name.clone(),
            },
        }
    }

    /// Returns true when the local editor may start editing after acquiring.
    #[must_use]
    pub const fn is_acquirable(&self) -> bool {
        !matches!(self, Self::HeldByOther { .. })
    }

    /// Returns the name of the blocking holder, if any.
    #[must_use]
    pub fn blocking_holder(&self) -> Option<&str> {
        match self {
            Self::HeldByOther { editor_name } => Some(editor_name),
            _ => None,
        }
    }
}

/// Builds the fan-out map for a collection, expired leases included.
#[must_use]
pub fn snapshot_of(leases: &[Lease]) -> LeaseSnapshot {
    leases
        .iter()
        .map(|lease| (lease.entry_id.clone(), lease.editor_name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DURATION: Duration = Duration::from_secs(120);

    fn lease_at(editor_id: &str, acquired_at: DateTime<Utc>) -> Lease {
        Lease {
            entry_id: "7".into(),
            editor_id: editor_id.into(),
            editor_name: editor_id.to_uppercase(),
            acquired_at,
        }
    }

    #[test]
    fn lease_serializes_camel_case_record() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = serde_json::to_value(lease_at("a", at)).unwrap();

        assert_eq!(json["entryId"], "7");
        assert_eq!(json["editorId"], "a");
        assert_eq!(json["editorName"], "A");
        assert_eq!(json["acquiredAt"], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn expiry_is_strictly_after_duration() {
        let start = Utc::now();
        let lease = lease_at("a", start);

        assert!(!lease.is_expired(start + chrono::Duration::seconds(120), DURATION));
        assert!(lease.is_expired(start + chrono::Duration::seconds(121), DURATION));
    }

    #[test]
    fn future_timestamp_has_zero_age() {
        let now = Utc::now();
        let lease = lease_at("a", now + chrono::Duration::seconds(30));
        assert_eq!(lease.age(now), Duration::ZERO);
    }

    #[test]
    fn lock_state_covers_every_holder_case() {
        let start = Utc::now();
        let lease = lease_at("a", start);
        let later = start + chrono::Duration::seconds(60);
        let much_later = start + chrono::Duration::seconds(130);

        assert_eq!(
            LockState::evaluate(None, "b", later, DURATION),
            LockState::Unlocked
        );
        assert_eq!(
            LockState::evaluate(Some(&lease), "a", much_later, DURATION),
            LockState::HeldBySelf
        );
        assert_eq!(
            LockState::evaluate(Some(&lease), "b", later, DURATION),
            LockState::HeldByOther {
                editor_name: "A".into()
            }
        );
        assert_eq!(
            LockState::evaluate(Some(&lease), "b", much_later, DURATION),
            LockState::Expired {
                editor_name: "A".into()
            }
        );
    }

    #[test]
    fn only_live_foreign_lease_blocks() {
        assert!(LockState::Unlocked.is_acquirable());
        assert!(LockState::HeldBySelf.is_acquirable());
        let other = LockState::HeldByOther {
            editor_name: "A".into(),
        };
        assert!(!other.is_acquirable());
        assert_eq!(other.blocking_holder(), Some("A"));
    }

    #[test]
    fn anonymous_identities_are_unique() {
        let one = EditorIdentity::anonymous("Tablet");
        let two = EditorIdentity::anonymous("Tablet");
        assert!(one.editor_id.starts_with("anon-"));
        assert_ne!(one.editor_id, two.editor_id);
    }

    #[test]
    fn snapshot_keeps_every_lease() {
        let start = Utc::now();
        let mut stale = lease_at("b", start - chrono::Duration::seconds(600));
        stale.entry_id = "9".into();
        let snapshot = snapshot_of(&[lease_at("a", start), stale]);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("9").map(String::as_str), Some("B"));
    }
}
