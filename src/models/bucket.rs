//! Represents a logical bucket: a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Versioning mode of a bucket.
///
/// Buckets start `Unversioned`. Once versioning has been configured the
/// bucket moves between `Enabled` and `Suspended` and never returns to
/// `Unversioned`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
pub enum VersioningState {
    Unversioned,
    Enabled,
    Suspended,
}

impl VersioningState {
    /// Parse the `<Status>` value of a `VersioningConfiguration` body.
    ///
    /// Only the two states a client may request are accepted.
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "Enabled" => Some(Self::Enabled),
            "Suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    /// Whether a bucket in this state may be moved to `next`.
    pub fn can_transition_to(self, next: VersioningState) -> bool {
        !matches!(next, VersioningState::Unversioned) || self == VersioningState::Unversioned
    }

    /// Value reported by `GetBucketVersioning`; `None` while unversioned.
    pub fn status(self) -> Option<&'static str> {
        match self {
            Self::Unversioned => None,
            Self::Enabled => Some("Enabled"),
            Self::Suspended => Some("Suspended"),
        }
    }

    /// Whether new writes receive a fresh version id.
    pub fn assigns_version_ids(self) -> bool {
        self == Self::Enabled
    }

    /// Whether deletes without a version id leave a delete marker behind.
    pub fn keeps_history(self) -> bool {
        self != Self::Unversioned
    }
}

impl fmt::Display for VersioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unversioned => "Unversioned",
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
        };
        f.write_str(name)
    }
}

/// A storage bucket in the S3-compatible system.
///
/// Buckets act as namespaces for objects and belong to a single owner.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Globally unique bucket name (must conform to DNS naming rules).
    pub name: String,

    /// ID of the user or account that owns this bucket.
    pub owner_id: Uuid,

    /// Region where the bucket is hosted (e.g. "us-west-2").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// Current versioning mode.
    pub versioning: VersioningState,
}
