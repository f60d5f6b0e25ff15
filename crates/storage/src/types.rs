//! Domain types shared across the keygrid crates.
//!
//! This module defines the identifier newtypes and the persisted key record
//! consumed by the verification hot path. Identifiers wrap opaque strings;
//! wrapping them in distinct types makes passing a `WorkspaceId` where a
//! `KeyId` is expected a compile-time error.

use chrono::{DateTime, Utc};

/// Macro to define a newtype wrapper around `String` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `String`
/// - Derives `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<String>` / `From<&str>` and `AsRef<str>`
/// - Implements `Display` that outputs the inner value
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Opaque identifier of a persisted API key record.
    ///
    /// # Examples
    ///
    /// ```
    /// use keygrid_storage::KeyId;
    ///
    /// let id = KeyId::from("key_3ZyGpogbDuLbLPgC");
    /// assert_eq!(id.to_string(), "key_3ZyGpogbDuLbLPgC");
    /// ```
    KeyId
);

define_id!(
    /// Identifier of the workspace (tenant) that owns a key.
    ///
    /// The hot path references workspaces by id only; workspace records
    /// themselves are managed out-of-band.
    WorkspaceId
);

define_id!(
    /// One-way hash of a plaintext API key token.
    ///
    /// Keys arrive at the service already hashed; the plaintext token never
    /// crosses this crate's boundary. The hash is the unique lookup index
    /// for key records.
    KeyHash
);

/// Lifecycle status of an API key.
///
/// A key only ever transitions forward: `Active` → `Disabled` → `Deleted`.
/// Stores must never resurrect a key to an earlier state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// The key may authenticate requests.
    Active,
    /// The key has been switched off by its workspace; it may be re-deleted
    /// but never re-activated.
    Disabled,
    /// The key is soft-deleted and must never authenticate again.
    Deleted,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A persisted API key record as read from storage.
///
/// This is the unit cached by the verifier; it is intentionally small and
/// cheap to clone. The verifier interprets `status`, `expires_at` and
/// `remaining_uses` against an injected clock — the record itself carries
/// no derived validity state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyRecord {
    /// Opaque record identifier.
    pub key_id: KeyId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Lifecycle status; only `Active` keys verify.
    pub status: KeyStatus,
    /// Hard expiry. `None` means the key never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining allowed uses. `None` means unmetered. The read path never
    /// decrements this; an out-of-band writer does.
    pub remaining_uses: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_through_string() {
        let id = KeyId::from("key_abc");
        assert_eq!(id.as_str(), "key_abc");
        assert_eq!(KeyId::from("key_abc".to_owned()), id);
        assert_eq!(id.to_string(), "key_abc");
    }

    #[test]
    fn ids_are_distinct_types() {
        // Compile-time property; this test documents intent.
        let key = KeyId::from("a");
        let ws = WorkspaceId::from("a");
        assert_eq!(key.as_str(), ws.as_str());
    }

    #[test]
    fn status_display_is_snake_case() {
        assert_eq!(KeyStatus::Active.to_string(), "active");
        assert_eq!(KeyStatus::Disabled.to_string(), "disabled");
        assert_eq!(KeyStatus::Deleted.to_string(), "deleted");
    }

    #[test]
    fn key_hash_serde_is_transparent() {
        let hash = KeyHash::from("h1");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"h1\"");
        let back: KeyHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
