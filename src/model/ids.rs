//! Opaque identifier newtypes.
//!
//! Generated ids are UUIDs rendered as lowercase hyphenated strings and are
//! stable across time. Commit ids use UUIDv7 so they sort roughly by
//! creation; everything else is v4. `UserId` and `SessionId` are opaque
//! caller-supplied strings (the core consumes them, it never mints them).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $ctor:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh id.
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($ctor().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

uuid_id!(
    /// Stable project identifier.
    ProjectId,
    Uuid::new_v4
);
uuid_id!(
    /// Stable ref (branch) identifier, distinct from the display name.
    RefId,
    Uuid::new_v4
);
uuid_id!(
    /// Commit identifier. v7 so ids sort roughly by creation time.
    CommitId,
    Uuid::now_v7
);
uuid_id!(
    /// Node identifier, chosen at creation and embedded in the payload.
    NodeId,
    Uuid::new_v4
);
uuid_id!(
    /// Artefact (canvas version) identifier.
    ArtefactId,
    Uuid::new_v4
);

opaque_id!(
    /// Caller-supplied user identity. Authentication is external.
    UserId
);
opaque_id!(
    /// Caller-supplied session identity, the lease holder granularity.
    SessionId
);
